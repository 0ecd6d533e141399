use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::{Context, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use console::{Term, style};

use fbs::core::{Cancellation, Hash32};
use fbs::discover::{Discoverer, Plan, StructureDiscoverer, plan};
use fbs::gradle::GradleStructure;
use fbs::graph::Graph;
use fbs::kotlin::{JunitDiscoverer, KotlinDiscoverer};
use fbs::runner::{Runner, TaskStatus};
use fbs::task::{Task, TaskKind, TaskPayload};

#[derive(Parser)]
#[command(
    name = "fbs",
    about = "A content-addressed, parallel build engine",
    disable_version_flag = true
)]
struct Cli {
    /// Show version information
    #[arg(short = 'v', long, global = true)]
    version: bool,

    /// Number of parallel workers for task execution
    #[arg(short = 'j', long = "parallel", global = true, default_value_t = 8)]
    parallel: usize,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Plan and print the build graph
    Plan {
        /// Directory to plan (defaults to the current directory)
        directory: Option<Utf8PathBuf>,
    },
    /// Execute build tasks in the specified directory
    Build {
        directory: Option<Utf8PathBuf>,
    },
    /// Execute test tasks in the specified directory
    Test {
        directory: Option<Utf8PathBuf>,
    },
    /// Execute dependency-download tasks
    Deps {
        directory: Option<Utf8PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    fbs::utils::init_logging().ok();

    if cli.version {
        println!("fbs {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let Some(command) = cli.command else {
        eprintln!("Usage: fbs <plan|build|test|deps> [DIR]");
        return ExitCode::FAILURE;
    };

    let result = match command {
        Command::Plan { directory } => run_plan(directory),
        Command::Build { directory } => run_execute(directory, TaskKind::Build, cli.parallel),
        Command::Test { directory } => run_execute(directory, TaskKind::Test, cli.parallel),
        Command::Deps { directory } => run_execute(directory, TaskKind::Deps, cli.parallel),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn resolve_directory(directory: Option<Utf8PathBuf>) -> anyhow::Result<Utf8PathBuf> {
    let raw = match directory {
        Some(dir) => dir.into_std_path_buf(),
        None => std::env::current_dir().context("couldn't determine current directory")?,
    };
    let absolute = std::path::absolute(&raw)
        .with_context(|| format!("couldn't resolve {}", raw.display()))?;
    Utf8PathBuf::from_path_buf(absolute).map_err(|path| anyhow!("path is not UTF-8: {path:?}"))
}

fn home_dir() -> anyhow::Result<Utf8PathBuf> {
    let home = dirs::home_dir().context("couldn't determine the home directory")?;
    Utf8PathBuf::from_path_buf(home).map_err(|path| anyhow!("home path is not UTF-8: {path:?}"))
}

fn toolchain(home: &Utf8Path) -> (Vec<Box<dyn Discoverer>>, Vec<Box<dyn StructureDiscoverer>>) {
    let artifact_cache = home
        .join(".gradle")
        .join("caches")
        .join("modules-2")
        .join("files-2.1");

    let discoverers: Vec<Box<dyn Discoverer>> =
        vec![Box::new(KotlinDiscoverer), Box::new(JunitDiscoverer)];
    let structures: Vec<Box<dyn StructureDiscoverer>> =
        vec![Box::new(GradleStructure::new(artifact_cache))];
    (discoverers, structures)
}

fn kind_style(kind: TaskKind) -> console::Style {
    match kind {
        TaskKind::Build => console::Style::new().yellow(),
        TaskKind::Test => console::Style::new().cyan(),
        TaskKind::Deps => console::Style::new().magenta(),
    }
}

fn relative_display(base: &Utf8Path, task: &Task) -> String {
    // Artifact downloads live in the shared Maven cache; their path is
    // noise in a per-repository listing.
    if matches!(task.payload(), TaskPayload::Artifact(_)) {
        return String::new();
    }

    let dir = task.directory();
    let rel = dir.strip_prefix(base).unwrap_or(dir);
    let rel = if rel.as_str().is_empty() {
        "."
    } else {
        rel.as_str()
    };
    format!(" ({rel})")
}

fn print_task(task: &Task, base: &Utf8Path) {
    let hash = task.own_hash().to_hex();
    println!(
        "- {} {}{}{}",
        style(task.name()).green(),
        kind_style(task.kind()).apply_to(format!("[{}]", task.kind())),
        style(relative_display(base, task)).blue(),
        style(format!(" {}", &hash[..8])).dim(),
    );

    for dep in task.dependencies() {
        let dep_hash = dep.own_hash().to_hex();
        println!(
            "    -> {} {}{}{}",
            style(dep.name()).green(),
            kind_style(dep.kind()).apply_to(format!("[{}]", dep.kind())),
            style(relative_display(base, &dep)).blue(),
            style(format!(" {}", &dep_hash[..8])).dim(),
        );
    }
}

fn run_plan(directory: Option<Utf8PathBuf>) -> anyhow::Result<()> {
    let dir = resolve_directory(directory)?;
    let home = home_dir()?;
    let (discoverers, structures) = toolchain(&home);

    let result = plan(&dir, &discoverers, &structures)?;

    println!("Planning Directory: {}", result.root_dir);
    if !result.roots.is_empty() {
        println!("Compilation Roots:");
        for (i, root) in result.roots.iter().enumerate() {
            println!("  {}. {} ({})", i + 1, root.root_dir(), root.kind());
        }
        println!();
    }

    if result.graph.is_empty() {
        println!("No tasks discovered.");
    } else {
        // Group tasks per compilation root for readability.
        let mut by_root: HashMap<&Utf8Path, Vec<&Arc<Task>>> = HashMap::new();
        for task in result.graph.tasks() {
            if let Some(root_dir) = result.task_roots.get(&task.own_hash()) {
                by_root.entry(root_dir.as_path()).or_default().push(task);
            }
        }

        for root in &result.roots {
            let Some(tasks) = by_root.get(root.root_dir()) else {
                continue;
            };
            let rel = root
                .root_dir()
                .strip_prefix(&dir)
                .unwrap_or(root.root_dir());
            let rel = if rel.as_str().is_empty() { "." } else { rel.as_str() };
            println!("Tasks from {} compilation root ({rel}):", root.kind());
            for task in tasks {
                print!("  ");
                print_task(task, &dir);
            }
            println!();
        }
    }

    if !result.errors.is_empty() {
        println!("Errors:");
        for (i, err) in result.errors.iter().enumerate() {
            println!("{}. {err}", i + 1);
        }
    }

    Ok(())
}

/// Tasks of the requested kind, restricted to the directory subtree.
/// Dependency-download tasks live outside the repository and are matched
/// globally instead.
fn filter_tasks(result: &Plan, kind: TaskKind, base: &Utf8Path) -> Vec<Arc<Task>> {
    result
        .graph
        .tasks()
        .filter(|task| task.kind() == kind)
        .filter(|task| kind == TaskKind::Deps || task.directory().starts_with(base))
        .cloned()
        .collect()
}

/// In-place task-status rendering: one line per task, redrawn on
/// completion with ANSI cursor movement.
struct ProgressRenderer {
    term: Term,
    lines: HashMap<Hash32, usize>,
    total: usize,
    base: Utf8PathBuf,
    guard: Mutex<()>,
}

impl ProgressRenderer {
    fn new(ordered: &[Arc<Task>], base: Utf8PathBuf) -> Self {
        let lines = ordered
            .iter()
            .enumerate()
            .map(|(i, task)| (task.own_hash(), i))
            .collect();
        Self {
            term: Term::stdout(),
            lines,
            total: ordered.len(),
            base,
            guard: Mutex::new(()),
        }
    }

    fn print_pending(&self, ordered: &[Arc<Task>]) {
        for task in ordered {
            println!(
                "  {} {}{}",
                style("⏳").yellow(),
                task.display_name(),
                style(relative_display(&self.base, task)).blue(),
            );
        }
    }

    fn update(&self, task: &Task, status: TaskStatus, finished: bool, cached: bool) {
        if !finished {
            return;
        }
        let Some(&line) = self.lines.get(&task.own_hash()) else {
            return;
        };

        let (symbol, styled) = match (status, cached) {
            (TaskStatus::Failed, _) => ("✗", console::Style::new().red()),
            (_, true) => ("↻", console::Style::new().cyan()),
            _ => ("✓", console::Style::new().green()),
        };

        let _guard = self.guard.lock().unwrap();
        let up = self.total - line;
        self.term.move_cursor_up(up).ok();
        self.term.clear_line().ok();
        println!(
            "  {} {}{}",
            styled.apply_to(symbol),
            task.display_name(),
            style(relative_display(&self.base, task)).blue(),
        );
        self.term.move_cursor_down(up - 1).ok();
    }
}

fn run_execute(
    directory: Option<Utf8PathBuf>,
    kind: TaskKind,
    parallel: usize,
) -> anyhow::Result<()> {
    let dir = resolve_directory(directory)?;
    let home = home_dir()?;
    let (discoverers, structures) = toolchain(&home);

    let result = plan(&dir, &discoverers, &structures)?;
    for err in &result.errors {
        tracing::warn!("planning: {err}");
    }

    let filtered = filter_tasks(&result, kind, &dir);
    if filtered.is_empty() {
        println!("No {kind} tasks found in directory {dir}");
        return Ok(());
    }

    // The execution graph is the filtered tasks plus everything they
    // transitively need, dependencies outside the subtree included.
    let mut graph = Graph::new();
    for task in &filtered {
        graph.insert_with_dependencies(task);
    }
    graph.freeze()?;
    let ordered = graph.topological_order()?;

    let cache_dir = home.join(".fbs").join("cache");
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("couldn't create cache directory {cache_dir}"))?;

    let renderer = ProgressRenderer::new(&ordered, dir.clone());
    renderer.print_pending(&ordered);

    let progress = move |task: &Task, status: TaskStatus, finished: bool, cached: bool| {
        renderer.update(task, status, finished, cached);
    };

    let runner = Runner::new(cache_dir);
    let report = runner.run(&mut graph, parallel, &Cancellation::new(), Some(&progress));

    match report.error {
        Some(err) => Err(anyhow::Error::new(err).context("execution failed")),
        None => Ok(()),
    }
}
