//! Hierarchical task discovery.
//!
//! Planning walks the repository bottom-up (deepest directories first) so
//! that subdirectory tasks exist before their enclosing directory is
//! processed and can be offered to discoverers as *potential dependencies*.
//! Each directory is attributed to a compilation root by ascending its
//! ancestors through the registered [`StructureDiscoverer`]s; the root then
//! stitches cross-task edges that no single discoverer can see locally.
//!
//! Planning errors are non-fatal and accumulated: a directory that cannot
//! be discovered simply contributes no tasks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::context::BuildContext;
use crate::core::Hash32;
use crate::error::PlanError;
use crate::graph::Graph;
use crate::task::Task;

/// Build and output directories never worth scanning.
pub const SKIPPED_DIRS: [&str; 21] = [
    "node_modules",
    "target",
    "build",
    "dist",
    "out",
    "bin",
    "obj",
    "Debug",
    "Release",
    "__pycache__",
    ".gradle",
    ".idea",
    ".vscode",
    ".vs",
    "vendor",
    "deps",
    "_build",
    ".tox",
    ".pytest_cache",
    ".coverage",
    "htmlcov",
];

fn is_skippable(name: &str) -> bool {
    SKIPPED_DIRS.contains(&name)
}

/// Tasks found in one directory, plus any non-fatal errors hit on the way.
#[derive(Default)]
pub struct DiscoveryResult {
    pub tasks: Vec<Arc<Task>>,
    pub errors: Vec<anyhow::Error>,
}

impl DiscoveryResult {
    pub fn from_tasks(tasks: Vec<Arc<Task>>) -> Self {
        Self {
            tasks,
            errors: Vec::new(),
        }
    }
}

/// Emits tasks for one directory.
///
/// Contract: a pure function of `(dir, potential_deps, context)`; may read
/// the filesystem, must not mutate it.
pub trait Discoverer: Send + Sync {
    fn name(&self) -> &'static str;

    fn discover(
        &self,
        dir: &Utf8Path,
        potential_deps: &[Arc<Task>],
        context: &BuildContext,
    ) -> anyhow::Result<DiscoveryResult>;
}

/// A per-project aggregate that stitches the edges discovery cannot derive
/// locally: jar-from-compiles, tests-against-jar, compile-against-artifact
/// and, at the end, project-to-project links.
pub trait CompilationRoot: Send + Sync {
    fn root_dir(&self) -> &Utf8Path;

    /// e.g. "gradle"
    fn kind(&self) -> &'static str;

    fn build_context(&self, dir: &Utf8Path) -> BuildContext;

    /// Inject cross-task edges for one directory's discovered tasks and
    /// return the (possibly extended) task list.
    fn stitch_dependencies(
        &self,
        dir: &Utf8Path,
        tasks: Vec<Arc<Task>>,
        context: &BuildContext,
    ) -> Vec<Arc<Task>>;

    /// Stitch inter-project edges once the whole graph is assembled.
    fn resolve_project_dependencies(
        &self,
        graph: &Graph,
        roots: &[Arc<dyn CompilationRoot>],
    ) -> anyhow::Result<()>;
}

/// Probes whether a directory is the root of a project type.
///
/// Implementations must memoise per directory: two discoveries of the same
/// compilation root have to return the same shared instance, otherwise the
/// edges stitched through it fall apart.
pub trait StructureDiscoverer: Send + Sync {
    fn name(&self) -> &'static str;

    fn probe(&self, dir: &Utf8Path) -> anyhow::Result<Option<Arc<dyn CompilationRoot>>>;
}

/// The outcome of planning a directory.
pub struct Plan {
    pub graph: Graph,
    pub errors: Vec<PlanError>,
    pub root_dir: Utf8PathBuf,
    pub scanned: Vec<Utf8PathBuf>,
    pub roots: Vec<Arc<dyn CompilationRoot>>,
    /// Own-hash of each inserted task mapped to its root directory; used
    /// for grouping in the plan printout.
    pub task_roots: HashMap<Hash32, Utf8PathBuf>,
}

/// Discover all build tasks under `dir`.
pub fn plan(
    dir: &Utf8Path,
    discoverers: &[Box<dyn Discoverer>],
    structures: &[Box<dyn StructureDiscoverer>],
) -> Result<Plan, PlanError> {
    let config = Arc::new(Config::load(dir)?);

    let mut errors: Vec<PlanError> = Vec::new();
    let mut graph = Graph::new();

    let directories = collect_directories(dir, &mut errors);

    let mut roots: Vec<Arc<dyn CompilationRoot>> = Vec::new();
    let mut root_dirs: HashSet<Utf8PathBuf> = HashSet::new();
    let mut tasks_by_dir: HashMap<Utf8PathBuf, Vec<Arc<Task>>> = HashMap::new();
    let mut task_roots: HashMap<Hash32, Utf8PathBuf> = HashMap::new();
    let mut scanned = Vec::new();

    for dir_path in directories {
        scanned.push(dir_path.clone());

        let root = match find_root(&dir_path, structures) {
            Ok(Some(root)) => root,
            Ok(None) => continue,
            Err(err) => {
                errors.push(err);
                continue;
            }
        };

        if root_dirs.insert(root.root_dir().to_owned()) {
            roots.push(Arc::clone(&root));
        }

        let mut context = root.build_context(&dir_path);
        context.config = Some(Arc::clone(&config));

        let potential: Vec<Arc<Task>> = tasks_by_dir
            .iter()
            .filter(|(sub_dir, _)| is_strict_subdir(&dir_path, sub_dir))
            .flat_map(|(_, tasks)| tasks.iter().cloned())
            .collect();

        let mut dir_tasks = Vec::new();
        for discoverer in discoverers {
            match discoverer.discover(&dir_path, &potential, &context) {
                Ok(result) => {
                    dir_tasks.extend(result.tasks);
                    errors.extend(result.errors.into_iter().map(|source| {
                        PlanError::Discoverer {
                            name: discoverer.name(),
                            dir: dir_path.clone(),
                            source,
                        }
                    }));
                }
                Err(source) => errors.push(PlanError::Discoverer {
                    name: discoverer.name(),
                    dir: dir_path.clone(),
                    source,
                }),
            }
        }

        let stitched = root.stitch_dependencies(&dir_path, dir_tasks, &context);

        for task in &stitched {
            if graph.insert(Arc::clone(task)) {
                task_roots.insert(task.own_hash(), root.root_dir().to_owned());
            }
        }

        if !stitched.is_empty() {
            tasks_by_dir.insert(dir_path, stitched);
        }
    }

    for root in &roots {
        if let Err(source) = root.resolve_project_dependencies(&graph, &roots) {
            errors.push(PlanError::Resolve {
                root: root.root_dir().to_owned(),
                source,
            });
        }
    }

    // Dependency lists are complete; memoise the identities. A cycle here
    // is recorded and will fail scheduling again later.
    if let Err(err) = graph.freeze() {
        errors.push(err.into());
    }

    Ok(Plan {
        graph,
        errors,
        root_dir: dir.to_owned(),
        scanned,
        roots,
        task_roots,
    })
}

/// All scannable directories under `dir`, deepest first.
///
/// Hidden directories (except the root itself) and the skip-list are pruned
/// together with everything beneath them.
fn collect_directories(dir: &Utf8Path, errors: &mut Vec<PlanError>) -> Vec<Utf8PathBuf> {
    let mut directories = Vec::new();

    let walk = WalkDir::new(dir).follow_links(false).into_iter();
    let walk = walk.filter_entry(|entry| {
        if entry.depth() == 0 {
            return true;
        }
        if !entry.file_type().is_dir() {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        !name.starts_with('.') && !is_skippable(&name)
    });

    for entry in walk {
        match entry {
            Ok(entry) => {
                match Utf8Path::from_path(entry.path()) {
                    Some(path) => directories.push(path.to_owned()),
                    None => errors.push(PlanError::NonUtf8Path(entry.path().to_owned())),
                }
            }
            Err(err) => {
                let path = err
                    .path()
                    .and_then(Utf8Path::from_path)
                    .unwrap_or(dir)
                    .to_owned();
                errors.push(PlanError::Walk {
                    path,
                    source: err.into(),
                });
            }
        }
    }

    // Deepest first; ties resolve lexicographically so planning order is
    // reproducible.
    directories.sort_by(|a, b| {
        let depth = |p: &Utf8PathBuf| p.components().count();
        depth(b).cmp(&depth(a)).then_with(|| a.cmp(b))
    });

    directories
}

/// Ascend from `start` looking for the first structure match.
fn find_root(
    start: &Utf8Path,
    structures: &[Box<dyn StructureDiscoverer>],
) -> Result<Option<Arc<dyn CompilationRoot>>, PlanError> {
    for dir in start.ancestors() {
        for structure in structures {
            match structure.probe(dir) {
                Ok(Some(root)) => return Ok(Some(root)),
                Ok(None) => {}
                Err(source) => {
                    return Err(PlanError::Structure {
                        name: structure.name(),
                        dir: dir.to_owned(),
                        source,
                    });
                }
            }
        }
    }

    Ok(None)
}

fn is_strict_subdir(parent: &Utf8Path, child: &Utf8Path) -> bool {
    child != parent && child.starts_with(parent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ExecTask, TaskKind, TaskPayload, TaskResult};

    /// Recognises any directory containing `root.marker`.
    struct MarkerStructure {
        cache: std::sync::Mutex<HashMap<Utf8PathBuf, Option<Arc<MarkerRoot>>>>,
    }

    struct MarkerRoot {
        dir: Utf8PathBuf,
    }

    impl MarkerStructure {
        fn new() -> Self {
            Self {
                cache: std::sync::Mutex::new(HashMap::new()),
            }
        }
    }

    impl StructureDiscoverer for MarkerStructure {
        fn name(&self) -> &'static str {
            "marker"
        }

        fn probe(&self, dir: &Utf8Path) -> anyhow::Result<Option<Arc<dyn CompilationRoot>>> {
            let mut cache = self.cache.lock().unwrap();
            let root = cache
                .entry(dir.to_owned())
                .or_insert_with(|| {
                    dir.join("root.marker")
                        .is_file()
                        .then(|| Arc::new(MarkerRoot { dir: dir.to_owned() }))
                })
                .clone();
            Ok(root.map(|r| r as Arc<dyn CompilationRoot>))
        }
    }

    impl CompilationRoot for MarkerRoot {
        fn root_dir(&self) -> &Utf8Path {
            &self.dir
        }

        fn kind(&self) -> &'static str {
            "marker"
        }

        fn build_context(&self, _dir: &Utf8Path) -> BuildContext {
            BuildContext::new()
        }

        fn stitch_dependencies(
            &self,
            _dir: &Utf8Path,
            tasks: Vec<Arc<Task>>,
            _context: &BuildContext,
        ) -> Vec<Arc<Task>> {
            tasks
        }

        fn resolve_project_dependencies(
            &self,
            _graph: &Graph,
            _roots: &[Arc<dyn CompilationRoot>],
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// Emits one task per directory containing `task.txt`, depending on
    /// every offered potential dependency.
    struct MarkerDiscoverer;

    impl Discoverer for MarkerDiscoverer {
        fn name(&self) -> &'static str {
            "marker-task"
        }

        fn discover(
            &self,
            dir: &Utf8Path,
            potential_deps: &[Arc<Task>],
            context: &BuildContext,
        ) -> anyhow::Result<DiscoveryResult> {
            assert!(context.config.is_some(), "configuration must be overlaid");

            if !dir.join("task.txt").is_file() {
                return Ok(DiscoveryResult::default());
            }

            let task = Task::new(TaskPayload::Exec(ExecTask::new(
                "marker-task",
                dir,
                TaskKind::Build,
                dir.as_str().to_owned(),
                |_, _| TaskResult::ok(vec![]),
            )));
            for dep in potential_deps {
                task.add_dependency(dep);
            }

            Ok(DiscoveryResult::from_tasks(vec![task]))
        }
    }

    fn fixture() -> (tempfile::TempDir, Utf8PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        (tmp, dir)
    }

    fn plan_fixture(dir: &Utf8Path) -> Plan {
        let discoverers: Vec<Box<dyn Discoverer>> = vec![Box::new(MarkerDiscoverer)];
        let structures: Vec<Box<dyn StructureDiscoverer>> = vec![Box::new(MarkerStructure::new())];
        plan(dir, &discoverers, &structures).unwrap()
    }

    #[test]
    fn walk_skips_hidden_and_output_directories() {
        let (_tmp, dir) = fixture();
        for sub in ["src", "node_modules", "target", ".git", "src/build"] {
            std::fs::create_dir_all(dir.join(sub)).unwrap();
        }

        let result = plan_fixture(&dir);

        for scanned in &result.scanned {
            let rel = scanned.strip_prefix(&dir).unwrap_or(scanned);
            for component in rel.components() {
                let name = component.as_str();
                assert!(!is_skippable(name), "scanned skip-listed dir {scanned}");
                assert!(!name.starts_with('.'), "scanned hidden dir {scanned}");
            }
        }

        assert!(result.scanned.iter().any(|d| d.ends_with("src")));
    }

    #[test]
    fn subdirectory_tasks_become_potential_dependencies() {
        let (_tmp, dir) = fixture();
        std::fs::write(dir.join("root.marker"), "").unwrap();
        std::fs::write(dir.join("task.txt"), "").unwrap();
        std::fs::create_dir_all(dir.join("nested/deeper")).unwrap();
        std::fs::write(dir.join("nested/deeper/task.txt"), "").unwrap();

        let result = plan_fixture(&dir);
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert_eq!(result.graph.len(), 2);

        let outer = result
            .graph
            .tasks()
            .find(|task| task.directory() == dir)
            .expect("outer task");
        assert_eq!(outer.dependencies().len(), 1);
        assert_eq!(outer.dependencies()[0].directory(), dir.join("nested/deeper"));
    }

    #[test]
    fn directories_without_a_root_contribute_nothing() {
        let (_tmp, dir) = fixture();
        std::fs::write(dir.join("task.txt"), "").unwrap();

        let result = plan_fixture(&dir);
        assert!(result.graph.is_empty());
        assert!(result.roots.is_empty());
    }

    #[test]
    fn roots_are_shared_between_their_directories() {
        let (_tmp, dir) = fixture();
        std::fs::write(dir.join("root.marker"), "").unwrap();
        std::fs::write(dir.join("task.txt"), "").unwrap();
        std::fs::create_dir_all(dir.join("sub")).unwrap();
        std::fs::write(dir.join("sub/task.txt"), "").unwrap();

        let result = plan_fixture(&dir);
        assert_eq!(result.roots.len(), 1);
        assert_eq!(result.graph.len(), 2);
        for root_dir in result.task_roots.values() {
            assert_eq!(root_dir, &dir);
        }
    }
}
