//! Cache-backed task execution.
//!
//! The runner owns a single persistent result directory. Every task's
//! published directory is `<cache-root>/<closure-hash>`; a published
//! directory is write-once and never mutated, so readers need no locking.
//!
//! Execution of one task:
//! 1. Cache probe: an existing non-empty published directory is a hit and
//!    the execute operation is skipped entirely.
//! 2. Miss path: the task runs in a fresh scratch directory outside the
//!    cache, and on success the scratch contents are promoted into the
//!    cache with a file-by-file rename. A failed task leaves the cache path
//!    absent so the next run retries cleanly.
//!
//! The parallel scheduler executes the graph over a rayon worker pool: the
//! set of ready tasks (in-degree zero) is spawned onto the pool, workers
//! funnel results over a channel back to the collector, which records the
//! completion in the shared finished-map *before* unlocking dependants.
//! That write-then-enqueue order is what gives every dependency edge its
//! happens-before guarantee.

use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, RwLock};

use camino::{Utf8Path, Utf8PathBuf};
use crossbeam_channel::unbounded;
use indicatif::ProgressStyle;
use tracing::{Level, debug, span};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use walkdir::WalkDir;

use crate::core::{Cancellation, Hash32};
use crate::error::RunError;
use crate::graph::Graph;
use crate::task::{DependencyInput, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        })
    }
}

/// Invoked per task with `(task, status, finished, cache_hit)`.
pub type ProgressFn = dyn Fn(&Task, TaskStatus, bool, bool) + Send + Sync;

/// The result of executing one task, with its published location.
pub struct ExecutionOutcome {
    pub task: Arc<Task>,
    pub closure: Hash32,
    pub output_dir: Utf8PathBuf,
    pub files: Vec<Utf8PathBuf>,
    pub cache_hit: bool,
    pub failure: Option<anyhow::Error>,
}

impl ExecutionOutcome {
    pub fn is_ok(&self) -> bool {
        self.failure.is_none()
    }
}

/// Everything the runner produced before finishing or giving up.
///
/// On failure the outcomes accumulated so far are still returned; workers
/// already in flight are allowed to finish and are recorded here.
pub struct RunReport {
    pub outcomes: Vec<ExecutionOutcome>,
    pub error: Option<RunError>,
}

impl RunReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    fn failed(error: RunError) -> Self {
        Self {
            outcomes: Vec::new(),
            error: Some(error),
        }
    }
}

/// What the finished-map records per completed dependency.
#[derive(Clone)]
struct Finished {
    closure: Hash32,
    output_dir: Utf8PathBuf,
    files: Vec<Utf8PathBuf>,
}

pub struct Runner {
    cache_root: Utf8PathBuf,
}

impl Runner {
    pub fn new(cache_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
        }
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    /// Execute the whole graph. `workers <= 1` selects the sequential mode.
    pub fn run(
        &self,
        graph: &mut Graph,
        workers: usize,
        cancel: &Cancellation,
        progress: Option<&ProgressFn>,
    ) -> RunReport {
        if let Err(err) = graph.freeze() {
            return RunReport::failed(err.into());
        }

        if workers <= 1 {
            self.run_sequential(graph, cancel, progress)
        } else {
            self.run_parallel(graph, workers, cancel, progress)
        }
    }

    fn run_sequential(
        &self,
        graph: &Graph,
        cancel: &Cancellation,
        progress: Option<&ProgressFn>,
    ) -> RunReport {
        let order = match graph.topological_order() {
            Ok(order) => order,
            Err(err) => return RunReport::failed(err.into()),
        };

        let mut finished: HashMap<Hash32, Finished> = HashMap::new();
        let mut outcomes = Vec::new();
        let mut error = None;

        for task in order {
            if cancel.is_cancelled() {
                error = Some(RunError::Cancelled);
                break;
            }

            if let Some(cb) = progress {
                cb(&task, TaskStatus::Running, false, false);
            }

            let lookup = |own: &Hash32| finished.get(own).cloned();
            let outcome = match self.execute_task(&task, cancel, &lookup) {
                Ok(outcome) => outcome,
                Err(err) => {
                    error = Some(err);
                    break;
                }
            };

            if let Some(cb) = progress {
                let status = if outcome.is_ok() {
                    TaskStatus::Completed
                } else {
                    TaskStatus::Failed
                };
                cb(&task, status, true, outcome.cache_hit);
            }

            if outcome.is_ok() {
                finished.insert(
                    task.own_hash(),
                    Finished {
                        closure: outcome.closure,
                        output_dir: outcome.output_dir.clone(),
                        files: outcome.files.clone(),
                    },
                );
                outcomes.push(outcome);
            } else {
                error = Some(task_error(&task, &outcome));
                outcomes.push(outcome);
                break;
            }
        }

        RunReport { outcomes, error }
    }

    fn run_parallel(
        &self,
        graph: &Graph,
        workers: usize,
        cancel: &Cancellation,
        progress: Option<&ProgressFn>,
    ) -> RunReport {
        let tasks: Vec<Arc<Task>> = graph.tasks().cloned().collect();
        if tasks.is_empty() {
            return RunReport {
                outcomes: Vec::new(),
                error: None,
            };
        }

        // In-degree per task and the reverse adjacency, both keyed by the
        // own-hash. Dependency lists are deduplicated, so the counts are
        // exact.
        let mut counts: HashMap<Hash32, usize> = HashMap::new();
        let mut dependents: HashMap<Hash32, Vec<Hash32>> = HashMap::new();
        let mut by_own: HashMap<Hash32, Arc<Task>> = HashMap::new();

        for task in &tasks {
            let own = task.own_hash();
            let deps = task.dependencies();
            counts.insert(own, deps.len());
            for dep in deps {
                dependents.entry(dep.own_hash()).or_default().push(own);
            }
            by_own.insert(own, Arc::clone(task));
        }

        let pool = match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => pool,
            Err(err) => return RunReport::failed(err.into()),
        };

        let finished: RwLock<HashMap<Hash32, Finished>> = RwLock::new(HashMap::new());
        let (sender, receiver) = unbounded::<(Hash32, Result<ExecutionOutcome, RunError>)>();

        // Visible with RUST_LOG=info; the CLI has its own per-task lines.
        let root_span = span!(Level::INFO, "running_tasks");
        root_span.pb_set_length(tasks.len() as u64);
        root_span.pb_set_style(
            &ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .expect("progress bar template"),
        );
        root_span.pb_set_message("Running tasks...");
        let _enter = root_span.enter();

        let mut outcomes = Vec::new();
        let mut error: Option<RunError> = None;

        pool.scope(|scope| {
            let finished = &finished;
            let spawn_task = |own: Hash32| {
                let task = Arc::clone(&by_own[&own]);
                let sender = sender.clone();
                let cancel = cancel.clone();

                scope.spawn(move |_| {
                    // Workers check the cancellation signal between tasks.
                    if cancel.is_cancelled() {
                        sender.send((own, Err(RunError::Cancelled))).ok();
                        return;
                    }

                    if let Some(cb) = progress {
                        cb(&task, TaskStatus::Running, false, false);
                    }

                    let lookup = |own: &Hash32| finished.read().unwrap().get(own).cloned();
                    let result = self.execute_task(&task, &cancel, &lookup);

                    if let Some(cb) = progress {
                        match &result {
                            Ok(outcome) => {
                                let status = if outcome.is_ok() {
                                    TaskStatus::Completed
                                } else {
                                    TaskStatus::Failed
                                };
                                cb(&task, status, true, outcome.cache_hit);
                            }
                            Err(_) => cb(&task, TaskStatus::Failed, true, false),
                        }
                    }

                    sender.send((own, result)).ok();
                });
            };

            // Seed every task with no unfinished dependencies.
            let mut spawned = 0usize;
            for task in &tasks {
                let own = task.own_hash();
                if counts[&own] == 0 {
                    spawn_task(own);
                    spawned += 1;
                }
            }

            // Collector loop. Exits once everything spawned has reported;
            // after a failure or cancellation nothing new is spawned, so
            // in-flight workers drain and the loop terminates.
            let mut completed = 0usize;
            while completed < spawned {
                let (own, result) = match receiver.recv() {
                    Ok(message) => message,
                    Err(_) => break,
                };
                completed += 1;
                root_span.pb_inc(1);

                match result {
                    Err(err) => {
                        if error.is_none() {
                            error = Some(err);
                        }
                    }
                    Ok(outcome) => {
                        if outcome.is_ok() {
                            // Record under the write lock before any
                            // dependant can be enqueued.
                            finished.write().unwrap().insert(
                                own,
                                Finished {
                                    closure: outcome.closure,
                                    output_dir: outcome.output_dir.clone(),
                                    files: outcome.files.clone(),
                                },
                            );

                            let unlock = error.is_none() && !cancel.is_cancelled();
                            outcomes.push(outcome);

                            if unlock && let Some(waiting) = dependents.get(&own) {
                                for &dependant in waiting {
                                    let count = counts.get_mut(&dependant).unwrap();
                                    *count -= 1;
                                    if *count == 0 {
                                        spawn_task(dependant);
                                        spawned += 1;
                                    }
                                }
                            }
                        } else {
                            if error.is_none() {
                                error = Some(task_error(&outcome.task, &outcome));
                            }
                            outcomes.push(outcome);
                        }
                    }
                }
            }
        });

        if error.is_none() && cancel.is_cancelled() {
            error = Some(RunError::Cancelled);
        }

        RunReport { outcomes, error }
    }

    /// Cache probe, scratch execution, atomic publish — for a single task.
    fn execute_task(
        &self,
        task: &Arc<Task>,
        cancel: &Cancellation,
        lookup: &dyn Fn(&Hash32) -> Option<Finished>,
    ) -> Result<ExecutionOutcome, RunError> {
        let closure = task.closure_hash();
        let output_dir = self.cache_root.join(closure.to_hex());

        if is_nonempty_dir(&output_dir) {
            let files = collect_files(&output_dir)?;
            debug!(task = task.name(), hash = %closure, "cache hit");
            return Ok(ExecutionOutcome {
                task: Arc::clone(task),
                closure,
                output_dir,
                files,
                cache_hit: true,
                failure: None,
            });
        }

        let mut inputs = Vec::new();
        for dep in task.dependencies() {
            let done =
                lookup(&dep.own_hash()).ok_or_else(|| RunError::MissingDependency {
                    task: task.display_name(),
                    dependency: dep.display_name(),
                })?;
            inputs.push(DependencyInput {
                id: done.closure,
                output_dir: done.output_dir,
                files: done.files,
            });
        }

        // Scratch directory outside the cache; dropped (removed) whether or
        // not the task succeeds.
        let scratch = tempfile::Builder::new()
            .prefix("fbs-task-")
            .tempdir()
            .map_err(|source| RunError::Cache {
                path: self.cache_root.clone(),
                source,
            })?;
        let scratch_path = Utf8Path::from_path(scratch.path()).ok_or_else(|| RunError::Cache {
            path: self.cache_root.clone(),
            source: std::io::Error::other("scratch directory path is not valid UTF-8"),
        })?;

        let result = task.execute(scratch_path, &inputs, cancel);

        if result.is_ok() {
            fs::create_dir_all(&self.cache_root).map_err(|source| RunError::Cache {
                path: self.cache_root.clone(),
                source,
            })?;

            match fs::create_dir(&output_dir) {
                Ok(()) => move_tree(scratch_path, &output_dir)?,
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_nonempty_dir(&output_dir) {
                        // Lost a publish race with another process; the
                        // winner's directory is complete, so discard the
                        // scratch output.
                        let files = collect_files(&output_dir)?;
                        return Ok(ExecutionOutcome {
                            task: Arc::clone(task),
                            closure,
                            output_dir,
                            files,
                            cache_hit: true,
                            failure: None,
                        });
                    }
                    // An empty published directory is what tasks that emit
                    // only absolute paths leave behind; publish into it.
                    move_tree(scratch_path, &output_dir)?;
                }
                Err(source) => {
                    return Err(RunError::Cache {
                        path: output_dir,
                        source,
                    });
                }
            }
        }

        Ok(ExecutionOutcome {
            task: Arc::clone(task),
            closure,
            output_dir,
            files: result.files,
            cache_hit: false,
            failure: result.error,
        })
    }
}

fn task_error(task: &Task, outcome: &ExecutionOutcome) -> RunError {
    let message = outcome
        .failure
        .as_ref()
        .map(|err| format!("{err:#}"))
        .unwrap_or_default();
    RunError::Task {
        name: task.display_name(),
        directory: task.directory().to_owned(),
        message,
    }
}

fn is_nonempty_dir(path: &Utf8Path) -> bool {
    match fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_some(),
        Err(_) => false,
    }
}

/// Collect all file paths under `dir`, relative to it, in a stable order.
fn collect_files(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, RunError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|err| RunError::Cache {
            path: dir.to_owned(),
            source: err.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(dir.as_std_path())
            .expect("walked path is rooted at dir");
        let rel = Utf8Path::from_path(rel).ok_or_else(|| RunError::Cache {
            path: dir.to_owned(),
            source: std::io::Error::other("cached file path is not valid UTF-8"),
        })?;
        files.push(rel.to_owned());
    }

    Ok(files)
}

/// Promote scratch contents into the cache, preserving relative structure.
/// Rename is attempted first; a cross-device failure falls back to copy.
fn move_tree(src: &Utf8Path, dst: &Utf8Path) -> Result<(), RunError> {
    let cache_err = |source: std::io::Error| RunError::Cache {
        path: dst.to_owned(),
        source,
    };

    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|err| cache_err(err.into()))?;
        let rel = entry
            .path()
            .strip_prefix(src.as_std_path())
            .expect("walked path is rooted at src");
        if rel.as_os_str().is_empty() {
            continue;
        }

        let target = dst.as_std_path().join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(cache_err)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(cache_err)?;
            }
            if fs::rename(entry.path(), &target).is_err() {
                fs::copy(entry.path(), &target).map_err(cache_err)?;
                fs::remove_file(entry.path()).map_err(cache_err)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ExecTask, TaskKind, TaskPayload, TaskResult};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// A task that writes `<label>.txt` into its work directory and counts
    /// its execute invocations.
    fn file_task(label: &str, counter: &Arc<AtomicUsize>) -> Arc<Task> {
        let name = format!("{label}.txt");
        let counter = Arc::clone(counter);
        Task::new(TaskPayload::Exec(ExecTask::new(
            label,
            "/tmp/fbs-tests",
            TaskKind::Build,
            label.to_owned(),
            move |work, _inputs| {
                counter.fetch_add(1, Ordering::SeqCst);
                match fs::write(work.join(&name), b"output") {
                    Ok(()) => TaskResult::ok(vec![Utf8PathBuf::from(&name)]),
                    Err(err) => TaskResult::failed(err.into()),
                }
            },
        )))
    }

    fn chain(counter: &Arc<AtomicUsize>) -> (Graph, Vec<Arc<Task>>) {
        let a = file_task("a", counter);
        let b = file_task("b", counter);
        let c = file_task("c", counter);
        b.add_dependency(&a);
        c.add_dependency(&b);

        let mut graph = Graph::new();
        for task in [&a, &b, &c] {
            graph.insert(Arc::clone(task));
        }
        (graph, vec![a, b, c])
    }

    fn cache_entries(root: &Utf8Path) -> usize {
        fs::read_dir(root).map(|dir| dir.count()).unwrap_or(0)
    }

    #[test]
    fn linear_chain_runs_in_order() {
        let cache = tempfile::tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let (mut graph, tasks) = chain(&counter);

        let runner = Runner::new(cache.path().to_str().unwrap());
        let report = runner.run(&mut graph, 1, &Cancellation::new(), None);
        assert!(report.is_ok(), "{:?}", report.error);

        let order: Vec<&str> = report
            .outcomes
            .iter()
            .map(|outcome| outcome.task.name())
            .collect();
        assert_eq!(order, ["a", "b", "c"]);

        for (outcome, label) in report.outcomes.iter().zip(["a", "b", "c"]) {
            assert!(!outcome.cache_hit);
            assert_eq!(outcome.files, [Utf8PathBuf::from(format!("{label}.txt"))]);
            assert!(outcome.output_dir.join(format!("{label}.txt")).exists());
        }

        assert_eq!(cache_entries(Utf8Path::from_path(cache.path()).unwrap()), 3);
        assert_eq!(tasks.len(), 3);
    }

    #[test]
    fn dependants_see_published_dependency_outputs() {
        let cache = tempfile::tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let dep = file_task("dep", &counter);

        let observed: Arc<Mutex<Vec<(bool, Vec<Utf8PathBuf>)>>> =
            Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&observed);
        let main = Task::new(TaskPayload::Exec(ExecTask::new(
            "main",
            "/tmp/fbs-tests",
            TaskKind::Build,
            "main",
            move |_work, inputs| {
                let mut seen = sink.lock().unwrap();
                for input in inputs {
                    let visible = input.files.iter().all(|f| input.output_dir.join(f).exists());
                    seen.push((visible, input.files.clone()));
                }
                TaskResult::ok(vec![])
            },
        )));
        main.add_dependency(&dep);

        let mut graph = Graph::new();
        graph.insert(dep);
        graph.insert(main);

        let runner = Runner::new(cache.path().to_str().unwrap());
        let report = runner.run(&mut graph, 2, &Cancellation::new(), None);
        assert!(report.is_ok(), "{:?}", report.error);

        let seen = observed.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].0, "dependency output not visible on disk");
        assert_eq!(seen[0].1, [Utf8PathBuf::from("dep.txt")]);
    }

    #[test]
    fn second_run_is_all_cache_hits() {
        let cache = tempfile::tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let (mut graph, _tasks) = chain(&counter);

        let runner = Runner::new(cache.path().to_str().unwrap());
        let first = runner.run(&mut graph, 1, &Cancellation::new(), None);
        assert!(first.is_ok());
        assert!(first.outcomes.iter().all(|outcome| !outcome.cache_hit));

        let second = runner.run(&mut graph, 1, &Cancellation::new(), None);
        assert!(second.is_ok());
        assert!(second.outcomes.iter().all(|outcome| outcome.cache_hit));

        // The user-provided execute ran exactly once per task in total.
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn cyclic_graph_refuses_to_run() {
        let cache = tempfile::tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let a = file_task("a", &counter);
        let b = file_task("b", &counter);
        a.add_dependency(&b);
        b.add_dependency(&a);

        let mut graph = Graph::new();
        graph.insert(a);
        graph.insert(b);

        let runner = Runner::new(cache.path().to_str().unwrap());
        let report = runner.run(&mut graph, 1, &Cancellation::new(), None);
        let error = report.error.expect("cycle must fail the run");
        assert!(error.to_string().contains("cycle"));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn parallel_execution_respects_worker_limit() {
        let cache = tempfile::tempdir().unwrap();
        let current = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let counters: Vec<Arc<AtomicUsize>> =
            (0..10).map(|_| Arc::new(AtomicUsize::new(0))).collect();

        let mut graph = Graph::new();
        for (i, counter) in counters.iter().enumerate() {
            let current = Arc::clone(&current);
            let max_seen = Arc::clone(&max_seen);
            let counter = Arc::clone(counter);
            let task = Task::new(TaskPayload::Exec(ExecTask::new(
                format!("task-{i}"),
                "/tmp/fbs-tests",
                TaskKind::Build,
                format!("seed-{i}"),
                move |work, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    current.fetch_sub(1, Ordering::SeqCst);
                    match fs::write(work.join("out.txt"), b"x") {
                        Ok(()) => TaskResult::ok(vec![Utf8PathBuf::from("out.txt")]),
                        Err(err) => TaskResult::failed(err.into()),
                    }
                },
            )));
            graph.insert(task);
        }

        let runner = Runner::new(cache.path().to_str().unwrap());
        let report = runner.run(&mut graph, 4, &Cancellation::new(), None);
        assert!(report.is_ok(), "{:?}", report.error);
        assert_eq!(report.outcomes.len(), 10);
        assert!(max_seen.load(Ordering::SeqCst) <= 4);
        for counter in counters {
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn failure_stops_downstream_tasks() {
        let cache = tempfile::tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let a = file_task("a", &counter);
        let b = Task::new(TaskPayload::Exec(ExecTask::new(
            "b",
            "/tmp/fbs-tests",
            TaskKind::Build,
            "b",
            |_, _| TaskResult::failed(anyhow::anyhow!("boom")),
        )));
        let c_counter = Arc::new(AtomicUsize::new(0));
        let c = file_task("c", &c_counter);
        b.add_dependency(&a);
        c.add_dependency(&b);

        let mut graph = Graph::new();
        for task in [&a, &b, &c] {
            graph.insert(Arc::clone(task));
        }

        let runner = Runner::new(cache.path().to_str().unwrap());
        let report = runner.run(&mut graph, 2, &Cancellation::new(), None);

        let error = report.error.expect("failing task must fail the run");
        assert!(error.to_string().contains('b'));
        // A succeeded and was cached; C never ran.
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(c_counter.load(Ordering::SeqCst), 0);
        assert_eq!(cache_entries(Utf8Path::from_path(cache.path()).unwrap()), 1);
    }

    #[test]
    fn cancelled_run_starts_nothing() {
        let cache = tempfile::tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let (mut graph, _tasks) = chain(&counter);

        let cancel = Cancellation::new();
        cancel.cancel();

        let runner = Runner::new(cache.path().to_str().unwrap());
        let report = runner.run(&mut graph, 2, &cancel, None);
        assert!(matches!(report.error, Some(RunError::Cancelled)));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_task_leaves_cache_path_absent() {
        let cache = tempfile::tempdir().unwrap();
        let failing = Task::new(TaskPayload::Exec(ExecTask::new(
            "failing",
            "/tmp/fbs-tests",
            TaskKind::Build,
            "failing",
            |_, _| TaskResult::failed(anyhow::anyhow!("no output")),
        )));
        let hash = {
            let mut graph = Graph::new();
            graph.insert(Arc::clone(&failing));

            let runner = Runner::new(cache.path().to_str().unwrap());
            let report = runner.run(&mut graph, 1, &Cancellation::new(), None);
            assert!(report.error.is_some());
            failing.closure_hash()
        };

        assert!(!cache.path().join(hash.to_hex()).exists());
    }
}
