//! The task abstraction shared by the whole engine.
//!
//! A [`Task`] is a unit of work with a stable content-addressed identity.
//! The engine never inspects task-specific state; all variability lives
//! behind [`TaskPayload`], a closed sum over the supported task kinds, so
//! stitching logic can match on variants exhaustively instead of downcasting.
//!
//! Identity is layered:
//! * the *own-hash* is a pure function of the payload's configuration and
//!   the mtimes of its declared input files,
//! * the *closure-hash* additionally folds in the sorted closure-hashes of
//!   all dependencies and is the identity used for scheduling and caching.
//!
//! Dependency lists are appended during discovery and must be frozen before
//! scheduling; the closure-hash is memoised the first time it is computed.

use std::sync::{Arc, OnceLock, RwLock};

use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest, Sha256};

use crate::core::{Cancellation, Hash32};
use crate::gradle::{ArtifactDownload, JarPackage};
use crate::kotlin::{JunitTest, KotlinCompile};

/// The coarse classification used by the CLI filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Build,
    Test,
    Deps,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TaskKind::Build => "build",
            TaskKind::Test => "test",
            TaskKind::Deps => "deps",
        })
    }
}

/// What a running task gets to know about each completed dependency.
///
/// The runner guarantees that `output_dir` exists on disk, with `files`
/// materialised beneath it, before the dependant's execute is invoked.
#[derive(Debug, Clone)]
pub struct DependencyInput {
    /// Closure-hash of the dependency.
    pub id: Hash32,
    /// The dependency's published directory in the cache.
    pub output_dir: Utf8PathBuf,
    /// Relative paths of the files the dependency emitted. Tasks that
    /// publish into shared caches (artifact downloads, jars) report
    /// absolute paths instead; consumers handle both.
    pub files: Vec<Utf8PathBuf>,
}

/// The values a task returns from its execute operation.
///
/// Failure to produce output is carried here, not raised: the runner decides
/// what to do with it. Emitting no files with no failure is a legal
/// "nothing to publish" result.
pub struct TaskResult {
    pub files: Vec<Utf8PathBuf>,
    pub error: Option<anyhow::Error>,
}

impl TaskResult {
    pub fn ok(files: Vec<Utf8PathBuf>) -> Self {
        Self { files, error: None }
    }

    pub fn failed(error: anyhow::Error) -> Self {
        Self {
            files: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl From<anyhow::Result<Vec<Utf8PathBuf>>> for TaskResult {
    fn from(value: anyhow::Result<Vec<Utf8PathBuf>>) -> Self {
        match value {
            Ok(files) => TaskResult::ok(files),
            Err(error) => TaskResult::failed(error),
        }
    }
}

/// The closed set of task kinds the engine knows how to run.
pub enum TaskPayload {
    KotlinCompile(KotlinCompile),
    Jar(JarPackage),
    Junit(JunitTest),
    Artifact(ArtifactDownload),
    /// A programmable task driven by a plain closure. The engine's own test
    /// suite is built on this variant; it is also the extension point for
    /// embedders that need one-off tasks without a dedicated payload.
    Exec(ExecTask),
}

type ExecFn = dyn Fn(&Utf8Path, &[DependencyInput]) -> TaskResult + Send + Sync;

/// See [`TaskPayload::Exec`].
pub struct ExecTask {
    label: String,
    directory: Utf8PathBuf,
    kind: TaskKind,
    /// Opaque configuration material folded into the own-hash.
    seed: String,
    /// Input files whose mtimes participate in the own-hash.
    inputs: Vec<Utf8PathBuf>,
    run: Box<ExecFn>,
}

impl ExecTask {
    pub fn new(
        label: impl Into<String>,
        directory: impl Into<Utf8PathBuf>,
        kind: TaskKind,
        seed: impl Into<String>,
        run: impl Fn(&Utf8Path, &[DependencyInput]) -> TaskResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            directory: directory.into(),
            kind,
            seed: seed.into(),
            inputs: Vec::new(),
            run: Box::new(run),
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<Utf8PathBuf>) -> Self {
        self.inputs = inputs;
        self
    }

    fn write_own(&self, hasher: &mut Sha256) {
        hasher.update(b"exec\0");
        hasher.update(self.label.as_bytes());
        hasher.update([0]);
        hasher.update(self.directory.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(self.seed.as_bytes());
        hasher.update([0]);
        for input in &self.inputs {
            hasher.update(input.as_str().as_bytes());
            write_input_mtime(hasher, &self.directory.join(input));
        }
    }
}

/// Feed the decimal mtime of `path` (or an `absent` marker) into the hasher.
///
/// Missing input files never fail hashing. The hash deliberately does not
/// cover file contents; mtime precision is the staleness oracle in exchange
/// for fast planning.
pub(crate) fn write_input_mtime(hasher: &mut Sha256, path: &Utf8Path) {
    let mtime = std::fs::metadata(path.as_std_path()).and_then(|meta| meta.modified());

    match mtime {
        Ok(mtime) => {
            let secs = mtime
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            hasher.update(secs.to_string().as_bytes());
        }
        Err(_) => hasher.update(b"absent"),
    }
    hasher.update([0]);
}

/// A unit of work in the build graph.
pub struct Task {
    payload: TaskPayload,
    dependencies: RwLock<Vec<Arc<Task>>>,
    own: OnceLock<Hash32>,
    closure: OnceLock<Hash32>,
}

impl Task {
    pub fn new(payload: TaskPayload) -> Arc<Self> {
        Arc::new(Self {
            payload,
            dependencies: RwLock::new(Vec::new()),
            own: OnceLock::new(),
            closure: OnceLock::new(),
        })
    }

    /// The task-kind label.
    pub fn name(&self) -> &str {
        match &self.payload {
            TaskPayload::KotlinCompile(_) => "kotlin-compile",
            TaskPayload::Jar(_) => "jar-compile",
            TaskPayload::Junit(_) => "junit-test",
            TaskPayload::Artifact(_) => "artifact-download",
            TaskPayload::Exec(task) => &task.label,
        }
    }

    /// A human-oriented name carrying the distinguishing detail.
    pub fn display_name(&self) -> String {
        match &self.payload {
            TaskPayload::Junit(task) => format!("junit-test ({})", task.test_file()),
            TaskPayload::Artifact(task) => format!("artifact-download ({})", task.coordinate()),
            _ => self.name().to_owned(),
        }
    }

    pub fn kind(&self) -> TaskKind {
        match &self.payload {
            TaskPayload::KotlinCompile(_) | TaskPayload::Jar(_) => TaskKind::Build,
            TaskPayload::Junit(_) => TaskKind::Test,
            TaskPayload::Artifact(_) => TaskKind::Deps,
            TaskPayload::Exec(task) => task.kind,
        }
    }

    /// The logical origin directory of the task.
    pub fn directory(&self) -> &Utf8Path {
        match &self.payload {
            TaskPayload::KotlinCompile(task) => task.source_dir(),
            TaskPayload::Jar(task) => task.project_dir(),
            TaskPayload::Junit(task) => task.source_dir(),
            TaskPayload::Artifact(task) => task.cache_dir(),
            TaskPayload::Exec(task) => &task.directory,
        }
    }

    pub fn payload(&self) -> &TaskPayload {
        &self.payload
    }

    /// Snapshot of the current dependency list.
    pub fn dependencies(&self) -> Vec<Arc<Task>> {
        self.dependencies.read().unwrap().clone()
    }

    /// Append a dependency edge, skipping duplicates.
    ///
    /// Edges may only be appended during discovery; once the closure-hash
    /// has been memoised the list is frozen.
    pub fn add_dependency(&self, dependency: &Arc<Task>) {
        debug_assert!(
            self.closure.get().is_none(),
            "dependency list mutated after freeze"
        );

        let mut deps = self.dependencies.write().unwrap();
        let own = dependency.own_hash();
        if deps.iter().any(|dep| dep.own_hash() == own) {
            return;
        }
        deps.push(Arc::clone(dependency));
    }

    pub fn has_dependency(&self, dependency: &Task) -> bool {
        let own = dependency.own_hash();
        self.dependencies
            .read()
            .unwrap()
            .iter()
            .any(|dep| dep.own_hash() == own)
    }

    /// The hash over the task's own configuration and input mtimes.
    ///
    /// Pure function of configuration plus input mtimes; memoised so the
    /// value stays stable for the lifetime of the process.
    pub fn own_hash(&self) -> Hash32 {
        *self.own.get_or_init(|| {
            let mut hasher = Sha256::new();
            match &self.payload {
                TaskPayload::KotlinCompile(task) => task.write_own(&mut hasher),
                TaskPayload::Jar(task) => task.write_own(&mut hasher),
                TaskPayload::Junit(task) => task.write_own(&mut hasher),
                TaskPayload::Artifact(task) => task.write_own(&mut hasher),
                TaskPayload::Exec(task) => task.write_own(&mut hasher),
            }
            Hash32::finalize(hasher)
        })
    }

    /// The task's identity: sha-256 over the own-hash and the sorted
    /// closure-hashes of all dependencies.
    ///
    /// Sorting makes the identity invariant under dependency-list order.
    /// Memoised; recursion over a dependency cycle never terminates, so the
    /// graph must be checked for cycles before the first call.
    pub fn closure_hash(&self) -> Hash32 {
        *self.closure.get_or_init(|| {
            let mut hasher = Sha256::new();
            hasher.update(self.own_hash().to_hex().as_bytes());

            let mut dep_hashes: Vec<String> = self
                .dependencies()
                .iter()
                .map(|dep| dep.closure_hash().to_hex())
                .collect();
            dep_hashes.sort();

            for hex in dep_hashes {
                hasher.update(hex.as_bytes());
            }

            Hash32::finalize(hasher)
        })
    }

    /// Whether the closure-hash has been memoised (the dependency list is
    /// frozen).
    pub fn is_frozen(&self) -> bool {
        self.closure.get().is_some()
    }

    /// Run the task in `work_dir`. Task-level failures are carried inside
    /// the result, never raised.
    pub fn execute(
        &self,
        work_dir: &Utf8Path,
        inputs: &[DependencyInput],
        cancel: &Cancellation,
    ) -> TaskResult {
        match &self.payload {
            TaskPayload::KotlinCompile(task) => task.execute(work_dir, inputs, cancel),
            TaskPayload::Jar(task) => task.execute(work_dir, inputs, cancel),
            TaskPayload::Junit(task) => task.execute(work_dir, inputs, cancel),
            TaskPayload::Artifact(task) => task.execute(work_dir, inputs, cancel),
            TaskPayload::Exec(task) => (task.run)(work_dir, inputs),
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("directory", &self.directory())
            .field("dependencies", &self.dependencies.read().unwrap().len())
            .finish()
    }
}
