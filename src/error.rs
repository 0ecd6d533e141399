use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised by the graph container itself.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("cycle detected in task graph")]
    Cycle,

    #[error("dependency '{dependency}' of task '{task}' is not present in the graph")]
    MissingDependency { task: String, dependency: String },

    #[error("two distinct tasks share the closure hash {0}")]
    DuplicateClosure(String),
}

/// Errors produced while loading and merging `fbs.conf.json` files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("couldn't read config file {path}:\n{source}")]
    Read {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("couldn't parse config file {path}:\n{source}")]
    Parse {
        path: Utf8PathBuf,
        source: serde_json::Error,
    },
}

/// Non-fatal errors accumulated during planning. The walk continues past
/// every one of these; the offending task is simply absent from the graph.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("error accessing {path}:\n{source}")]
    Walk {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("path is not valid UTF-8: {0}")]
    NonUtf8Path(std::path::PathBuf),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("structure discoverer '{name}' failed on {dir}:\n{source}")]
    Structure {
        name: &'static str,
        dir: Utf8PathBuf,
        source: anyhow::Error,
    },

    #[error("discoverer '{name}' failed on {dir}:\n{source}")]
    Discoverer {
        name: &'static str,
        dir: Utf8PathBuf,
        source: anyhow::Error,
    },

    #[error("failed to resolve project dependencies for {root}:\n{source}")]
    Resolve {
        root: Utf8PathBuf,
        source: anyhow::Error,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Fatal errors raised by the runner. Task-level failures are carried inside
/// [`crate::task::TaskResult`]; these short-circuit the whole run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("failed to build the worker pool:\n{0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("cache i/o failure at {path}:\n{source}")]
    Cache {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("dependency '{dependency}' of task '{task}' has no recorded result")]
    MissingDependency { task: String, dependency: String },

    #[error("task '{name}' ({directory}) failed:\n{message}")]
    Task {
        name: String,
        directory: Utf8PathBuf,
        message: String,
    },

    #[error("run cancelled")]
    Cancelled,
}

/// Errors from the external-process boundary.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("couldn't spawn '{program}':\n{source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}\n{output}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        output: String,
    },

    #[error("'{program}' was cancelled")]
    Cancelled { program: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
