//! `fbs` is a content-addressed, parallel build engine for polyglot source
//! repositories.
//!
//! The engine discovers build units by walking a repository bottom-up,
//! assembles them into a task DAG keyed on a recursive configuration hash,
//! and executes the graph with per-task caching: a task whose published
//! directory already exists is never run again.
//!
//! The crate splits into a generic core and a language profile:
//!
//! * [`task`], [`graph`], [`runner`] — the task abstraction, the DAG
//!   container with closure hashing, and the cache-backed parallel runner.
//! * [`discover`], [`context`], [`config`] — the hierarchical discovery
//!   pipeline, the per-directory context bag and the layered
//!   `fbs.conf.json` configuration.
//! * [`kotlin`], [`gradle`] — the Kotlin/Gradle profile: source
//!   compilation, jar packaging, JUnit execution, Maven artifact
//!   resolution and Gradle build-file parsing.
//! * [`process`] — the cancellable subprocess boundary shared by all
//!   tool-invoking tasks.

pub mod config;
pub mod context;
pub mod core;
pub mod discover;
pub mod error;
pub mod gradle;
pub mod graph;
pub mod kotlin;
pub mod process;
pub mod runner;
pub mod task;
pub mod utils;

pub use crate::config::Config;
pub use crate::context::BuildContext;
pub use crate::core::{Cancellation, Hash32};
pub use crate::discover::{
    CompilationRoot, Discoverer, DiscoveryResult, Plan, StructureDiscoverer, plan,
};
pub use crate::error::{ConfigError, GraphError, PlanError, ProcessError, RunError};
pub use crate::graph::Graph;
pub use crate::runner::{ExecutionOutcome, ProgressFn, RunReport, Runner, TaskStatus};
pub use crate::task::{DependencyInput, ExecTask, Task, TaskKind, TaskPayload, TaskResult};
