//! Task composition and execution.
//!
//! Composes the ordered task list of a project from its type-specific
//! standard definition plus custom-task insertion, drives per-task
//! execution with monitored readers feeding the build cache, and
//! orchestrates multi-project builds with cross-project change
//! propagation.

use thiserror::Error;

pub mod builder;
pub mod definitions;
pub mod monitor;
pub mod runner;
pub mod standard;
pub mod task;

pub use builder::{BuildRequest, BuildSummary, Builder};
pub use definitions::{compose_task_list, standard_tasks, TaskSpec};
pub use monitor::MonitoredReader;
pub use runner::{TaskRunOutcome, TaskRunner};
pub use standard::standard_registry;
pub use task::{BuildTask, ProjectStage, TaskContext, TaskError, TaskRegistry};

/// Errors of the build subsystem.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid task definition; fatal before any task runs.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A task body failed; downstream tasks are not attempted.
    #[error("Task '{task}' failed: {message}")]
    TaskExecutionFailed { task: String, message: String },

    /// Cooperative cancellation between tasks.
    #[error("Build aborted")]
    BuildAborted,

    #[error(transparent)]
    Cache(#[from] uibuild_cache::Error),

    #[error(transparent)]
    Core(#[from] uibuild_core::Error),
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }
}

/// Result type alias for build operations.
pub type Result<T> = std::result::Result<T, Error>;
