//! Core types for the uibuild ecosystem.
//!
//! This crate carries the vocabulary the build cache is built from:
//!
//! - [`Resource`]: a lazily hashed unit of content in a virtual filesystem
//! - [`Reader`]: the async read contract (`by_path` / `by_glob`) plus the
//!   in-memory and overlay implementations
//! - [`ResourceRequest`]: the canonical identity of a read a task issued
//! - [`Project`] and [`ProjectGraph`]: the read-only inter-project model
//! - [`BuildConfiguration`]: the serialisable settings that participate in
//!   the build signature

use std::path::Path;
use thiserror::Error;

pub mod config;
pub mod paths;
pub mod project;
pub mod reader;
pub mod request;
pub mod resource;

pub use config::{BuildConfiguration, CacheMode};
pub use project::{CustomTaskDef, ExtensionRef, Project, ProjectGraph, ProjectKind};
pub use reader::{CombinedReader, MemoryReader, Reader};
pub use request::{RequestRecording, RequestSide, ResourceRequest};
pub use resource::{Resource, ResourceMetadata};

/// Main error type for uibuild core operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error during {operation} on {}: {source}", path.display())]
    Io {
        source: std::io::Error,
        path: Box<Path>,
        operation: String,
    },

    #[error("Invalid glob pattern '{pattern}': {message}")]
    InvalidGlob { pattern: String, message: String },

    #[error("Unknown project '{0}'")]
    UnknownProject(String),

    #[error("Missing project dependencies: {missing:?}")]
    MissingDependencies { missing: Vec<(String, String)> },

    #[error("Project dependency graph contains cycles")]
    CycleDetected,
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub fn io(source: std::io::Error, path: &Path, operation: impl Into<String>) -> Self {
        Error::Io {
            source,
            path: path.into(),
            operation: operation.into(),
        }
    }

    pub fn invalid_glob(pattern: impl Into<String>, message: impl ToString) -> Self {
        Error::InvalidGlob {
            pattern: pattern.into(),
            message: message.to_string(),
        }
    }
}

/// Result type alias for uibuild core operations.
pub type Result<T> = std::result::Result<T, Error>;
