//! The build server: lazily builds projects on first resource access,
//! coalesces concurrent build requests into single batches, and watches
//! project sources with a debounced invalidation stream.

use thiserror::Error;

pub mod event;
pub mod reader;
pub mod server;
pub mod watcher;

pub use event::ServerEvent;
pub use reader::{BuildReader, ReaderScope};
pub use server::BuildServer;
pub use watcher::SourceWatcher;

/// Errors of the build server.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Unknown project '{0}'")]
    UnknownProject(String),

    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Build(#[from] uibuild_build::Error),

    #[error(transparent)]
    Core(#[from] uibuild_core::Error),
}

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, Error>;
