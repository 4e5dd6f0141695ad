//! The incremental build cache.
//!
//! Per task execution this crate records which resources were read (through
//! a [`ResourceRequestManager`] per side), binds every request set to a
//! Merkle resource index, and composes the resulting index signatures into
//! cache keys under a project's build signature. On later builds it decides
//! per task whether cached outputs are still valid, whether a task can run
//! differentially over the changed paths only, or whether it must rebuild.

use thiserror::Error;

pub mod manager;
pub mod manifest;
pub mod project;
pub mod signature;
pub mod task;

pub use manager::{Delta, ManagerCache, RecordedSet, ResourceRequestManager, NO_REQUESTS_SIGNATURE};
pub use manifest::{BuildManifest, RecordedEntry, TaskCacheObject, TaskManifest, MANIFEST_VERSION};
pub use project::{CacheInfo, ProjectBuildCache, TaskCacheDecision};
pub use signature::{compute_build_signature, stable_json, BuildSignatureInputs, SCHEMA_VERSION};
pub use task::{BuildTaskCache, TaskSignatures};

/// Errors of the build-cache subsystem.
#[derive(Error, Debug)]
pub enum Error {
    /// A request-set node lacks its bound resource index.
    #[error("Missing resource index for request set {node}")]
    MissingResourceIndex { node: u32 },

    /// A restored delta node references a parent whose registry is gone.
    #[error("Missing registry for request set {node}")]
    MissingRegistry { node: u32 },

    #[error("Unsupported build manifest version {found} (supported: {supported})")]
    UnsupportedManifestVersion { found: u32, supported: u32 },

    /// The persisted cache for this build signature is unusable.
    #[error("Cache corruption: {0}")]
    Corruption(String),

    #[error(transparent)]
    Tree(#[from] uibuild_hash_tree::Error),

    #[error(transparent)]
    Graph(#[from] uibuild_request_graph::Error),

    #[error(transparent)]
    Store(#[from] uibuild_cas::Error),

    #[error(transparent)]
    Core(#[from] uibuild_core::Error),
}

impl Error {
    /// Is this one of the fatal cache-corruption cases that force a full
    /// rebuild with a discarded cache?
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::MissingResourceIndex { .. }
                | Error::MissingRegistry { .. }
                | Error::UnsupportedManifestVersion { .. }
                | Error::Corruption(_)
        )
    }
}

/// Result type alias for build-cache operations.
pub type Result<T> = std::result::Result<T, Error>;
