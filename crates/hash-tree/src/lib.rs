//! Merkle-style content-addressed resource indices.
//!
//! A [`HashTree`] indexes a set of resources under a filesystem-like
//! namespace; its root hash is the *index signature*. Trees derived from
//! one another share untouched subtrees by reference (copy-on-write), and a
//! [`TreeRegistry`] coordinates batched mutations across every tree that
//! shares nodes, committing them in a single consistent bottom-up
//! recompute. The [`ResourceIndex`] facade is what the cache layers hold on
//! to: a `(registry, tree)` handle.

use thiserror::Error;

pub mod index;
pub mod node;
pub mod registry;
pub mod tree;

pub use index::{RegistryId, RegistrySet, ResourceIndex};
pub use node::{DirectoryNode, ResourceNode, TreeNode};
pub use registry::{FlushSummary, TreeId, TreeRegistry};
pub use tree::{
    normalize_virtual_path, ChangeLists, HashTree, HashTreeJson, TreeNodeJson,
};

/// Errors of the hash-tree subsystem.
#[derive(Error, Debug)]
pub enum Error {
    /// A path collides with an existing node of a different type.
    #[error("Tree structure violation at '{path}': {message}")]
    TreeStructure { path: String, message: String },

    /// A resource's integrity could not be obtained.
    #[error("Resource unavailable: '{path}'")]
    ResourceUnavailable { path: String },

    #[error("Unknown tree id {0}")]
    UnknownTree(u32),

    #[error("Unknown registry id {0}")]
    UnknownRegistry(usize),

    #[error("Tree serialization error: {0}")]
    Serialization(String),
}

impl Error {
    pub(crate) fn structure(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::TreeStructure {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for hash-tree operations.
pub type Result<T> = std::result::Result<T, Error>;
