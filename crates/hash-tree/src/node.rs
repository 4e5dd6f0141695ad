//! Tree nodes.
//!
//! Nodes are immutable once built and shared between trees through `Arc`
//! handles; mutation always rebuilds the spine of changed directories and
//! aliases everything untouched. Structural-sharing guarantees are therefore
//! expressed as pointer identity.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use uibuild_core::ResourceMetadata;

/// A node in a hash tree: either a directory or a resource leaf.
#[derive(Debug, Clone)]
pub enum TreeNode {
    Directory(Arc<DirectoryNode>),
    Resource(Arc<ResourceNode>),
}

impl TreeNode {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            TreeNode::Directory(d) => &d.name,
            TreeNode::Resource(r) => &r.name,
        }
    }

    #[must_use]
    pub fn hash(&self) -> &str {
        match self {
            TreeNode::Directory(d) => &d.hash,
            TreeNode::Resource(r) => &r.hash,
        }
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        matches!(self, TreeNode::Directory(_))
    }

    /// Object identity: do both handles point at the same node?
    #[must_use]
    pub fn ptr_eq(&self, other: &TreeNode) -> bool {
        match (self, other) {
            (TreeNode::Directory(a), TreeNode::Directory(b)) => Arc::ptr_eq(a, b),
            (TreeNode::Resource(a), TreeNode::Resource(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// An inner directory node with a cached hash over its children.
#[derive(Debug)]
pub struct DirectoryNode {
    pub(crate) name: String,
    pub(crate) children: BTreeMap<String, TreeNode>,
    pub(crate) hash: String,
}

impl DirectoryNode {
    /// Build a directory node, computing its hash from the children.
    #[must_use]
    pub fn new(name: impl Into<String>, children: BTreeMap<String, TreeNode>) -> Arc<Self> {
        let hash = hash_directory(&children);
        Arc::new(Self {
            name: name.into(),
            children,
            hash,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    #[must_use]
    pub fn children(&self) -> &BTreeMap<String, TreeNode> {
        &self.children
    }

    #[must_use]
    pub fn child(&self, name: &str) -> Option<&TreeNode> {
        self.children.get(name)
    }
}

/// A resource leaf carrying the identity-relevant metadata.
#[derive(Debug)]
pub struct ResourceNode {
    pub(crate) name: String,
    pub(crate) metadata: ResourceMetadata,
    pub(crate) hash: String,
}

impl ResourceNode {
    #[must_use]
    pub fn new(metadata: ResourceMetadata) -> Arc<Self> {
        let hash = hash_resource(&metadata.integrity, metadata.size);
        Arc::new(Self {
            name: metadata.name().to_string(),
            metadata,
            hash,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn metadata(&self) -> &ResourceMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

/// Hash of a resource leaf.
///
/// Only the content hash and size contribute: last-modified and inode feed
/// the racy-update defence, never the signature, so rebuilding an identical
/// resource set always reproduces the same root hash.
#[must_use]
pub fn hash_resource(integrity: &str, size: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"resource\0");
    hasher.update(integrity.as_bytes());
    hasher.update(b"\0");
    hasher.update(size.to_be_bytes());
    hex::encode(hasher.finalize())
}

/// Hash of a directory: a digest over `(name, child hash)` pairs sorted by
/// name. The `BTreeMap` guarantees the ordering.
#[must_use]
pub fn hash_directory(children: &BTreeMap<String, TreeNode>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"directory\0");
    for (name, child) in children {
        hasher.update(name.as_bytes());
        hasher.update(b"\0");
        hasher.update(child.hash().as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
