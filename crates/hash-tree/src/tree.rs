//! The hash tree: a Merkle index over a filesystem-like resource namespace.
//!
//! The root hash is the *index signature*: it covers content hashes and
//! sizes only, so rebuilding a tree over identical content always yields the
//! same signature regardless of insertion order, modification times or
//! inode churn.

use crate::node::{DirectoryNode, ResourceNode, TreeNode};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uibuild_core::{Resource, ResourceMetadata};

/// Bounded fan-out used when resolving resource integrities.
const INTEGRITY_CONCURRENCY: usize = 8;

/// Canonical form of a virtual path: leading slash, single separators.
#[must_use]
pub fn normalize_virtual_path(path: &str) -> String {
    let joined = path
        .split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    format!("/{joined}")
}

fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// The racy-update defence: a stored node counts as unchanged only when its
/// content hash and size match *and* its stored modification time is either
/// strictly older than the index timestamp or identical to the incoming
/// one. A node last modified at the index timestamp itself is suspect: two
/// writes within one timestamp-resolution window would otherwise go
/// unnoticed.
#[must_use]
pub fn is_unchanged(
    stored: &ResourceMetadata,
    incoming: &ResourceMetadata,
    index_timestamp: DateTime<Utc>,
) -> bool {
    stored.integrity == incoming.integrity
        && stored.size == incoming.size
        && (stored.last_modified < index_timestamp
            || stored.last_modified == incoming.last_modified)
}

/// One scheduled leaf operation.
#[derive(Debug, Clone)]
pub(crate) enum LeafOp {
    Upsert(ResourceMetadata),
    Remove,
    /// An upsert that was superseded by a removal within the same batch:
    /// physically a no-op for absent paths, reported as added + removed.
    UpsertThenRemove,
}

/// A batch of leaf operations arranged as a path trie.
#[derive(Debug, Default)]
pub(crate) struct MutationSet {
    root: MutationNode,
}

#[derive(Debug, Default)]
struct MutationNode {
    children: BTreeMap<String, MutationNode>,
    leaf: Option<(String, LeafOp)>,
}

impl MutationSet {
    pub(crate) fn insert(&mut self, path: &str, op: LeafOp) -> Result<()> {
        let normalized = normalize_virtual_path(path);
        let segments = split_segments(&normalized);
        if segments.is_empty() {
            return Err(Error::structure(path, "empty path"));
        }
        let mut node = &mut self.root;
        for segment in &segments[..segments.len() - 1] {
            if node.leaf.is_some() {
                return Err(Error::structure(path, "ancestor scheduled as a resource"));
            }
            node = node.children.entry((*segment).to_string()).or_default();
        }
        if node.leaf.is_some() {
            return Err(Error::structure(path, "ancestor scheduled as a resource"));
        }
        let last = (*segments.last().unwrap_or(&"")).to_string();
        let child = node.children.entry(last).or_default();
        if !child.children.is_empty() {
            return Err(Error::structure(path, "descendant scheduled below a resource"));
        }
        child.leaf = Some((normalized, op));
        Ok(())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }
}

impl MutationNode {
    fn first_upsert_path(&self) -> Option<&str> {
        if let Some((path, LeafOp::Upsert(_))) = &self.leaf {
            return Some(path);
        }
        self.children
            .values()
            .find_map(|child| child.first_upsert_path())
    }

    /// Report tombstones in a subtree that has no backing directory.
    fn report_orphan_tombstones(&self, changes: &mut ChangeLists) {
        if let Some((path, LeafOp::UpsertThenRemove)) = &self.leaf {
            changes.added.push(path.clone());
            changes.removed.push(path.clone());
        }
        for child in self.children.values() {
            child.report_orphan_tombstones(changes);
        }
    }
}

/// The four outcome lists of a batched mutation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeLists {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    pub removed: Vec<String>,
}

impl ChangeLists {
    /// Did any mutation physically change a tree?
    #[must_use]
    pub fn mutated(&self) -> bool {
        !self.added.is_empty() || !self.updated.is_empty() || !self.removed.is_empty()
    }

    pub fn merge(&mut self, other: &ChangeLists) {
        self.added.extend_from_slice(&other.added);
        self.updated.extend_from_slice(&other.updated);
        self.unchanged.extend_from_slice(&other.unchanged);
        self.removed.extend_from_slice(&other.removed);
    }

    pub(crate) fn sort_dedup(&mut self) {
        for list in [
            &mut self.added,
            &mut self.updated,
            &mut self.unchanged,
            &mut self.removed,
        ] {
            list.sort();
            list.dedup();
        }
    }
}

/// A Merkle tree over a set of resources.
#[derive(Debug, Clone)]
pub struct HashTree {
    root: Arc<DirectoryNode>,
    index_timestamp: DateTime<Utc>,
}

impl HashTree {
    /// An empty tree.
    #[must_use]
    pub fn empty(index_timestamp: DateTime<Utc>) -> Self {
        Self {
            root: DirectoryNode::new("", BTreeMap::new()),
            index_timestamp,
        }
    }

    /// Build a tree from live resources, hashing contents bottom-up with
    /// bounded fan-out.
    pub async fn from_resources(
        resources: Vec<Arc<Resource>>,
        index_timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        let metadata = resolve_metadata(resources).await?;
        Self::from_metadata(metadata, index_timestamp)
    }

    /// Build a tree from already resolved metadata.
    pub fn from_metadata(
        entries: Vec<ResourceMetadata>,
        index_timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        let mut tree = Self::empty(index_timestamp);
        tree.upsert_metadata(entries, index_timestamp)?;
        Ok(tree)
    }

    #[must_use]
    pub fn root(&self) -> &Arc<DirectoryNode> {
        &self.root
    }

    #[must_use]
    pub fn index_timestamp(&self) -> DateTime<Utc> {
        self.index_timestamp
    }

    /// The index signature.
    #[must_use]
    pub fn root_hash(&self) -> String {
        self.root.hash().to_string()
    }

    #[must_use]
    pub fn has_path(&self, path: &str) -> bool {
        self.node_by_path(path).is_some()
    }

    /// Look up a node by virtual path.
    #[must_use]
    pub fn node_by_path(&self, path: &str) -> Option<TreeNode> {
        let segments = split_segments(path);
        let mut current = TreeNode::Directory(Arc::clone(&self.root));
        for segment in segments {
            let TreeNode::Directory(dir) = current else {
                return None;
            };
            current = dir.child(segment)?.clone();
        }
        Some(current)
    }

    #[must_use]
    pub fn resource_by_path(&self, path: &str) -> Option<ResourceMetadata> {
        match self.node_by_path(path)? {
            TreeNode::Resource(node) => Some(node.metadata().clone()),
            TreeNode::Directory(_) => None,
        }
    }

    /// All resource paths in the tree, sorted.
    #[must_use]
    pub fn resource_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        collect_paths(&self.root, &mut paths);
        paths
    }

    /// Insert or replace resources. Unchanged resources (racy-update
    /// defence) are skipped. The timestamp is stamped only when a mutation
    /// actually happened.
    pub fn upsert_metadata(
        &mut self,
        entries: Vec<ResourceMetadata>,
        new_index_timestamp: DateTime<Utc>,
    ) -> Result<ChangeLists> {
        let mut mutations = MutationSet::default();
        for mut entry in entries {
            entry.path = normalize_virtual_path(&entry.path);
            let path = entry.path.clone();
            mutations.insert(&path, LeafOp::Upsert(entry))?;
        }
        self.apply(&mutations, new_index_timestamp)
    }

    /// Insert or replace live resources.
    pub async fn upsert_resources(
        &mut self,
        resources: Vec<Arc<Resource>>,
        new_index_timestamp: DateTime<Utc>,
    ) -> Result<ChangeLists> {
        let metadata = resolve_metadata(resources).await?;
        self.upsert_metadata(metadata, new_index_timestamp)
    }

    /// Delete resources; empty ancestor directories are pruned bottom-up.
    /// Removing a missing path is a no-op.
    pub fn remove_resources(
        &mut self,
        paths: &[String],
        new_index_timestamp: DateTime<Utc>,
    ) -> Result<ChangeLists> {
        let mut mutations = MutationSet::default();
        for path in paths {
            mutations.insert(path, LeafOp::Remove)?;
        }
        self.apply(&mutations, new_index_timestamp)
    }

    /// Apply a prepared mutation batch.
    pub(crate) fn apply(
        &mut self,
        mutations: &MutationSet,
        new_index_timestamp: DateTime<Utc>,
    ) -> Result<ChangeLists> {
        let (root, changes) = self.rebuilt_root(mutations)?;
        if changes.mutated() {
            self.root = root;
            self.index_timestamp = new_index_timestamp;
        }
        Ok(changes)
    }

    /// Compute the new root for a mutation batch without swapping it in.
    /// Used by the registry to stage every tree before committing any.
    pub(crate) fn rebuilt_root(
        &self,
        mutations: &MutationSet,
    ) -> Result<(Arc<DirectoryNode>, ChangeLists)> {
        let mut changes = ChangeLists::default();
        let root = apply_node(&self.root, &mutations.root, self.index_timestamp, &mut changes)?
            .unwrap_or_else(|| DirectoryNode::new("", BTreeMap::new()));
        Ok((root, changes))
    }

    /// Commit a root staged by [`HashTree::rebuilt_root`].
    pub(crate) fn commit_root(&mut self, root: Arc<DirectoryNode>, stamp: DateTime<Utc>) {
        self.root = root;
        self.index_timestamp = stamp;
    }

    /// Derive a new tree: a shallow copy of the root whose children alias
    /// this tree's nodes. Mutating either tree afterwards copies only the
    /// touched spine.
    #[must_use]
    pub fn derive(&self) -> HashTree {
        HashTree {
            root: DirectoryNode::new("", self.root.children().clone()),
            index_timestamp: self.index_timestamp,
        }
    }

    /// Resources reachable from this tree but not present (as the same
    /// node) in `base`: pointer-identical subtrees are pruned, divergent
    /// directories recurse, brand-new subtrees contribute all leaves.
    #[must_use]
    pub fn added_resources(&self, base: &HashTree) -> Vec<ResourceMetadata> {
        let mut out = Vec::new();
        collect_added(&self.root, Some(&base.root), &mut out);
        out
    }

    /// Serialise to the JSON tree shape.
    #[must_use]
    pub fn to_json(&self) -> HashTreeJson {
        HashTreeJson {
            index_timestamp: self.index_timestamp,
            root: export_node(&TreeNode::Directory(Arc::clone(&self.root))),
        }
    }

    /// Restore from the JSON tree shape, verifying stored hashes.
    pub fn from_json(json: &HashTreeJson) -> Result<Self> {
        let TreeNodeJson::Directory { .. } = &json.root else {
            return Err(Error::Serialization(
                "tree root must be a directory".to_string(),
            ));
        };
        let root = match import_node(&json.root, "")? {
            TreeNode::Directory(dir) => dir,
            TreeNode::Resource(_) => unreachable!(),
        };
        Ok(Self {
            root,
            index_timestamp: json.index_timestamp,
        })
    }
}

pub(crate) async fn resolve_metadata(
    resources: Vec<Arc<Resource>>,
) -> Result<Vec<ResourceMetadata>> {
    futures::stream::iter(resources.into_iter().map(|resource| async move {
        let path = resource.path().to_string();
        resource
            .metadata()
            .await
            .map_err(|_| Error::ResourceUnavailable { path })
    }))
    .buffer_unordered(INTEGRITY_CONCURRENCY)
    .try_collect()
    .await
}

fn collect_paths(dir: &DirectoryNode, out: &mut Vec<String>) {
    for node in dir.children().values() {
        match node {
            TreeNode::Directory(d) => collect_paths(d, out),
            TreeNode::Resource(r) => out.push(r.metadata().path.clone()),
        }
    }
}

fn collect_added(
    current: &DirectoryNode,
    base: Option<&DirectoryNode>,
    out: &mut Vec<ResourceMetadata>,
) {
    for (name, node) in current.children() {
        let base_child = base.and_then(|b| b.child(name));
        if let Some(base_node) = base_child {
            if node.ptr_eq(base_node) {
                continue;
            }
        }
        match (node, base_child) {
            (TreeNode::Directory(dir), Some(TreeNode::Directory(base_dir))) => {
                collect_added(dir, Some(base_dir), out);
            }
            (TreeNode::Directory(dir), _) => collect_added(dir, None, out),
            (TreeNode::Resource(resource), _) => out.push(resource.metadata().clone()),
        }
    }
}

fn apply_node(
    dir: &Arc<DirectoryNode>,
    mutations: &MutationNode,
    index_timestamp: DateTime<Utc>,
    changes: &mut ChangeLists,
) -> Result<Option<Arc<DirectoryNode>>> {
    let mut children = dir.children().clone();
    let mut changed = false;

    for (name, child_mutations) in &mutations.children {
        let existing = children.get(name).cloned();
        if let Some((path, op)) = &child_mutations.leaf {
            match op {
                LeafOp::Upsert(metadata) => match existing {
                    Some(TreeNode::Resource(stored)) => {
                        if is_unchanged(stored.metadata(), metadata, index_timestamp) {
                            changes.unchanged.push(path.clone());
                        } else {
                            children.insert(
                                name.clone(),
                                TreeNode::Resource(ResourceNode::new(metadata.clone())),
                            );
                            changes.updated.push(path.clone());
                            changed = true;
                        }
                    }
                    Some(TreeNode::Directory(_)) => {
                        return Err(Error::structure(path, "path is an existing directory"));
                    }
                    None => {
                        children.insert(
                            name.clone(),
                            TreeNode::Resource(ResourceNode::new(metadata.clone())),
                        );
                        changes.added.push(path.clone());
                        changed = true;
                    }
                },
                LeafOp::Remove => match existing {
                    Some(TreeNode::Resource(_)) => {
                        children.remove(name);
                        changes.removed.push(path.clone());
                        changed = true;
                    }
                    Some(TreeNode::Directory(_)) => {
                        return Err(Error::structure(path, "path is an existing directory"));
                    }
                    None => {}
                },
                LeafOp::UpsertThenRemove => match existing {
                    Some(TreeNode::Resource(_)) => {
                        children.remove(name);
                        changes.removed.push(path.clone());
                        changed = true;
                    }
                    Some(TreeNode::Directory(_)) => {
                        return Err(Error::structure(path, "path is an existing directory"));
                    }
                    None => {
                        changes.added.push(path.clone());
                        changes.removed.push(path.clone());
                    }
                },
            }
        } else {
            match existing {
                Some(TreeNode::Directory(subdir)) => {
                    match apply_node(&subdir, child_mutations, index_timestamp, changes)? {
                        None => {
                            children.remove(name);
                            changed = true;
                        }
                        Some(new_subdir) => {
                            if !Arc::ptr_eq(&new_subdir, &subdir) {
                                children.insert(name.clone(), TreeNode::Directory(new_subdir));
                                changed = true;
                            }
                        }
                    }
                }
                Some(TreeNode::Resource(_)) => {
                    if let Some(path) = child_mutations.first_upsert_path() {
                        return Err(Error::structure(
                            path,
                            "path collides with an existing resource",
                        ));
                    }
                    // Removals below a resource have nothing to remove.
                    child_mutations.report_orphan_tombstones(changes);
                }
                None => {
                    if let Some(new_subdir) = build_subtree(name, child_mutations, changes)? {
                        children.insert(name.clone(), TreeNode::Directory(new_subdir));
                        changed = true;
                    }
                }
            }
        }
    }

    if !changed {
        return Ok(Some(Arc::clone(dir)));
    }
    if children.is_empty() && !dir.name().is_empty() {
        return Ok(None);
    }
    Ok(Some(DirectoryNode::new(dir.name().to_string(), children)))
}

fn build_subtree(
    name: &str,
    mutations: &MutationNode,
    changes: &mut ChangeLists,
) -> Result<Option<Arc<DirectoryNode>>> {
    let mut children: BTreeMap<String, TreeNode> = BTreeMap::new();
    for (child_name, child_mutations) in &mutations.children {
        if let Some((path, op)) = &child_mutations.leaf {
            match op {
                LeafOp::Upsert(metadata) => {
                    children.insert(
                        child_name.clone(),
                        TreeNode::Resource(ResourceNode::new(metadata.clone())),
                    );
                    changes.added.push(path.clone());
                }
                LeafOp::Remove => {}
                LeafOp::UpsertThenRemove => {
                    changes.added.push(path.clone());
                    changes.removed.push(path.clone());
                }
            }
        } else if let Some(subdir) = build_subtree(child_name, child_mutations, changes)? {
            children.insert(child_name.clone(), TreeNode::Directory(subdir));
        }
    }
    if children.is_empty() {
        Ok(None)
    } else {
        Ok(Some(DirectoryNode::new(name, children)))
    }
}

/// Serialised node shape: `{name, type, hash, ...}` with children as a
/// name-keyed map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TreeNodeJson {
    #[serde(rename_all = "camelCase")]
    Directory {
        name: String,
        hash: String,
        children: BTreeMap<String, TreeNodeJson>,
    },
    #[serde(rename_all = "camelCase")]
    Resource {
        name: String,
        hash: String,
        integrity: String,
        size: u64,
        last_modified: DateTime<Utc>,
        inode: u64,
    },
}

/// Serialised tree: index timestamp plus the root node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashTreeJson {
    pub index_timestamp: DateTime<Utc>,
    pub root: TreeNodeJson,
}

fn export_node(node: &TreeNode) -> TreeNodeJson {
    match node {
        TreeNode::Directory(dir) => TreeNodeJson::Directory {
            name: dir.name().to_string(),
            hash: dir.hash().to_string(),
            children: dir
                .children()
                .iter()
                .map(|(name, child)| (name.clone(), export_node(child)))
                .collect(),
        },
        TreeNode::Resource(resource) => {
            let metadata = resource.metadata();
            TreeNodeJson::Resource {
                name: resource.name().to_string(),
                hash: resource.hash().to_string(),
                integrity: metadata.integrity.clone(),
                size: metadata.size,
                last_modified: metadata.last_modified,
                inode: metadata.inode,
            }
        }
    }
}

fn import_node(json: &TreeNodeJson, parent_path: &str) -> Result<TreeNode> {
    match json {
        TreeNodeJson::Directory {
            name,
            hash,
            children,
        } => {
            let path = join_path(parent_path, name);
            let mut rebuilt = BTreeMap::new();
            for (child_name, child_json) in children {
                rebuilt.insert(child_name.clone(), import_node(child_json, &path)?);
            }
            let dir = DirectoryNode::new(name.clone(), rebuilt);
            if dir.hash() != hash {
                return Err(Error::Serialization(format!(
                    "directory hash mismatch at '{path}'"
                )));
            }
            Ok(TreeNode::Directory(dir))
        }
        TreeNodeJson::Resource {
            name,
            hash,
            integrity,
            size,
            last_modified,
            inode,
        } => {
            let path = join_path(parent_path, name);
            let node = ResourceNode::new(ResourceMetadata {
                path: path.clone(),
                integrity: integrity.clone(),
                size: *size,
                last_modified: *last_modified,
                inode: *inode,
            });
            if node.hash() != hash {
                return Err(Error::Serialization(format!(
                    "resource hash mismatch at '{path}'"
                )));
            }
            Ok(TreeNode::Resource(node))
        }
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if name.is_empty() {
        String::new()
    } else {
        format!("{parent}/{name}")
    }
}
