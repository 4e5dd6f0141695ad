//! The tree registry: single writer for a family of trees sharing nodes.
//!
//! Trees registered here are never mutated directly; callers schedule
//! upserts and removals and the registry applies the whole batch in one
//! [`TreeRegistry::flush`]. New roots for every affected tree are staged
//! first and committed together, so no intermediate state is ever
//! observable and a failed flush leaves every tree untouched.

use crate::tree::{resolve_metadata, ChangeLists, HashTree, LeafOp, MutationSet};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use uibuild_core::{Resource, ResourceMetadata};

/// Identifier of a tree within one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TreeId(pub(crate) u32);

impl TreeId {
    /// The raw numeric id.
    #[must_use]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for TreeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tree#{}", self.0)
    }
}

#[derive(Debug)]
enum PendingOp {
    Upsert(Arc<Resource>),
    Remove,
    /// Upsert superseded by a removal in the same batch.
    UpsertThenRemove,
}

/// Result of one flush: the four global outcome lists plus the same lists
/// per tree.
#[derive(Debug, Default)]
pub struct FlushSummary {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    pub removed: Vec<String>,
    pub per_tree: BTreeMap<TreeId, ChangeLists>,
}

impl FlushSummary {
    /// Did the flush physically change any tree?
    #[must_use]
    pub fn mutated(&self) -> bool {
        self.per_tree.values().any(ChangeLists::mutated)
    }
}

/// Exclusive owner of a family of hash trees.
#[derive(Debug, Default)]
pub struct TreeRegistry {
    trees: BTreeMap<TreeId, HashTree>,
    pending: BTreeMap<String, PendingOp>,
    next_id: u32,
}

impl TreeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a tree; mutations now go through this registry.
    pub fn register(&mut self, tree: HashTree) -> TreeId {
        let id = TreeId(self.next_id);
        self.next_id += 1;
        self.trees.insert(id, tree);
        id
    }

    /// Release a tree from the registry.
    pub fn unregister(&mut self, id: TreeId) -> Option<HashTree> {
        self.trees.remove(&id)
    }

    /// Read access to a registered tree.
    pub fn tree(&self, id: TreeId) -> Result<&HashTree> {
        self.trees.get(&id).ok_or(Error::UnknownTree(id.0))
    }

    #[must_use]
    pub fn tree_ids(&self) -> Vec<TreeId> {
        self.trees.keys().copied().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.trees.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Derive a new tree from `base`, inserting the given delta resources
    /// into the derived tree only. Untouched subtrees stay aliased.
    pub async fn derive_tree(
        &mut self,
        base: TreeId,
        additional: Vec<Arc<Resource>>,
    ) -> Result<TreeId> {
        let metadata = resolve_metadata(additional).await?;
        self.derive_tree_with_metadata(base, metadata)
    }

    /// Derivation from already resolved metadata; used when restoring
    /// serialised delta indices.
    pub fn derive_tree_with_metadata(
        &mut self,
        base: TreeId,
        added: Vec<ResourceMetadata>,
    ) -> Result<TreeId> {
        let base_tree = self.tree(base)?;
        let stamp = base_tree.index_timestamp();
        let mut derived = base_tree.derive();
        if !added.is_empty() {
            derived.upsert_metadata(added, stamp)?;
        }
        Ok(self.register(derived))
    }

    /// Resources present in `derived` but not (as the same node) in `base`.
    pub fn added_resources(&self, derived: TreeId, base: TreeId) -> Result<Vec<ResourceMetadata>> {
        let derived_tree = self.tree(derived)?;
        let base_tree = self.tree(base)?;
        Ok(derived_tree.added_resources(base_tree))
    }

    /// Schedule an insert-or-replace for the next flush. Cancels a pending
    /// removal for the same path.
    pub fn schedule_upsert(&mut self, resource: Arc<Resource>) {
        let key = crate::tree::normalize_virtual_path(resource.path());
        self.pending.insert(key, PendingOp::Upsert(resource));
    }

    /// Schedule a removal for the next flush. A pending upsert for the same
    /// path is superseded; the flush will report the path as added and
    /// removed without touching the trees.
    pub fn schedule_removal(&mut self, path: &str) {
        let key = crate::tree::normalize_virtual_path(path);
        let next = match self.pending.remove(&key) {
            Some(PendingOp::Upsert(_) | PendingOp::UpsertThenRemove) => {
                PendingOp::UpsertThenRemove
            }
            Some(PendingOp::Remove) | None => PendingOp::Remove,
        };
        self.pending.insert(key, next);
    }

    /// Apply all pending operations across every registered tree.
    ///
    /// Effects are atomic: every affected tree's new root is computed
    /// before any tree is updated, and an error leaves all trees (and the
    /// pending operations) untouched. Affected trees are stamped with the
    /// supplied index timestamp.
    pub async fn flush(&mut self, stamp: DateTime<Utc>) -> Result<FlushSummary> {
        if self.pending.is_empty() {
            return Ok(FlushSummary::default());
        }

        // Resolve incoming integrities up front with bounded fan-out; a
        // failure here aborts the whole flush before any tree is looked at.
        let upserts: Vec<Arc<Resource>> = self
            .pending
            .values()
            .filter_map(|op| match op {
                PendingOp::Upsert(resource) => Some(Arc::clone(resource)),
                _ => None,
            })
            .collect();
        let mut resolved: BTreeMap<String, ResourceMetadata> = resolve_metadata(upserts)
            .await?
            .into_iter()
            .map(|meta| (crate::tree::normalize_virtual_path(&meta.path), meta))
            .collect();

        let mut mutations = MutationSet::default();
        for (path, op) in &self.pending {
            let leaf = match op {
                PendingOp::Upsert(_) => {
                    let metadata = resolved
                        .remove(path)
                        .ok_or_else(|| Error::ResourceUnavailable { path: path.clone() })?;
                    LeafOp::Upsert(metadata)
                }
                PendingOp::Remove => LeafOp::Remove,
                PendingOp::UpsertThenRemove => LeafOp::UpsertThenRemove,
            };
            mutations.insert(path, leaf)?;
        }

        // Stage: compute every tree's new root without committing.
        let mut staged = Vec::new();
        for (&id, tree) in &self.trees {
            let (root, mut changes) = tree.rebuilt_root(&mutations)?;
            changes.sort_dedup();
            staged.push((id, root, changes));
        }

        // Commit: swap all roots, stamp affected trees.
        let mut summary = FlushSummary::default();
        for (id, root, changes) in staged {
            if changes.mutated() {
                if let Some(tree) = self.trees.get_mut(&id) {
                    tree.commit_root(root, stamp);
                }
            }
            summary.per_tree.insert(id, changes);
        }
        self.pending.clear();

        merge_global(&mut summary);
        debug!(
            trees = summary.per_tree.len(),
            added = summary.added.len(),
            updated = summary.updated.len(),
            unchanged = summary.unchanged.len(),
            removed = summary.removed.len(),
            "Flushed tree registry"
        );
        Ok(summary)
    }
}

/// Merge per-tree lists into the global ones. When trees disagree about a
/// path, the strongest outcome wins: added > updated > unchanged. Removals
/// are tracked independently (a path can be both added and removed when an
/// upsert was superseded within the batch).
fn merge_global(summary: &mut FlushSummary) {
    let mut rank: BTreeMap<&str, u8> = BTreeMap::new();
    let mut removed: Vec<&str> = Vec::new();
    for changes in summary.per_tree.values() {
        for path in &changes.added {
            let entry = rank.entry(path).or_insert(3);
            *entry = (*entry).max(3);
        }
        for path in &changes.updated {
            let entry = rank.entry(path).or_insert(2);
            *entry = (*entry).max(2);
        }
        for path in &changes.unchanged {
            rank.entry(path).or_insert(1);
        }
        for path in &changes.removed {
            removed.push(path);
        }
    }
    for (path, level) in &rank {
        match level {
            3 => summary.added.push((*path).to_string()),
            2 => summary.updated.push((*path).to_string()),
            _ => summary.unchanged.push((*path).to_string()),
        }
    }
    removed.sort_unstable();
    removed.dedup();
    summary.removed = removed.into_iter().map(ToString::to_string).collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use uibuild_core::MemoryReader;

    fn ts(minute: u32) -> DateTime<Utc> {
        format!("2024-05-01T10:{minute:02}:00Z").parse().unwrap()
    }

    async fn tree_from(reader: &MemoryReader, patterns: &[&str]) -> HashTree {
        use uibuild_core::Reader;
        let resources = reader
            .by_glob(&patterns.iter().map(ToString::to_string).collect::<Vec<_>>())
            .await;
        HashTree::from_resources(resources, ts(5)).await.unwrap()
    }

    #[tokio::test]
    async fn insert_then_remove_symmetry() {
        let reader = MemoryReader::new();
        reader.insert("/a.js", "h1-content");
        reader.insert("/b.js", "h2-content");

        let mut registry = TreeRegistry::new();
        let tree = tree_from(&reader, &["**"]).await;
        let original = tree.root_hash();
        let id = registry.register(tree);

        let c = reader.insert("/c.js", "h3-content");
        registry.schedule_upsert(c);
        registry.schedule_removal("/c.js");

        let summary = registry.flush(ts(6)).await.unwrap();
        assert_eq!(summary.added, vec!["/c.js"]);
        assert_eq!(summary.removed, vec!["/c.js"]);
        assert_eq!(registry.tree(id).unwrap().root_hash(), original);
    }

    #[tokio::test]
    async fn upsert_cancels_pending_removal() {
        let reader = MemoryReader::new();
        reader.insert("/a.js", "one");

        let mut registry = TreeRegistry::new();
        let tree = tree_from(&reader, &["**"]).await;
        let id = registry.register(tree);

        registry.schedule_removal("/a.js");
        let replacement = reader.insert("/a.js", "two");
        registry.schedule_upsert(replacement);

        let summary = registry.flush(ts(6)).await.unwrap();
        assert_eq!(summary.updated, vec!["/a.js"]);
        assert!(summary.removed.is_empty());
        assert!(registry.tree(id).unwrap().has_path("/a.js"));
    }

    #[tokio::test]
    async fn flush_applies_across_all_registered_trees() {
        let reader = MemoryReader::new();
        reader.insert("/shared/a.js", "a");

        let mut registry = TreeRegistry::new();
        let base = registry.register(tree_from(&reader, &["**"]).await);
        let derived = registry
            .derive_tree(base, vec![reader.insert("/unique/c.js", "c")])
            .await
            .unwrap();

        let fresh = reader.insert("/shared/b.js", "b");
        registry.schedule_upsert(fresh);
        let summary = registry.flush(ts(7)).await.unwrap();

        assert_eq!(summary.added, vec!["/shared/b.js"]);
        for id in [base, derived] {
            assert!(registry.tree(id).unwrap().has_path("/shared/b.js"));
            assert_eq!(registry.tree(id).unwrap().index_timestamp(), ts(7));
        }
        assert_eq!(summary.per_tree.len(), 2);
        assert_eq!(summary.per_tree[&base].added, vec!["/shared/b.js"]);
        assert_eq!(summary.per_tree[&derived].added, vec!["/shared/b.js"]);
    }

    #[tokio::test]
    async fn derivation_delta_stays_out_of_base() {
        let reader = MemoryReader::new();
        reader.insert("/shared/a.js", "a");
        reader.insert("/shared/b.js", "b");

        let mut registry = TreeRegistry::new();
        let base = registry.register(tree_from(&reader, &["**"]).await);
        let base_hash = registry.tree(base).unwrap().root_hash();

        let delta = reader.insert("/unique/c.js", "c");
        let derived = registry.derive_tree(base, vec![delta]).await.unwrap();

        assert!(!registry.tree(base).unwrap().has_path("/unique/c.js"));
        assert!(registry.tree(derived).unwrap().has_path("/unique/c.js"));
        assert_eq!(registry.tree(base).unwrap().root_hash(), base_hash);
        assert_ne!(registry.tree(derived).unwrap().root_hash(), base_hash);

        // The shared directory is aliased between base and derived.
        let base_shared = registry.tree(base).unwrap().node_by_path("/shared").unwrap();
        let derived_shared = registry
            .tree(derived)
            .unwrap()
            .node_by_path("/shared")
            .unwrap();
        assert!(base_shared.ptr_eq(&derived_shared));

        let added = registry.added_resources(derived, base).unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].path, "/unique/c.js");
    }

    #[tokio::test]
    async fn unchanged_resources_do_not_stamp_trees() {
        let reader = MemoryReader::new();
        let a = reader.insert_with_mtime("/a.js", "same", ts(1));

        let mut registry = TreeRegistry::new();
        let tree = HashTree::from_resources(vec![Arc::clone(&a)], ts(5))
            .await
            .unwrap();
        let id = registry.register(tree);

        registry.schedule_upsert(a);
        let summary = registry.flush(ts(9)).await.unwrap();
        assert_eq!(summary.unchanged, vec!["/a.js"]);
        assert!(!summary.mutated());
        // Not affected, so the stamp stays.
        assert_eq!(registry.tree(id).unwrap().index_timestamp(), ts(5));
    }

    #[tokio::test]
    async fn structure_error_leaves_everything_untouched() {
        let reader = MemoryReader::new();
        reader.insert("/a.js", "a");

        let mut registry = TreeRegistry::new();
        let id = registry.register(tree_from(&reader, &["**"]).await);
        let before = registry.tree(id).unwrap().root_hash();

        registry.schedule_upsert(reader.insert("/a.js/nested.js", "oops"));
        registry.schedule_upsert(reader.insert("/b.js", "fine"));
        let err = registry.flush(ts(6)).await.unwrap_err();
        assert!(matches!(err, Error::TreeStructure { .. }));

        assert_eq!(registry.tree(id).unwrap().root_hash(), before);
        assert!(!registry.tree(id).unwrap().has_path("/b.js"));
        // Pending ops survive the failed flush.
        assert!(registry.has_pending());
    }

    #[tokio::test]
    async fn empty_flush_is_a_no_op() {
        let mut registry = TreeRegistry::new();
        let summary = registry.flush(ts(6)).await.unwrap();
        assert!(summary.per_tree.is_empty());
        assert!(!summary.mutated());
    }
}
