//! The resource-index facade.
//!
//! A [`ResourceIndex`] is the handle the cache layers bind to a request
//! set: a `(registry, tree)` pair. The registries themselves live in a
//! [`RegistrySet`] owned by the request manager, keeping a single writer
//! per registry without back-references from trees.

use crate::registry::{FlushSummary, TreeId, TreeRegistry};
use crate::tree::{HashTree, HashTreeJson};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uibuild_core::{Resource, ResourceMetadata};

/// Identifier of a registry within a [`RegistrySet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegistryId(pub(crate) usize);

impl RegistryId {
    /// The raw numeric id.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for RegistryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "registry#{}", self.0)
    }
}

/// The registries owned by one request manager.
#[derive(Debug, Default)]
pub struct RegistrySet {
    registries: Vec<TreeRegistry>,
}

impl RegistrySet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh, empty registry.
    pub fn create(&mut self) -> RegistryId {
        self.registries.push(TreeRegistry::new());
        RegistryId(self.registries.len() - 1)
    }

    pub fn get(&self, id: RegistryId) -> Result<&TreeRegistry> {
        self.registries.get(id.0).ok_or(Error::UnknownRegistry(id.0))
    }

    pub fn get_mut(&mut self, id: RegistryId) -> Result<&mut TreeRegistry> {
        self.registries
            .get_mut(id.0)
            .ok_or(Error::UnknownRegistry(id.0))
    }

    /// Flush every registry with pending operations, in id order.
    pub async fn flush_all(&mut self, stamp: DateTime<Utc>) -> Result<Vec<(RegistryId, FlushSummary)>> {
        let mut summaries = Vec::new();
        for (idx, registry) in self.registries.iter_mut().enumerate() {
            if registry.has_pending() {
                let summary = registry.flush(stamp).await?;
                summaries.push((RegistryId(idx), summary));
            }
        }
        Ok(summaries)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }
}

/// A request set's bound index: a tree inside one of the manager's
/// registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceIndex {
    registry: RegistryId,
    tree: TreeId,
}

impl ResourceIndex {
    /// Register a fresh tree in a new registry of `set`.
    pub fn create_root(set: &mut RegistrySet, tree: HashTree) -> ResourceIndex {
        let registry = set.create();
        let tree = set.registries[registry.0].register(tree);
        ResourceIndex { registry, tree }
    }

    /// Rebuild an index from a serialised tree into a new registry.
    pub fn restore_root(set: &mut RegistrySet, json: &HashTreeJson) -> Result<ResourceIndex> {
        let tree = HashTree::from_json(json)?;
        Ok(Self::create_root(set, tree))
    }

    #[must_use]
    pub fn registry(&self) -> RegistryId {
        self.registry
    }

    #[must_use]
    pub fn tree(&self) -> TreeId {
        self.tree
    }

    /// Derive a copy-on-write child index in the same registry, inserting
    /// only the delta resources.
    pub async fn derive_with(
        &self,
        set: &mut RegistrySet,
        additional: Vec<Arc<Resource>>,
    ) -> Result<ResourceIndex> {
        let registry = set.get_mut(self.registry)?;
        let tree = registry.derive_tree(self.tree, additional).await?;
        Ok(ResourceIndex {
            registry: self.registry,
            tree,
        })
    }

    /// Derivation from serialised metadata (cache restore).
    pub fn derive_with_metadata(
        &self,
        set: &mut RegistrySet,
        added: Vec<ResourceMetadata>,
    ) -> Result<ResourceIndex> {
        let registry = set.get_mut(self.registry)?;
        let tree = registry.derive_tree_with_metadata(self.tree, added)?;
        Ok(ResourceIndex {
            registry: self.registry,
            tree,
        })
    }

    /// The index signature: the tree's root hash.
    pub fn signature(&self, set: &RegistrySet) -> Result<String> {
        Ok(self.backing(set)?.root_hash())
    }

    pub fn index_timestamp(&self, set: &RegistrySet) -> Result<DateTime<Utc>> {
        Ok(self.backing(set)?.index_timestamp())
    }

    pub fn has_path(&self, set: &RegistrySet, path: &str) -> Result<bool> {
        Ok(self.backing(set)?.has_path(path))
    }

    pub fn resource_by_path(
        &self,
        set: &RegistrySet,
        path: &str,
    ) -> Result<Option<ResourceMetadata>> {
        Ok(self.backing(set)?.resource_by_path(path))
    }

    pub fn resource_paths(&self, set: &RegistrySet) -> Result<Vec<String>> {
        Ok(self.backing(set)?.resource_paths())
    }

    /// Schedule an upsert on the owning registry.
    pub fn schedule_upsert(&self, set: &mut RegistrySet, resource: Arc<Resource>) -> Result<()> {
        set.get_mut(self.registry)?.schedule_upsert(resource);
        Ok(())
    }

    /// Schedule a removal on the owning registry.
    pub fn schedule_removal(&self, set: &mut RegistrySet, path: &str) -> Result<()> {
        set.get_mut(self.registry)?.schedule_removal(path);
        Ok(())
    }

    /// Serialise the backing tree.
    pub fn to_tree_json(&self, set: &RegistrySet) -> Result<HashTreeJson> {
        Ok(self.backing(set)?.to_json())
    }

    /// Metadata of resources present here but not in `base` (same
    /// registry).
    pub fn added_resources_vs(
        &self,
        set: &RegistrySet,
        base: &ResourceIndex,
    ) -> Result<Vec<ResourceMetadata>> {
        set.get(self.registry)?.added_resources(self.tree, base.tree)
    }

    fn backing<'a>(&self, set: &'a RegistrySet) -> Result<&'a HashTree> {
        set.get(self.registry)?.tree(self.tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uibuild_core::MemoryReader;

    fn ts(minute: u32) -> DateTime<Utc> {
        format!("2024-05-01T10:{minute:02}:00Z").parse().unwrap()
    }

    #[tokio::test]
    async fn root_and_derived_signatures_differ() {
        let reader = MemoryReader::new();
        let a = reader.insert("/a.js", "a");

        let mut set = RegistrySet::new();
        let tree = HashTree::from_resources(vec![a], ts(5)).await.unwrap();
        let root = ResourceIndex::create_root(&mut set, tree);
        let root_sig = root.signature(&set).unwrap();

        let b = reader.insert("/b.js", "b");
        let derived = root.derive_with(&mut set, vec![b]).await.unwrap();
        let derived_sig = derived.signature(&set).unwrap();

        assert_ne!(root_sig, derived_sig);
        assert_eq!(root.registry(), derived.registry());
        assert!(derived.has_path(&set, "/a.js").unwrap());
        assert!(derived.has_path(&set, "/b.js").unwrap());
        assert!(!root.has_path(&set, "/b.js").unwrap());
    }

    #[tokio::test]
    async fn schedule_and_flush_through_index() {
        let reader = MemoryReader::new();
        let a = reader.insert("/a.js", "one");

        let mut set = RegistrySet::new();
        let tree = HashTree::from_resources(vec![a], ts(5)).await.unwrap();
        let index = ResourceIndex::create_root(&mut set, tree);
        let before = index.signature(&set).unwrap();

        let changed = reader.insert("/a.js", "two");
        index.schedule_upsert(&mut set, changed).unwrap();
        let summaries = set.flush_all(ts(6)).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_ne!(index.signature(&set).unwrap(), before);
    }

    #[tokio::test]
    async fn restore_root_round_trips_signature() {
        let reader = MemoryReader::new();
        let a = reader.insert("/sub/a.js", "a");

        let mut set = RegistrySet::new();
        let tree = HashTree::from_resources(vec![a], ts(5)).await.unwrap();
        let index = ResourceIndex::create_root(&mut set, tree);
        let json = index.to_tree_json(&set).unwrap();

        let mut other_set = RegistrySet::new();
        let restored = ResourceIndex::restore_root(&mut other_set, &json).unwrap();
        assert_eq!(
            restored.signature(&other_set).unwrap(),
            index.signature(&set).unwrap()
        );
    }
}
