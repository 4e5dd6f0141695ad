//! The resource-request manager: one per task and side.
//!
//! Records the request sets a task issued, binds every set to a Merkle
//! resource index (root sets get a fresh index, derived sets a
//! copy-on-write child of their parent's tree), keeps the indices in sync
//! when resources change, and accumulates signature deltas for tasks that
//! opted into differential builds.

use crate::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, trace};
use uibuild_core::request::RequestMatcher;
use uibuild_core::{Reader, RequestRecording, RequestSide, Resource, ResourceMetadata, ResourceRequest};
use uibuild_hash_tree::{
    normalize_virtual_path, ChangeLists, HashTree, HashTreeJson, RegistrySet, ResourceIndex,
};
use uibuild_request_graph::{NodeId, RequestGraph, RequestGraphCache};

/// The literal signature of a task run that issued no requests.
///
/// Index signatures are 64-char hex strings, so `"X"` can never collide
/// with one.
pub const NO_REQUESTS_SIGNATURE: &str = "X";

/// Per-node state: the bound resource index.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct NodeState {
    pub(crate) index: Option<ResourceIndex>,
}

/// Outcome of recording a request set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSet {
    pub set_id: NodeId,
    pub signature: String,
}

/// One entry of the delta map: where a stale signature can be chained to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub new_signature: String,
    pub changed_paths: Vec<String>,
}

#[derive(Debug, Clone)]
struct DeltaAccumulator {
    original_signature: String,
    new_signature: String,
    changed_paths: BTreeSet<String>,
    has_removals: bool,
}

/// Per-call resource lookup memo shared across graph nodes.
#[derive(Default)]
struct FetchCache {
    by_request: HashMap<String, Vec<Arc<Resource>>>,
}

/// Tracks request sets and their indices for one `(task, side)`.
#[derive(Debug)]
pub struct ResourceRequestManager {
    side: RequestSide,
    graph: RequestGraph<NodeState>,
    registries: RegistrySet,
    deltas: BTreeMap<NodeId, DeltaAccumulator>,
    use_differential_update: bool,
    unused_at_least_once: bool,
    has_new_or_modified_cache_entries: bool,
}

impl ResourceRequestManager {
    #[must_use]
    pub fn new(side: RequestSide) -> Self {
        Self {
            side,
            graph: RequestGraph::new(),
            registries: RegistrySet::new(),
            deltas: BTreeMap::new(),
            use_differential_update: false,
            unused_at_least_once: false,
            has_new_or_modified_cache_entries: false,
        }
    }

    #[must_use]
    pub fn side(&self) -> RequestSide {
        self.side
    }

    pub fn set_differential_update(&mut self, enabled: bool) {
        self.use_differential_update = enabled;
    }

    #[must_use]
    pub fn differential_update(&self) -> bool {
        self.use_differential_update
    }

    #[must_use]
    pub fn unused_at_least_once(&self) -> bool {
        self.unused_at_least_once
    }

    #[must_use]
    pub fn has_new_or_modified_cache_entries(&self) -> bool {
        self.has_new_or_modified_cache_entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.is_empty() && !self.unused_at_least_once
    }

    /// Record the request set captured by a monitored reader.
    ///
    /// An exact match reuses the existing node and its signature. A new set
    /// either becomes a root (fresh index over everything the reader
    /// matches) or a child of the best-covering existing set, deriving the
    /// parent's tree and inserting only the resources the delta requests
    /// match.
    pub async fn add_requests(
        &mut self,
        recording: &RequestRecording,
        reader: &dyn Reader,
    ) -> Result<RecordedSet> {
        let requests = recording.to_requests(self.side);
        if let Some(existing) = self.graph.find_exact_match(&requests) {
            let signature = self.signature_of(existing)?;
            trace!(set = %existing, "Reusing exact request-set match");
            // The recording itself is a cache-relevant event even when the
            // set is reused: the signature pair it keys may be new.
            self.has_new_or_modified_cache_entries = true;
            return Ok(RecordedSet {
                set_id: existing,
                signature,
            });
        }

        let mut fetch_cache = FetchCache::default();
        let index = match self.graph.find_best_match(&requests) {
            None => {
                let resources = fetch_all(reader, &requests, &mut fetch_cache).await;
                let tree = HashTree::from_resources(resources, Utc::now()).await?;
                ResourceIndex::create_root(&mut self.registries, tree)
            }
            Some(parent_id) => {
                let parent_keys = self.graph.materialized_set(parent_id)?;
                let delta_requests: Vec<ResourceRequest> = requests
                    .iter()
                    .filter(|r| !parent_keys.contains(&r.canonical_key()))
                    .cloned()
                    .collect();
                let parent_index = self.index_of(parent_id)?;
                let resources = fetch_all(reader, &delta_requests, &mut fetch_cache).await;
                parent_index
                    .derive_with(&mut self.registries, resources)
                    .await?
            }
        };

        let set_id = self
            .graph
            .add_request_set(&requests, NodeState { index: Some(index) });
        let signature = index.signature(&self.registries)?;
        self.has_new_or_modified_cache_entries = true;
        debug!(set = %set_id, signature, "Recorded request set");
        Ok(RecordedSet { set_id, signature })
    }

    /// Mark this manager as invoked without any requests. A distinct,
    /// cache-eligible outcome with the literal signature `"X"`.
    pub fn record_no_requests(&mut self) -> &'static str {
        if !self.unused_at_least_once {
            self.unused_at_least_once = true;
            self.has_new_or_modified_cache_entries = true;
        }
        NO_REQUESTS_SIGNATURE
    }

    /// One signature per request set, plus `"X"` when the manager was
    /// invoked without requests at least once.
    pub fn index_signatures(&self) -> Result<Vec<String>> {
        let mut signatures = Vec::with_capacity(self.graph.len() + 1);
        for id in self.graph.node_ids().collect::<Vec<_>>() {
            signatures.push(self.signature_of(id)?);
        }
        if self.unused_at_least_once {
            signatures.push(NO_REQUESTS_SIGNATURE.to_string());
        }
        Ok(signatures)
    }

    /// The current signature of one request set.
    pub fn signature_of(&self, set_id: NodeId) -> Result<String> {
        let index = self.index_of(set_id)?;
        Ok(index.signature(&self.registries)?)
    }

    /// Bring every index in line with what the reader currently serves.
    ///
    /// Walks the graph parent-first; per node, the node's *own* added
    /// requests are re-resolved (through a per-call memo), stale matches
    /// are scheduled for removal and current matches upserted. One flush
    /// at the end commits everything.
    pub async fn refresh_indices(&mut self, reader: &dyn Reader) -> Result<bool> {
        let mut fetch_cache = FetchCache::default();
        for entry in self.graph.traverse_by_depth() {
            let own_requests = self.graph.node(entry.id)?.added_requests().to_vec();
            let index = self.index_of(entry.id)?;
            let matchers = compile_matchers(&own_requests)?;

            let fetched = fetch_all(reader, &own_requests, &mut fetch_cache).await;
            let fetched_paths: BTreeSet<String> = fetched
                .iter()
                .map(|r| normalize_virtual_path(r.path()))
                .collect();

            for path in index.resource_paths(&self.registries)? {
                if matchers.iter().any(|m| m.matches(&path)) && !fetched_paths.contains(&path) {
                    index.schedule_removal(&mut self.registries, &path)?;
                }
            }
            for resource in fetched {
                index.schedule_upsert(&mut self.registries, resource)?;
            }
        }
        self.finish_mutation().await
    }

    /// Apply a change notification to every affected index.
    ///
    /// Per node, the relevant paths are the changed paths matching the
    /// node's own added requests plus everything relevant to its parent.
    /// Present resources are upserted, absent ones removed; all registries
    /// flush at the end. Returns whether anything actually changed.
    pub async fn update_indices(
        &mut self,
        reader: &dyn Reader,
        changed_paths: &[String],
    ) -> Result<bool> {
        let changed: Vec<String> = changed_paths
            .iter()
            .map(|p| normalize_virtual_path(p))
            .collect();
        let mut relevant_by_node: BTreeMap<NodeId, BTreeSet<String>> = BTreeMap::new();
        let mut path_cache: HashMap<String, Option<Arc<Resource>>> = HashMap::new();

        for entry in self.graph.traverse_by_depth() {
            let own_requests = self.graph.node(entry.id)?.added_requests().to_vec();
            let matchers = compile_matchers(&own_requests)?;
            let mut relevant: BTreeSet<String> = changed
                .iter()
                .filter(|p| matchers.iter().any(|m| m.matches(p)))
                .cloned()
                .collect();
            if let Some(parent) = entry.parent {
                if let Some(parent_relevant) = relevant_by_node.get(&parent) {
                    relevant.extend(parent_relevant.iter().cloned());
                }
            }
            if !relevant.is_empty() {
                let index = self.index_of(entry.id)?;
                for path in &relevant {
                    if !path_cache.contains_key(path) {
                        let resource = reader.by_path(path).await;
                        path_cache.insert(path.clone(), resource);
                    }
                    match path_cache.get(path).and_then(Clone::clone) {
                        Some(resource) => index.schedule_upsert(&mut self.registries, resource)?,
                        None => index.schedule_removal(&mut self.registries, path)?,
                    }
                }
            }
            relevant_by_node.insert(entry.id, relevant);
        }
        self.finish_mutation().await
    }

    /// Flush all registries and, with differential tracking on, accumulate
    /// per-set signature deltas.
    async fn finish_mutation(&mut self) -> Result<bool> {
        let node_ids: Vec<NodeId> = self.graph.node_ids().collect();
        let mut pre_signatures: BTreeMap<NodeId, String> = BTreeMap::new();
        for &id in &node_ids {
            pre_signatures.insert(id, self.signature_of(id)?);
        }

        let summaries = self.registries.flush_all(Utc::now()).await?;
        let mutated = summaries.iter().any(|(_, summary)| summary.mutated());
        if !mutated {
            return Ok(false);
        }
        self.has_new_or_modified_cache_entries = true;

        if self.use_differential_update {
            let mut per_tree: HashMap<(usize, u32), &ChangeLists> = HashMap::new();
            for (registry_id, summary) in &summaries {
                for (tree_id, changes) in &summary.per_tree {
                    per_tree.insert((registry_id.index(), tree_id.index()), changes);
                }
            }
            for &id in &node_ids {
                let index = self.index_of(id)?;
                let key = (index.registry().index(), index.tree().index());
                let Some(changes) = per_tree.get(&key) else {
                    continue;
                };
                if !changes.mutated() {
                    continue;
                }
                let new_signature = self.signature_of(id)?;
                let Some(original) = pre_signatures.get(&id) else {
                    continue;
                };
                if *original == new_signature {
                    continue;
                }
                self.accumulate_delta(id, original, &new_signature, changes);
            }
        }
        Ok(true)
    }

    fn accumulate_delta(
        &mut self,
        id: NodeId,
        original: &str,
        new_signature: &str,
        changes: &ChangeLists,
    ) {
        let accumulator = self
            .deltas
            .entry(id)
            .or_insert_with(|| DeltaAccumulator {
                // Keep the earliest original signature so a signature
                // recorded before several update rounds still chains.
                original_signature: original.to_string(),
                new_signature: String::new(),
                changed_paths: BTreeSet::new(),
                has_removals: false,
            });
        accumulator.new_signature = new_signature.to_string();
        for path in changes
            .added
            .iter()
            .chain(changes.updated.iter())
            .chain(changes.removed.iter())
        {
            accumulator.changed_paths.insert(path.clone());
        }
        accumulator.has_removals |= !changes.removed.is_empty();
    }

    /// The coalesced delta map: `old signature -> {new signature, changed
    /// paths}`. Sets whose accumulated diff contains a removal are skipped;
    /// a removal prevents differential reuse.
    #[must_use]
    pub fn deltas(&self) -> BTreeMap<String, Delta> {
        let mut map = BTreeMap::new();
        for accumulator in self.deltas.values() {
            if accumulator.has_removals {
                continue;
            }
            if accumulator.original_signature == accumulator.new_signature {
                continue;
            }
            map.insert(
                accumulator.original_signature.clone(),
                Delta {
                    new_signature: accumulator.new_signature.clone(),
                    changed_paths: accumulator.changed_paths.iter().cloned().collect(),
                },
            );
        }
        map
    }

    /// Serialise: graph structure, full trees for root sets, added
    /// metadata relative to the parent for derived sets.
    pub fn to_cache_object(&self) -> Result<ManagerCache> {
        let mut root_indices = Vec::new();
        let mut delta_indices = Vec::new();
        for entry in self.graph.traverse_by_depth() {
            let index = self.index_of(entry.id)?;
            match entry.parent {
                None => root_indices.push(RootIndexCache {
                    node_id: entry.id,
                    resource_index: index.to_tree_json(&self.registries)?,
                }),
                Some(parent) => {
                    let parent_index = self.index_of(parent)?;
                    let added = index.added_resources_vs(&self.registries, &parent_index)?;
                    delta_indices.push(DeltaIndexCache {
                        node_id: entry.id,
                        added_resource_index: added,
                    });
                }
            }
        }
        Ok(ManagerCache {
            request_set_graph: self.graph.to_cache_object(),
            root_indices,
            delta_indices,
            unused_at_least_once: self.unused_at_least_once,
        })
    }

    /// Restore from a cache object: root indices are rebuilt first, delta
    /// indices derive from their parent's restored tree parent-first.
    pub fn from_cache(side: RequestSide, cache: &ManagerCache) -> Result<Self> {
        let mut graph: RequestGraph<NodeState> =
            RequestGraph::from_cache_object(&cache.request_set_graph)?;
        let mut registries = RegistrySet::new();

        let roots: BTreeMap<NodeId, &HashTreeJson> = cache
            .root_indices
            .iter()
            .map(|r| (r.node_id, &r.resource_index))
            .collect();
        let deltas: BTreeMap<NodeId, &Vec<ResourceMetadata>> = cache
            .delta_indices
            .iter()
            .map(|d| (d.node_id, &d.added_resource_index))
            .collect();

        for entry in graph.traverse_by_depth() {
            let index = match entry.parent {
                None => {
                    let json = roots.get(&entry.id).ok_or(Error::MissingResourceIndex {
                        node: entry.id.index(),
                    })?;
                    ResourceIndex::restore_root(&mut registries, json)?
                }
                Some(parent) => {
                    let added = deltas.get(&entry.id).ok_or(Error::MissingResourceIndex {
                        node: entry.id.index(),
                    })?;
                    let parent_index =
                        graph
                            .node(parent)?
                            .metadata()
                            .index
                            .ok_or(Error::MissingRegistry {
                                node: entry.id.index(),
                            })?;
                    parent_index.derive_with_metadata(&mut registries, (*added).clone())?
                }
            };
            graph.node_mut(entry.id)?.metadata_mut().index = Some(index);
        }

        Ok(Self {
            side,
            graph,
            registries,
            deltas: BTreeMap::new(),
            use_differential_update: false,
            unused_at_least_once: cache.unused_at_least_once,
            has_new_or_modified_cache_entries: false,
        })
    }

    fn index_of(&self, id: NodeId) -> Result<ResourceIndex> {
        self.graph
            .node(id)?
            .metadata()
            .index
            .ok_or(Error::MissingResourceIndex { node: id.index() })
    }
}

fn compile_matchers(requests: &[ResourceRequest]) -> Result<Vec<RequestMatcher>> {
    requests
        .iter()
        .map(|r| r.matcher().map_err(Error::from))
        .collect()
}

/// Resolve all resources the given requests match, de-duplicated by path.
async fn fetch_all(
    reader: &dyn Reader,
    requests: &[ResourceRequest],
    cache: &mut FetchCache,
) -> Vec<Arc<Resource>> {
    let mut by_path: BTreeMap<String, Arc<Resource>> = BTreeMap::new();
    for request in requests {
        let key = request.canonical_key();
        if !cache.by_request.contains_key(&key) {
            let resources = match request {
                ResourceRequest::Path(p) | ResourceRequest::DepPath(p) => {
                    reader.by_path(p).await.into_iter().collect()
                }
                ResourceRequest::Patterns(pats) | ResourceRequest::DepPatterns(pats) => {
                    reader.by_glob(pats).await
                }
            };
            cache.by_request.insert(key.clone(), resources);
        }
        if let Some(resources) = cache.by_request.get(&key) {
            for resource in resources {
                by_path
                    .entry(normalize_virtual_path(resource.path()))
                    .or_insert_with(|| Arc::clone(resource));
            }
        }
    }
    by_path.into_values().collect()
}

/// Serialised manager state (spec'd per-task cache-object shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerCache {
    pub request_set_graph: RequestGraphCache,
    pub root_indices: Vec<RootIndexCache>,
    pub delta_indices: Vec<DeltaIndexCache>,
    pub unused_at_least_once: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootIndexCache {
    pub node_id: NodeId,
    pub resource_index: HashTreeJson,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaIndexCache {
    pub node_id: NodeId,
    pub added_resource_index: Vec<ResourceMetadata>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uibuild_core::MemoryReader;

    fn recording_of_paths(paths: &[&str]) -> RequestRecording {
        let mut recording = RequestRecording::default();
        for path in paths {
            recording.paths.insert((*path).to_string());
        }
        recording
    }

    fn recording_of_patterns(patterns: &[&str]) -> RequestRecording {
        RequestRecording {
            paths: BTreeSet::new(),
            patterns: vec![patterns.iter().map(ToString::to_string).collect()],
        }
    }

    #[tokio::test]
    async fn nested_sets_share_structure_and_differ_in_signature() {
        let reader = MemoryReader::new();
        reader.insert("/a.js", "a");
        reader.insert("/b.js", "b");
        reader.insert("/c.js", "c");

        let mut manager = ResourceRequestManager::new(RequestSide::Project);
        let s1 = manager
            .add_requests(&recording_of_paths(&["/a.js"]), &reader)
            .await
            .unwrap();
        let s2 = manager
            .add_requests(&recording_of_paths(&["/a.js", "/b.js"]), &reader)
            .await
            .unwrap();
        let s3 = manager
            .add_requests(&recording_of_paths(&["/a.js", "/b.js", "/c.js"]), &reader)
            .await
            .unwrap();

        assert_ne!(s1.signature, s2.signature);
        assert_ne!(s2.signature, s3.signature);
        assert_ne!(s1.signature, s3.signature);

        assert_eq!(manager.graph.node(s2.set_id).unwrap().parent(), Some(s1.set_id));
        assert_eq!(manager.graph.node(s3.set_id).unwrap().parent(), Some(s2.set_id));
        for set in [&s1, &s2, &s3] {
            assert_eq!(
                manager
                    .graph
                    .node(set.set_id)
                    .unwrap()
                    .added_requests()
                    .len(),
                1
            );
        }
    }

    #[tokio::test]
    async fn exact_match_reuses_node_and_signature() {
        let reader = MemoryReader::new();
        reader.insert("/x", "content");

        let mut manager = ResourceRequestManager::new(RequestSide::Project);
        let first = manager
            .add_requests(&recording_of_paths(&["/x"]), &reader)
            .await
            .unwrap();
        let second = manager
            .add_requests(&recording_of_paths(&["/x"]), &reader)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(manager.graph.len(), 1);
    }

    #[tokio::test]
    async fn differential_update_tracks_signature_chain() {
        let reader = MemoryReader::new();
        reader.insert("/a.js", "h1");

        let mut manager = ResourceRequestManager::new(RequestSide::Project);
        manager.set_differential_update(true);
        let recorded = manager
            .add_requests(&recording_of_paths(&["/a.js"]), &reader)
            .await
            .unwrap();

        reader.insert("/a.js", "h2");
        let changed = manager
            .update_indices(&reader, &["/a.js".to_string()])
            .await
            .unwrap();
        assert!(changed);
        assert!(manager.has_new_or_modified_cache_entries());

        let new_signature = manager.signature_of(recorded.set_id).unwrap();
        assert_ne!(new_signature, recorded.signature);

        let deltas = manager.deltas();
        let delta = deltas.get(&recorded.signature).unwrap();
        assert_eq!(delta.new_signature, new_signature);
        assert_eq!(delta.changed_paths, vec!["/a.js".to_string()]);
    }

    #[tokio::test]
    async fn repeated_updates_keep_earliest_original_signature() {
        let reader = MemoryReader::new();
        reader.insert("/a.js", "v1");

        let mut manager = ResourceRequestManager::new(RequestSide::Project);
        manager.set_differential_update(true);
        let recorded = manager
            .add_requests(&recording_of_paths(&["/a.js"]), &reader)
            .await
            .unwrap();

        reader.insert("/a.js", "v2");
        manager
            .update_indices(&reader, &["/a.js".to_string()])
            .await
            .unwrap();
        reader.insert("/a.js", "v3");
        manager
            .update_indices(&reader, &["/a.js".to_string()])
            .await
            .unwrap();

        let deltas = manager.deltas();
        assert_eq!(deltas.len(), 1);
        let delta = deltas.get(&recorded.signature).unwrap();
        assert_eq!(
            delta.new_signature,
            manager.signature_of(recorded.set_id).unwrap()
        );
    }

    #[tokio::test]
    async fn removal_blocks_differential_reuse() {
        let reader = MemoryReader::new();
        reader.insert("/a.js", "a");
        reader.insert("/b.js", "b");

        let mut manager = ResourceRequestManager::new(RequestSide::Project);
        manager.set_differential_update(true);
        manager
            .add_requests(&recording_of_paths(&["/a.js", "/b.js"]), &reader)
            .await
            .unwrap();

        reader.remove("/b.js");
        let changed = manager
            .update_indices(&reader, &["/b.js".to_string()])
            .await
            .unwrap();
        assert!(changed);
        assert!(manager.deltas().is_empty());
    }

    #[tokio::test]
    async fn pattern_sets_pick_up_new_matches_on_update() {
        let reader = MemoryReader::new();
        reader.insert("/src/a.js", "a");

        let mut manager = ResourceRequestManager::new(RequestSide::Project);
        let recorded = manager
            .add_requests(&recording_of_patterns(&["src/**/*.js"]), &reader)
            .await
            .unwrap();

        reader.insert("/src/new.js", "n");
        let changed = manager
            .update_indices(&reader, &["/src/new.js".to_string()])
            .await
            .unwrap();
        assert!(changed);
        assert_ne!(manager.signature_of(recorded.set_id).unwrap(), recorded.signature);

        // An unrelated path changes nothing.
        let changed = manager
            .update_indices(&reader, &["/other/x.css".to_string()])
            .await
            .unwrap();
        assert!(!changed);
    }

    #[tokio::test]
    async fn refresh_resyncs_stale_and_new_resources() {
        let reader = MemoryReader::new();
        reader.insert("/lib/a.js", "a");
        reader.insert("/lib/b.js", "b");

        let mut manager = ResourceRequestManager::new(RequestSide::Dependency);
        let recorded = manager
            .add_requests(&recording_of_patterns(&["lib/**"]), &reader)
            .await
            .unwrap();

        // Dependencies changed out-of-band between builds.
        reader.remove("/lib/b.js");
        reader.insert("/lib/c.js", "c");

        let changed = manager.refresh_indices(&reader).await.unwrap();
        assert!(changed);
        assert_ne!(manager.signature_of(recorded.set_id).unwrap(), recorded.signature);

        let refreshed_again = manager.refresh_indices(&reader).await.unwrap();
        assert!(!refreshed_again);
    }

    #[tokio::test]
    async fn no_requests_signature_is_distinct() {
        let mut manager = ResourceRequestManager::new(RequestSide::Dependency);
        assert!(manager.index_signatures().unwrap().is_empty());

        assert_eq!(manager.record_no_requests(), NO_REQUESTS_SIGNATURE);
        assert!(manager.unused_at_least_once());
        assert_eq!(
            manager.index_signatures().unwrap(),
            vec![NO_REQUESTS_SIGNATURE.to_string()]
        );
    }

    #[tokio::test]
    async fn cache_round_trip_preserves_signatures() {
        let reader = MemoryReader::new();
        reader.insert("/a.js", "a");
        reader.insert("/b.js", "b");
        reader.insert("/styles/x.css", "x");

        let mut manager = ResourceRequestManager::new(RequestSide::Project);
        manager
            .add_requests(&recording_of_paths(&["/a.js"]), &reader)
            .await
            .unwrap();
        manager
            .add_requests(&recording_of_paths(&["/a.js", "/b.js"]), &reader)
            .await
            .unwrap();
        manager
            .add_requests(&recording_of_patterns(&["styles/**"]), &reader)
            .await
            .unwrap();
        manager.record_no_requests();

        let cache = manager.to_cache_object().unwrap();
        let text = serde_json::to_string(&cache).unwrap();
        let parsed: ManagerCache = serde_json::from_str(&text).unwrap();
        let restored = ResourceRequestManager::from_cache(RequestSide::Project, &parsed).unwrap();

        assert_eq!(
            restored.index_signatures().unwrap(),
            manager.index_signatures().unwrap()
        );
        assert!(!restored.has_new_or_modified_cache_entries());
    }

    #[tokio::test]
    async fn restore_with_missing_root_index_fails() {
        let reader = MemoryReader::new();
        reader.insert("/a.js", "a");

        let mut manager = ResourceRequestManager::new(RequestSide::Project);
        manager
            .add_requests(&recording_of_paths(&["/a.js"]), &reader)
            .await
            .unwrap();

        let mut cache = manager.to_cache_object().unwrap();
        cache.root_indices.clear();
        let err = ResourceRequestManager::from_cache(RequestSide::Project, &cache).unwrap_err();
        assert!(matches!(err, Error::MissingResourceIndex { .. }));
    }
}
