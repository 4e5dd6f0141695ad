//! Delta-encoded request-set graph.
//!
//! Many task runs issue near-identical sets of resource requests. Instead
//! of storing every set in full, each node of a [`RequestGraph`] stores
//! only the requests *added* relative to a greedily chosen parent (the
//! existing node covering the largest subset of the new set). The
//! materialised set of a node is the union of added requests up the parent
//! chain, computed lazily and cached.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::trace;
use uibuild_core::ResourceRequest;

/// Serialisation format version of [`RequestGraphCache`].
pub const CACHE_VERSION: u32 = 1;

/// Errors of the request-graph subsystem.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown request-set node {0}")]
    UnknownNode(u32),

    #[error("Unsupported request-graph serialisation version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Corrupt request graph: {0}")]
    Corrupt(String),
}

/// Result type alias for request-graph operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Identifier of a request-set node, unique and monotone per graph.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NodeId(pub u32);

impl NodeId {
    /// The raw numeric id.
    #[must_use]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "set#{}", self.0)
    }
}

/// One request-set node: the delta over its parent plus caller metadata.
#[derive(Debug)]
pub struct RequestNode<M> {
    id: NodeId,
    parent: Option<NodeId>,
    added_requests: Vec<ResourceRequest>,
    added_keys: BTreeSet<String>,
    metadata: M,
    materialized: OnceLock<Arc<BTreeSet<String>>>,
}

impl<M> RequestNode<M> {
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// The requests this node adds over its parent.
    #[must_use]
    pub fn added_requests(&self) -> &[ResourceRequest] {
        &self.added_requests
    }

    /// Canonical keys of the added requests.
    #[must_use]
    pub fn added_keys(&self) -> &BTreeSet<String> {
        &self.added_keys
    }

    #[must_use]
    pub fn metadata(&self) -> &M {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut M {
        &mut self.metadata
    }
}

/// An entry of a parent-before-child traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthEntry {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub depth: usize,
}

/// The delta-encoded DAG of request sets.
#[derive(Debug, Default)]
pub struct RequestGraph<M> {
    nodes: BTreeMap<NodeId, RequestNode<M>>,
    next_id: u32,
}

impl<M> RequestGraph<M> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            next_id: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Result<&RequestNode<M>> {
        self.nodes.get(&id).ok_or(Error::UnknownNode(id.0))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut RequestNode<M>> {
        self.nodes.get_mut(&id).ok_or(Error::UnknownNode(id.0))
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Record a request set, storing only the delta over the best existing
    /// parent: the node whose materialised set is the largest subset of the
    /// new set (fewest missing keys). Without any suitable parent the node
    /// becomes a root carrying the full set.
    pub fn add_request_set(&mut self, requests: &[ResourceRequest], metadata: M) -> NodeId {
        let keys: BTreeSet<String> =
            requests.iter().map(ResourceRequest::canonical_key).collect();

        let parent = self.best_subset_node(&keys);
        let (parent_id, parent_keys) = match parent {
            Some(id) => (Some(id), self.materialized_set_unchecked(id)),
            None => (None, Arc::new(BTreeSet::new())),
        };

        let added_requests: Vec<ResourceRequest> = requests
            .iter()
            .filter(|r| !parent_keys.contains(&r.canonical_key()))
            .cloned()
            .collect();
        let added_keys: BTreeSet<String> = added_requests
            .iter()
            .map(ResourceRequest::canonical_key)
            .collect();

        let id = NodeId(self.next_id);
        self.next_id += 1;
        trace!(%id, parent = ?parent_id, added = added_keys.len(), "Recorded request set");
        self.nodes.insert(
            id,
            RequestNode {
                id,
                parent: parent_id,
                added_requests,
                added_keys,
                metadata,
                materialized: OnceLock::new(),
            },
        );
        id
    }

    /// The node whose materialised set equals the query, if any.
    /// Size-gated: only nodes with the right cardinality are compared.
    #[must_use]
    pub fn find_exact_match(&self, requests: &[ResourceRequest]) -> Option<NodeId> {
        let keys: BTreeSet<String> =
            requests.iter().map(ResourceRequest::canonical_key).collect();
        self.nodes.keys().copied().find(|&id| {
            let set = self.materialized_set_unchecked(id);
            set.len() == keys.len() && *set == keys
        })
    }

    /// The node with the largest materialised set that is a subset of the
    /// query; ties resolve to the lowest node id.
    #[must_use]
    pub fn find_best_match(&self, query: &[ResourceRequest]) -> Option<NodeId> {
        let keys: BTreeSet<String> =
            query.iter().map(ResourceRequest::canonical_key).collect();
        self.best_subset_node(&keys)
    }

    fn best_subset_node(&self, keys: &BTreeSet<String>) -> Option<NodeId> {
        let mut best: Option<(NodeId, usize)> = None;
        for &id in self.nodes.keys() {
            let set = self.materialized_set_unchecked(id);
            if !set.is_subset(keys) {
                continue;
            }
            match best {
                Some((_, size)) if set.len() <= size => {}
                _ => best = Some((id, set.len())),
            }
        }
        best.map(|(id, _)| id)
    }

    /// The full request-key set of a node: its added keys plus everything
    /// up the parent chain. Cached per node.
    pub fn materialized_set(&self, id: NodeId) -> Result<Arc<BTreeSet<String>>> {
        self.node(id)?;
        Ok(self.materialized_set_unchecked(id))
    }

    fn materialized_set_unchecked(&self, id: NodeId) -> Arc<BTreeSet<String>> {
        let Some(node) = self.nodes.get(&id) else {
            return Arc::new(BTreeSet::new());
        };
        node.materialized
            .get_or_init(|| {
                let mut keys = node.added_keys.clone();
                if let Some(parent) = node.parent {
                    keys.extend(self.materialized_set_unchecked(parent).iter().cloned());
                }
                Arc::new(keys)
            })
            .clone()
    }

    /// Parent-before-child traversal over the whole graph; roots first by
    /// id, then each level in id order.
    #[must_use]
    pub fn traverse_by_depth(&self) -> Vec<DepthEntry> {
        let mut children: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        let mut roots: Vec<NodeId> = Vec::new();
        for node in self.nodes.values() {
            match node.parent {
                Some(parent) => children.entry(parent).or_default().push(node.id),
                None => roots.push(node.id),
            }
        }
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut queue: std::collections::VecDeque<(NodeId, usize)> =
            roots.into_iter().map(|id| (id, 0)).collect();
        while let Some((id, depth)) = queue.pop_front() {
            let parent = self.nodes.get(&id).and_then(|n| n.parent);
            order.push(DepthEntry { id, parent, depth });
            if let Some(kids) = children.get(&id) {
                for &kid in kids {
                    queue.push_back((kid, depth + 1));
                }
            }
        }
        order
    }

    /// Parent-before-child traversal of the subtree rooted at `start`.
    pub fn traverse_subtree(&self, start: NodeId) -> Result<Vec<DepthEntry>> {
        self.node(start)?;
        let all = self.traverse_by_depth();
        let mut in_subtree: BTreeSet<NodeId> = BTreeSet::new();
        in_subtree.insert(start);
        let mut result = Vec::new();
        for entry in all {
            let member = entry.id == start
                || entry.parent.is_some_and(|p| in_subtree.contains(&p));
            if member {
                in_subtree.insert(entry.id);
                result.push(entry);
            }
        }
        Ok(result)
    }

    /// Serialise the graph structure (metadata is not part of the cache
    /// object; callers persist per-node state separately).
    #[must_use]
    pub fn to_cache_object(&self) -> RequestGraphCache {
        RequestGraphCache {
            version: CACHE_VERSION,
            next_id: self.next_id,
            nodes: self
                .nodes
                .values()
                .map(|node| NodeCache {
                    id: node.id,
                    parent: node.parent,
                    added_requests: node.added_requests.clone(),
                })
                .collect(),
        }
    }
}

impl<M: Default> RequestGraph<M> {
    /// Restore a graph from its cache object, preserving ids and edges.
    /// Node metadata starts out as `M::default()`.
    pub fn from_cache_object(cache: &RequestGraphCache) -> Result<Self> {
        if cache.version != CACHE_VERSION {
            return Err(Error::UnsupportedVersion {
                found: cache.version,
                supported: CACHE_VERSION,
            });
        }
        let mut nodes = BTreeMap::new();
        for entry in &cache.nodes {
            let added_keys: BTreeSet<String> = entry
                .added_requests
                .iter()
                .map(ResourceRequest::canonical_key)
                .collect();
            if nodes
                .insert(
                    entry.id,
                    RequestNode {
                        id: entry.id,
                        parent: entry.parent,
                        added_requests: entry.added_requests.clone(),
                        added_keys,
                        metadata: M::default(),
                        materialized: OnceLock::new(),
                    },
                )
                .is_some()
            {
                return Err(Error::Corrupt(format!("duplicate node id {}", entry.id)));
            }
        }
        let graph = Self {
            nodes,
            next_id: cache.next_id,
        };
        graph.validate()?;
        Ok(graph)
    }

    fn validate(&self) -> Result<()> {
        for node in self.nodes.values() {
            if node.id.0 >= self.next_id {
                return Err(Error::Corrupt(format!(
                    "node id {} beyond next id {}",
                    node.id, self.next_id
                )));
            }
            // Walk the parent chain; a broken or cyclic chain must fail.
            let mut seen = BTreeSet::new();
            let mut current = node.parent;
            while let Some(parent) = current {
                if !seen.insert(parent) {
                    return Err(Error::Corrupt(format!("cycle through node {parent}")));
                }
                let parent_node = self
                    .nodes
                    .get(&parent)
                    .ok_or_else(|| Error::Corrupt(format!("missing parent {parent}")))?;
                current = parent_node.parent;
            }
        }
        Ok(())
    }
}

/// JSON-serialisable form of a request graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestGraphCache {
    pub version: u32,
    pub next_id: u32,
    pub nodes: Vec<NodeCache>,
}

/// One serialised node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCache {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeId>,
    pub added_requests: Vec<ResourceRequest>,
}
