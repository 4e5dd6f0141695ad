//! Project model and the inter-project dependency graph.
//!
//! The graph is read-only to the cache layers: the builder walks it in
//! dependency order, the watcher uses it for invalidation fan-out, and the
//! build signature incorporates the ordered dependency identities.

use crate::{Error, Result};
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use tracing::debug;

/// The kind of a project, determining its standard task list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectKind {
    Application,
    Library,
    Component,
    Module,
    ThemeLibrary,
}

impl ProjectKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectKind::Application => "application",
            ProjectKind::Library => "library",
            ProjectKind::Component => "component",
            ProjectKind::Module => "module",
            ProjectKind::ThemeLibrary => "theme-library",
        }
    }
}

impl std::fmt::Display for ProjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A custom task contributed by project configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomTaskDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_task: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub configuration: serde_json::Value,
}

/// A reference to a build extension contributed by the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionRef {
    pub id: String,
    pub version: String,
}

/// One project in the workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub version: String,
    pub kind: ProjectKind,
    /// Virtual-path prefix this project's resources live under,
    /// e.g. `/resources/my/app`.
    pub namespace: String,
    /// Filesystem root of the project's sources.
    pub source_root: PathBuf,
    #[serde(default)]
    pub custom_tasks: Vec<CustomTaskDef>,
    #[serde(default)]
    pub extensions: Vec<ExtensionRef>,
    #[serde(default)]
    pub middleware: Vec<String>,
}

/// Directed graph of projects, edges pointing dependency -> dependent.
#[derive(Debug)]
pub struct ProjectGraph {
    graph: DiGraph<Project, ()>,
    name_to_node: HashMap<String, NodeIndex>,
    declared_deps: Vec<(String, String)>,
}

impl Default for ProjectGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectGraph {
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            name_to_node: HashMap::new(),
            declared_deps: Vec::new(),
        }
    }

    /// Add a project to the graph. Re-inserting a known id is a no-op.
    pub fn insert(&mut self, project: Project) -> NodeIndex {
        if let Some(&node) = self.name_to_node.get(&project.id) {
            return node;
        }
        let id = project.id.clone();
        let node = self.graph.add_node(project);
        self.name_to_node.insert(id.clone(), node);
        debug!("Added project node '{id}'");
        node
    }

    /// Declare that `dependent` depends on `dependency`.
    ///
    /// Edges are resolved by [`ProjectGraph::resolve_edges`] once all
    /// projects are inserted.
    pub fn declare_dependency(&mut self, dependent: &str, dependency: &str) {
        self.declared_deps
            .push((dependent.to_string(), dependency.to_string()));
    }

    /// Resolve all declared dependencies into edges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingDependencies`] when a declared dependency
    /// names an unknown project, [`Error::CycleDetected`] for cycles.
    pub fn resolve_edges(&mut self) -> Result<()> {
        let mut missing = Vec::new();
        let mut edges = Vec::new();
        for (dependent, dependency) in &self.declared_deps {
            match (
                self.name_to_node.get(dependent),
                self.name_to_node.get(dependency),
            ) {
                (Some(&to), Some(&from)) => edges.push((from, to)),
                _ => missing.push((dependent.clone(), dependency.clone())),
            }
        }
        if !missing.is_empty() {
            return Err(Error::MissingDependencies { missing });
        }
        for (from, to) in edges {
            self.graph.update_edge(from, to, ());
        }
        if is_cyclic_directed(&self.graph) {
            return Err(Error::CycleDetected);
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Project> {
        self.name_to_node.get(id).map(|&idx| &self.graph[idx])
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.name_to_node.contains_key(id)
    }

    /// All projects, dependencies before dependents.
    pub fn topological_order(&self) -> Result<Vec<&Project>> {
        toposort(&self.graph, None)
            .map(|sorted| sorted.into_iter().map(|idx| &self.graph[idx]).collect())
            .map_err(|_| Error::CycleDetected)
    }

    /// Transitive dependencies of a project (excluding itself), sorted.
    pub fn transitive_dependencies(&self, id: &str) -> Result<Vec<String>> {
        self.reachable(id, Direction::Incoming)
    }

    /// Transitive dependents of a project (excluding itself), sorted.
    ///
    /// This is the invalidation fan-out: when a project's resources change,
    /// everything returned here must be considered affected.
    pub fn dependents_of(&self, id: &str) -> Result<Vec<String>> {
        self.reachable(id, Direction::Outgoing)
    }

    fn reachable(&self, id: &str, direction: Direction) -> Result<Vec<String>> {
        let &start = self
            .name_to_node
            .get(id)
            .ok_or_else(|| Error::UnknownProject(id.to_string()))?;
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for neighbor in self.graph.neighbors_directed(node, direction) {
                let name = self.graph[neighbor].id.clone();
                if seen.insert(name) {
                    stack.push(neighbor);
                }
            }
        }
        seen.remove(id);
        Ok(seen.into_iter().collect())
    }

    /// Iterate all projects in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Project> {
        self.graph.node_weights()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}
