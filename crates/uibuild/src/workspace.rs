//! Workspace descriptor loading.
//!
//! The workspace under build is described by a `uibuild.json` document:
//! project identities, kinds, namespaces, source directories and
//! dependencies. Source trees are snapshotted into in-memory workspaces at
//! load time; the watcher keeps them in sync afterwards.

use crate::cli::CliError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uibuild_core::{CustomTaskDef, ExtensionRef, MemoryReader, Project, ProjectGraph, ProjectKind};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct WorkspaceDescriptor {
    projects: Vec<ProjectDescriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ProjectDescriptor {
    id: String,
    version: String,
    kind: ProjectKind,
    /// Defaults to `/resources/<id with dots as slashes>`.
    #[serde(default)]
    namespace: Option<String>,
    source_root: PathBuf,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    custom_tasks: Vec<CustomTaskDef>,
    #[serde(default)]
    extensions: Vec<ExtensionRef>,
    #[serde(default)]
    middleware: Vec<String>,
}

/// A loaded workspace: the project graph plus one in-memory reader per
/// project.
#[derive(Debug)]
pub struct Workspace {
    pub graph: ProjectGraph,
    pub workspaces: BTreeMap<String, MemoryReader>,
    /// The project every other one is a dependency of, if the graph has a
    /// unique sink; used as the server's root project.
    pub root_project: Option<String>,
}

/// Load and snapshot a workspace from its descriptor file.
pub fn load(config_path: &Path) -> Result<Workspace, CliError> {
    let text = std::fs::read_to_string(config_path).map_err(|e| {
        CliError::config_with_help(
            format!("Cannot read '{}': {e}", config_path.display()),
            "Run uibuild from a directory containing uibuild.json, or pass --config.",
        )
    })?;
    let descriptor: WorkspaceDescriptor = serde_json::from_str(&text)
        .map_err(|e| CliError::config(format!("Invalid workspace descriptor: {e}")))?;
    if descriptor.projects.is_empty() {
        return Err(CliError::config("Workspace descriptor lists no projects"));
    }

    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    let mut graph = ProjectGraph::new();
    let mut workspaces = BTreeMap::new();

    for entry in &descriptor.projects {
        let namespace = entry
            .namespace
            .clone()
            .unwrap_or_else(|| format!("/resources/{}", entry.id.replace('.', "/")));
        let source_root = if entry.source_root.is_absolute() {
            entry.source_root.clone()
        } else {
            base_dir.join(&entry.source_root)
        };

        let reader = MemoryReader::new();
        if source_root.is_dir() {
            reader.load_dir(&source_root, &namespace)?;
        } else {
            tracing::warn!(
                project = %entry.id,
                root = %source_root.display(),
                "Source root does not exist; project starts empty"
            );
        }
        workspaces.insert(entry.id.clone(), reader);

        graph.insert(Project {
            id: entry.id.clone(),
            version: entry.version.clone(),
            kind: entry.kind,
            namespace,
            source_root,
            custom_tasks: entry.custom_tasks.clone(),
            extensions: entry.extensions.clone(),
            middleware: entry.middleware.clone(),
        });
    }
    for entry in &descriptor.projects {
        for dependency in &entry.dependencies {
            graph.declare_dependency(&entry.id, dependency);
        }
    }
    graph.resolve_edges()?;

    let root_project = unique_sink(&graph);
    Ok(Workspace {
        graph,
        workspaces,
        root_project,
    })
}

/// The unique project nothing depends on, if there is exactly one.
fn unique_sink(graph: &ProjectGraph) -> Option<String> {
    let mut sinks = graph.iter().filter_map(|p| {
        match graph.dependents_of(&p.id) {
            Ok(dependents) if dependents.is_empty() => Some(p.id.clone()),
            _ => None,
        }
    });
    let first = sinks.next()?;
    if sinks.next().is_some() {
        return None;
    }
    Some(first)
}
