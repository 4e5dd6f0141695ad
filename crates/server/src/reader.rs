//! Scoped build readers: read access that lazily triggers builds.

use crate::server::BuildServer;
use async_trait::async_trait;
use std::sync::Arc;
use uibuild_core::{CombinedReader, Reader, Resource};

/// Which projects a [`BuildReader`] exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderScope {
    AllProjects,
    RootProjectOnly,
    DependenciesOnly,
}

/// A reader over built output: `by_path` routes to the owning project by
/// longest-matching namespace prefix (falling back to a scan of every
/// project in scope on a miss); `by_glob` dispatches to a combined reader
/// over the full project set. Every access first ensures the involved
/// projects are built.
pub struct BuildReader {
    server: BuildServer,
    scope: ReaderScope,
}

impl BuildServer {
    /// One of the three scoped readers.
    #[must_use]
    pub fn reader(&self, scope: ReaderScope) -> BuildReader {
        BuildReader {
            server: self.clone(),
            scope,
        }
    }
}

impl BuildReader {
    fn scope_projects(&self) -> Vec<String> {
        let root = self.server.root_project();
        self.server
            .projects()
            .iter()
            .filter(|p| match self.scope {
                ReaderScope::AllProjects => true,
                ReaderScope::RootProjectOnly => p.as_str() == root,
                ReaderScope::DependenciesOnly => p.as_str() != root,
            })
            .cloned()
            .collect()
    }

    /// Await the project's build; failures surface as an `error` event and
    /// read as a miss.
    async fn ensure_built(&self, project: &str) -> bool {
        match self.server.enqueue_build(project) {
            Ok(promise) => match promise.await {
                Ok(()) => true,
                Err(message) => {
                    self.server
                        .emit_error(format!("build of '{project}' failed: {message}"));
                    false
                }
            },
            Err(e) => {
                self.server.emit_error(e.to_string());
                false
            }
        }
    }
}

#[async_trait]
impl Reader for BuildReader {
    async fn by_path(&self, virtual_path: &str) -> Option<Arc<Resource>> {
        let scope = self.scope_projects();

        if let Some(project) = self.server.route(virtual_path, &scope) {
            if self.ensure_built(&project).await {
                if let Some(workspace) = self.server.workspace_snapshot(&project).await {
                    if let Some(resource) = workspace.by_path(virtual_path).await {
                        return Some(resource);
                    }
                }
            }
        }

        // Miss: search every project in scope.
        for project in &scope {
            let _ = self.ensure_built(project).await;
        }
        for project in &scope {
            if let Some(workspace) = self.server.workspace_snapshot(project).await {
                if let Some(resource) = workspace.by_path(virtual_path).await {
                    return Some(resource);
                }
            }
        }
        None
    }

    async fn by_glob(&self, patterns: &[String]) -> Vec<Arc<Resource>> {
        // Globs always run over the full project set.
        let all: Vec<String> = self.server.projects().to_vec();
        for project in &all {
            let _ = self.ensure_built(project).await;
        }
        let mut combined = CombinedReader::default();
        for project in &all {
            if let Some(workspace) = self.server.workspace_snapshot(project).await {
                combined.push(Arc::new(workspace));
            }
        }
        combined.by_glob(patterns).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use uibuild_build::{standard_registry, Builder};
    use uibuild_cas::BlobStore;
    use uibuild_core::{
        BuildConfiguration, MemoryReader, Project, ProjectGraph, ProjectKind,
    };

    fn scoped_fixture(tmp: &TempDir) -> crate::server::BuildServer {
        let mut graph = ProjectGraph::new();
        for (id, kind) in [
            ("my.app", ProjectKind::Application),
            ("my.lib", ProjectKind::Library),
        ] {
            graph.insert(Project {
                id: id.to_string(),
                version: "1.0.0".to_string(),
                kind,
                namespace: format!("/resources/{}", id.replace('.', "/")),
                source_root: tmp.path().join(id),
                custom_tasks: Vec::new(),
                extensions: Vec::new(),
                middleware: Vec::new(),
            });
        }
        graph.declare_dependency("my.app", "my.lib");
        graph.resolve_edges().unwrap();

        let app_workspace = MemoryReader::new();
        app_workspace.insert(
            "/resources/my/app/Component.js",
            "function Component() {}\n",
        );
        let lib_workspace = MemoryReader::new();
        lib_workspace.insert("/resources/my/lib/core.js", "function core() {}\n");
        let mut workspaces = BTreeMap::new();
        workspaces.insert("my.app".to_string(), app_workspace);
        workspaces.insert("my.lib".to_string(), lib_workspace);

        let builder = Builder::new(
            graph,
            workspaces,
            std::sync::Arc::new(BlobStore::new(tmp.path().join("store"))),
            BuildConfiguration::default(),
            std::sync::Arc::new(standard_registry()),
        );
        crate::server::BuildServer::new(builder, "my.app").unwrap()
    }

    #[tokio::test]
    async fn by_path_triggers_a_lazy_build() {
        let tmp = TempDir::new().unwrap();
        let server = scoped_fixture(&tmp);
        let reader = server.reader(ReaderScope::AllProjects);

        // version.json only exists after the application build ran.
        let resource = reader
            .by_path("/resources/my/app/version.json")
            .await
            .expect("built artifact");
        assert!(String::from_utf8_lossy(&resource.buffer()).contains("my.app"));
    }

    #[tokio::test]
    async fn scopes_partition_the_project_set() {
        let tmp = TempDir::new().unwrap();
        let server = scoped_fixture(&tmp);

        let root_only = server.reader(ReaderScope::RootProjectOnly);
        assert!(root_only
            .by_path("/resources/my/app/Component.js")
            .await
            .is_some());
        assert!(root_only
            .by_path("/resources/my/lib/core.js")
            .await
            .is_none());

        let deps_only = server.reader(ReaderScope::DependenciesOnly);
        assert!(deps_only
            .by_path("/resources/my/lib/core.js")
            .await
            .is_some());
        assert!(deps_only
            .by_path("/resources/my/app/Component.js")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn glob_dispatches_over_the_full_set() {
        let tmp = TempDir::new().unwrap();
        let server = scoped_fixture(&tmp);
        let reader = server.reader(ReaderScope::RootProjectOnly);

        let hits = reader.by_glob(&["**/core.js".to_string()]).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path(), "/resources/my/lib/core.js");
    }

    #[tokio::test]
    async fn fallback_scan_finds_unrouted_paths() {
        let tmp = TempDir::new().unwrap();
        let server = scoped_fixture(&tmp);
        // Insert a resource outside any namespace prefix.
        server
            .workspace_snapshot("my.lib")
            .await
            .unwrap()
            .insert("/odd/location/x.js", "x");

        let reader = server.reader(ReaderScope::AllProjects);
        assert!(reader.by_path("/odd/location/x.js").await.is_some());
    }

    #[tokio::test]
    async fn cycles_of_dirty_projects_rebuild_on_next_access() {
        let tmp = TempDir::new().unwrap();
        let server = scoped_fixture(&tmp);
        let reader = server.reader(ReaderScope::AllProjects);

        let before = reader
            .by_path("/resources/my/app/Component.min.js")
            .await
            .expect("minified output");

        // Mutate the workspace and invalidate through the builder, as the
        // watcher would.
        {
            let mut builder = server.inner.builder.lock().await;
            builder
                .workspace("my.app")
                .unwrap()
                .insert("/resources/my/app/Component.js", "function Component() { /* v2 */ }\n");
            builder
                .invalidate_project_sources(
                    "my.app",
                    &["/resources/my/app/Component.js".to_string()],
                )
                .await
                .unwrap();
        }

        let after = reader
            .by_path("/resources/my/app/Component.min.js")
            .await
            .expect("refreshed output");
        assert_ne!(before.buffer(), after.buffer());
        assert!(String::from_utf8_lossy(&after.buffer()).contains("v2"));
    }
}

