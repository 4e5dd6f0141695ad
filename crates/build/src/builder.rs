//! The multi-project builder.
//!
//! Walks the project graph in dependency order, restores or creates each
//! project's build cache, runs the composed task list, persists the
//! manifest on success, and delivers every finished project's changed
//! resource paths to its dependents' caches.

use crate::definitions::compose_task_list;
use crate::runner::{TaskRunOutcome, TaskRunner};
use crate::task::TaskRegistry;
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uibuild_cache::ProjectBuildCache;
use uibuild_cas::BlobStore;
use uibuild_core::{
    BuildConfiguration, CombinedReader, MemoryReader, Project, ProjectGraph, Reader,
};

/// Which projects a build run covers. Transitive dependencies of the
/// requested projects are always included.
#[derive(Debug, Default, Clone)]
pub struct BuildRequest {
    /// `None` builds every project in the graph.
    pub projects: Option<Vec<String>>,
}

impl BuildRequest {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn for_projects(projects: impl IntoIterator<Item = String>) -> Self {
        Self {
            projects: Some(projects.into_iter().collect()),
        }
    }
}

/// What one build run did.
#[derive(Debug, Default)]
pub struct BuildSummary {
    /// Projects built, in execution order.
    pub built: Vec<String>,
    /// Per project: the resource paths the build modified.
    pub changed_paths: BTreeMap<String, Vec<String>>,
    /// Per project: the per-task outcome.
    pub task_outcomes: BTreeMap<String, TaskRunOutcome>,
}

type CleanupFn = Box<dyn FnMut() + Send>;

/// Orchestrates builds across the whole project graph.
pub struct Builder {
    graph: ProjectGraph,
    workspaces: BTreeMap<String, MemoryReader>,
    store: Arc<BlobStore>,
    configuration: BuildConfiguration,
    registry: Arc<TaskRegistry>,
    caches: BTreeMap<String, ProjectBuildCache>,
    cancellation: CancellationToken,
    cleanup: Vec<CleanupFn>,
    tool_version: String,
}

impl Builder {
    pub fn new(
        graph: ProjectGraph,
        workspaces: BTreeMap<String, MemoryReader>,
        store: Arc<BlobStore>,
        configuration: BuildConfiguration,
        registry: Arc<TaskRegistry>,
    ) -> Self {
        Self {
            graph,
            workspaces,
            store,
            configuration,
            registry,
            caches: BTreeMap::new(),
            cancellation: CancellationToken::new(),
            cleanup: Vec::new(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    #[must_use]
    pub fn graph(&self) -> &ProjectGraph {
        &self.graph
    }

    #[must_use]
    pub fn workspace(&self, project_id: &str) -> Option<&MemoryReader> {
        self.workspaces.get(project_id)
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Register a cleanup callback executed after every build run,
    /// successful or not.
    pub fn register_cleanup(&mut self, callback: CleanupFn) {
        self.cleanup.push(callback);
    }

    /// The projects transitively affected by changes in the given ones
    /// (including themselves).
    pub fn affected_projects(&self, changed: &[String]) -> Result<Vec<String>> {
        let mut affected: BTreeSet<String> = BTreeSet::new();
        for project_id in changed {
            affected.insert(project_id.clone());
            for dependent in self.graph.dependents_of(project_id)? {
                affected.insert(dependent);
            }
        }
        Ok(affected.into_iter().collect())
    }

    /// Deliver a source-change notification for one project. Returns the
    /// transitively affected projects (including the changed one).
    pub async fn invalidate_project_sources(
        &mut self,
        project_id: &str,
        paths: &[String],
    ) -> Result<Vec<String>> {
        if let Some(cache) = self.caches.get_mut(project_id) {
            cache.project_sources_changed(paths).await?;
        }
        self.affected_projects(std::slice::from_ref(&project_id.to_string()))
    }

    /// Run one build over the requested projects (plus their transitive
    /// dependencies), in dependency order. Cleanup callbacks run on both
    /// success and failure.
    pub async fn build(&mut self, request: BuildRequest) -> Result<BuildSummary> {
        let (summary, error) = self.try_build(request).await;
        match error {
            None => Ok(summary),
            Some(e) => Err(e),
        }
    }

    /// Like [`Builder::build`], but reports partial success: projects built
    /// before a failure are listed in the summary alongside the error.
    pub async fn try_build(&mut self, request: BuildRequest) -> (BuildSummary, Option<Error>) {
        let mut summary = BuildSummary::default();
        let result = self.build_inner(request, &mut summary).await;
        self.execute_cleanup_tasks();
        (summary, result.err())
    }

    #[instrument(skip_all)]
    async fn build_inner(
        &mut self,
        request: BuildRequest,
        summary: &mut BuildSummary,
    ) -> Result<()> {
        let included = self.included_projects(&request)?;
        let order: Vec<String> = self
            .graph
            .topological_order()?
            .into_iter()
            .map(|p| p.id.clone())
            .filter(|id| included.contains(id))
            .collect();
        info!(projects = order.len(), "Starting build");

        for project_id in order {
            if self.cancellation.is_cancelled() {
                return Err(Error::BuildAborted);
            }
            let project = self
                .graph
                .get(&project_id)
                .ok_or_else(|| Error::configuration(format!("unknown project '{project_id}'")))?
                .clone();

            let workspace = self
                .workspaces
                .get(&project_id)
                .ok_or_else(|| {
                    Error::configuration(format!("no workspace for project '{project_id}'"))
                })?
                .clone();
            let dependency_reader = self.dependency_reader(&project_id)?;

            self.ensure_cache(&project, &workspace, dependency_reader.clone())
                .await?;
            let cache = self
                .caches
                .get_mut(&project_id)
                .ok_or_else(|| Error::configuration("cache vanished".to_string()))?;

            // Dependencies may have changed between builds independently
            // of the invalidation stream.
            cache.refresh_dependency_indices().await?;

            let tasks = compose_task_list(&project, &self.configuration.excluded_tasks)?;
            let runner =
                TaskRunner::with_cancellation(Arc::clone(&self.registry), self.cancellation.clone());
            let outcome = runner
                .run_project_tasks(&project, &tasks, cache, &workspace, dependency_reader)
                .await?;
            cache.persist_manifest().await?;
            let changed = cache.all_tasks_completed();
            debug!(project = %project_id, changed = changed.len(), "Project build finished");

            for dependent in self.graph.dependents_of(&project_id)? {
                if let Some(dependent_cache) = self.caches.get_mut(&dependent) {
                    dependent_cache
                        .dependency_resources_changed(&changed)
                        .await?;
                }
            }

            summary.built.push(project_id.clone());
            summary.changed_paths.insert(project_id.clone(), changed);
            summary.task_outcomes.insert(project_id, outcome);
        }
        Ok(())
    }

    fn included_projects(&self, request: &BuildRequest) -> Result<BTreeSet<String>> {
        let roots: Vec<String> = match &request.projects {
            None => self.graph.iter().map(|p| p.id.clone()).collect(),
            Some(projects) => projects.clone(),
        };
        let mut included: BTreeSet<String> = BTreeSet::new();
        for root in roots {
            if !self.graph.contains(&root) {
                return Err(Error::Core(uibuild_core::Error::UnknownProject(root)));
            }
            for dependency in self.graph.transitive_dependencies(&root)? {
                included.insert(dependency);
            }
            included.insert(root);
        }
        Ok(included)
    }

    fn dependency_reader(&self, project_id: &str) -> Result<Option<Arc<dyn Reader>>> {
        let dependencies = self.graph.transitive_dependencies(project_id)?;
        if dependencies.is_empty() {
            return Ok(None);
        }
        let mut combined = CombinedReader::default();
        for dependency in &dependencies {
            if let Some(workspace) = self.workspaces.get(dependency) {
                combined.push(Arc::new(workspace.clone()));
            }
        }
        Ok(Some(Arc::new(combined)))
    }

    async fn ensure_cache(
        &mut self,
        project: &Project,
        workspace: &MemoryReader,
        dependency_reader: Option<Arc<dyn Reader>>,
    ) -> Result<()> {
        if self.caches.contains_key(&project.id) {
            return Ok(());
        }
        let dependencies: Vec<(String, String)> = self
            .graph
            .transitive_dependencies(&project.id)?
            .into_iter()
            .filter_map(|id| {
                self.graph
                    .get(&id)
                    .map(|p| (p.id.clone(), p.version.clone()))
            })
            .collect();
        let mut cache = ProjectBuildCache::new(
            project,
            self.configuration.clone(),
            &dependencies,
            Arc::clone(&self.store),
            Arc::new(workspace.clone()),
            dependency_reader,
            &self.tool_version,
        )?;
        cache.restore().await?;
        self.caches.insert(project.id.clone(), cache);
        Ok(())
    }

    fn execute_cleanup_tasks(&mut self) {
        for callback in &mut self.cleanup {
            callback();
        }
    }
}
