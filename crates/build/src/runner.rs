//! The task runner: drives one project's ordered task list against the
//! build cache.

use crate::definitions::TaskSpec;
use crate::monitor::MonitoredReader;
use crate::task::{ProjectStage, TaskContext, TaskRegistry};
use crate::{Error, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uibuild_cache::{ProjectBuildCache, TaskCacheDecision};
use uibuild_core::{MemoryReader, Project, Reader};

/// What happened to each task of one project run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TaskRunOutcome {
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
    /// Subset of `executed` that ran in differential mode.
    pub differential: Vec<String>,
}

/// Executes a composed task list for one project.
pub struct TaskRunner {
    registry: Arc<TaskRegistry>,
    cancellation: CancellationToken,
}

impl TaskRunner {
    #[must_use]
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self::with_cancellation(registry, CancellationToken::new())
    }

    #[must_use]
    pub fn with_cancellation(registry: Arc<TaskRegistry>, cancellation: CancellationToken) -> Self {
        Self {
            registry,
            cancellation,
        }
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Run the composed task list.
    ///
    /// Per task: consult the cache decision; skipped tasks restore their
    /// stage from the store, everything else executes against monitored
    /// readers and records its reads and outputs. The cancellation token
    /// is checked between tasks.
    #[instrument(skip_all, fields(project = %project.id))]
    pub async fn run_project_tasks(
        &self,
        project: &Project,
        tasks: &[TaskSpec],
        cache: &mut ProjectBuildCache,
        workspace: &MemoryReader,
        dependencies: Option<Arc<dyn Reader>>,
    ) -> Result<TaskRunOutcome> {
        // Validate the whole list up front; a broken definition is fatal
        // before any task runs.
        for spec in tasks {
            if !self.registry.contains(spec.base_name()) {
                return Err(Error::configuration(format!(
                    "No implementation registered for task '{}'",
                    spec.name
                )));
            }
        }

        let mut outcome = TaskRunOutcome::default();
        for spec in tasks {
            if self.cancellation.is_cancelled() {
                return Err(Error::BuildAborted);
            }

            let decision = cache.prepare_task_execution(&spec.name).await?;
            if decision == TaskCacheDecision::Skip {
                let outputs = cache.restore_task_outputs(&spec.name).await?;
                for (path, bytes) in outputs {
                    workspace.insert(path, bytes);
                }
                cache.record_task_skipped(&spec.name);
                debug!(task = %spec.name, "Skipped task, outputs restored from cache");
                outcome.skipped.push(spec.name.clone());
                continue;
            }

            let task = self
                .registry
                .get(spec.base_name())
                .ok_or_else(|| Error::configuration(format!("unknown task '{}'", spec.name)))?;

            let used_info = match decision {
                TaskCacheDecision::Differential(info) if task.supports_differential() => {
                    Some(info)
                }
                _ => None,
            };

            let monitored_workspace = MonitoredReader::new(Arc::new(workspace.clone()));
            let monitored_dependencies = dependencies
                .as_ref()
                .map(|reader| MonitoredReader::new(Arc::clone(reader)));
            let mut stage = ProjectStage::new();

            {
                let mut ctx = TaskContext {
                    workspace: &monitored_workspace,
                    dependencies: monitored_dependencies.as_ref(),
                    stage: &mut stage,
                    params: &spec.params,
                    changed: used_info.as_ref(),
                    project,
                };
                task.execute(&mut ctx)
                    .await
                    .map_err(|e| Error::TaskExecutionFailed {
                        task: spec.name.clone(),
                        message: e.to_string(),
                    })?;
            }

            let outputs = stage.into_outputs();
            for (path, bytes) in &outputs {
                workspace.insert(path.clone(), bytes.clone());
            }

            let project_recording = monitored_workspace.take_recording();
            let dependency_recording =
                monitored_dependencies.as_ref().map(|m| m.take_recording());
            cache
                .record_task_result(
                    &spec.name,
                    &project_recording,
                    dependency_recording.as_ref(),
                    &outputs,
                    used_info.as_ref(),
                    task.supports_differential(),
                )
                .await?;

            if used_info.is_some() {
                outcome.differential.push(spec.name.clone());
            }
            info!(task = %spec.name, outputs = outputs.len(), "Executed task");
            outcome.executed.push(spec.name.clone());
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::compose_task_list;
    use crate::standard::standard_registry;
    use crate::task::{BuildTask, TaskError};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use uibuild_cas::BlobStore;
    use uibuild_core::{BuildConfiguration, ProjectKind};

    fn app_project() -> Project {
        Project {
            id: "my.app".into(),
            version: "1.0.0".into(),
            kind: ProjectKind::Application,
            namespace: "/resources/my/app".into(),
            source_root: PathBuf::from("/src"),
            custom_tasks: Vec::new(),
            extensions: Vec::new(),
            middleware: Vec::new(),
        }
    }

    struct Fixture {
        _tmp: TempDir,
        workspace: MemoryReader,
        cache: ProjectBuildCache,
        project: Project,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(BlobStore::new(tmp.path()));
        let workspace = MemoryReader::new();
        workspace.insert(
            "/resources/my/app/Component.js",
            "// ${copyright}\nfunction Component() {}\n",
        );
        workspace.insert(
            "/resources/my/app/util.js",
            "function util() { return '${version}'; }\n",
        );
        let project = app_project();
        let cache = ProjectBuildCache::new(
            &project,
            BuildConfiguration::default(),
            &[],
            store,
            Arc::new(workspace.clone()),
            None,
            "0.3.1",
        )
        .unwrap();
        Fixture {
            _tmp: tmp,
            workspace,
            cache,
            project,
        }
    }

    #[tokio::test]
    async fn full_pipeline_executes_then_skips() {
        let mut fx = fixture();
        let registry = Arc::new(standard_registry());
        let tasks = compose_task_list(&fx.project, &[]).unwrap();
        let runner = TaskRunner::new(Arc::clone(&registry));

        let first = runner
            .run_project_tasks(&fx.project, &tasks, &mut fx.cache, &fx.workspace, None)
            .await
            .unwrap();
        assert_eq!(first.executed.len(), tasks.len());
        assert!(first.skipped.is_empty());

        // Placeholders were replaced and artifacts produced.
        let component = fx
            .workspace
            .by_path("/resources/my/app/Component.js")
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&component.buffer()).contains("(c) my.app"));
        assert!(fx
            .workspace
            .by_path("/resources/my/app/Component-preload.js")
            .await
            .is_some());
        assert!(fx
            .workspace
            .by_path("/resources/my/app/version.json")
            .await
            .is_some());

        // Unchanged inputs: everything skips on the next run.
        let second = runner
            .run_project_tasks(&fx.project, &tasks, &mut fx.cache, &fx.workspace, None)
            .await
            .unwrap();
        assert!(second.executed.is_empty());
        assert_eq!(second.skipped.len(), tasks.len());
    }

    #[tokio::test]
    async fn changed_source_reruns_affected_tasks_differentially() {
        let mut fx = fixture();
        let registry = Arc::new(standard_registry());
        let tasks = compose_task_list(&fx.project, &[]).unwrap();
        let runner = TaskRunner::new(Arc::clone(&registry));

        runner
            .run_project_tasks(&fx.project, &tasks, &mut fx.cache, &fx.workspace, None)
            .await
            .unwrap();

        fx.workspace.insert(
            "/resources/my/app/util.js",
            "function util() { return 'changed'; }\n",
        );
        fx.cache
            .project_sources_changed(&["/resources/my/app/util.js".to_string()])
            .await
            .unwrap();

        let rerun = runner
            .run_project_tasks(&fx.project, &tasks, &mut fx.cache, &fx.workspace, None)
            .await
            .unwrap();
        // The minify task re-ran differentially over the one changed path.
        assert!(rerun.differential.contains(&"minify".to_string()));
        // The metadata-only task still skips: its inputs did not change.
        assert!(rerun.skipped.contains(&"generate-version-info".to_string()));
    }

    #[tokio::test]
    async fn failing_task_aborts_downstream() {
        struct Boom;
        #[async_trait]
        impl BuildTask for Boom {
            async fn execute(&self, _ctx: &mut TaskContext<'_>) -> std::result::Result<(), TaskError> {
                Err("exploded".into())
            }
        }
        struct Counter(Arc<AtomicUsize>);
        #[async_trait]
        impl BuildTask for Counter {
            async fn execute(&self, _ctx: &mut TaskContext<'_>) -> std::result::Result<(), TaskError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let mut fx = fixture();
        let count = Arc::new(AtomicUsize::new(0));
        let mut registry = TaskRegistry::new();
        registry.register("boom", Arc::new(Boom));
        registry.register("after", Arc::new(Counter(Arc::clone(&count))));
        let runner = TaskRunner::new(Arc::new(registry));

        let tasks = vec![
            TaskSpec {
                name: "boom".into(),
                params: serde_json::Value::Null,
            },
            TaskSpec {
                name: "after".into(),
                params: serde_json::Value::Null,
            },
        ];
        let err = runner
            .run_project_tasks(&fx.project, &tasks, &mut fx.cache, &fx.workspace, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TaskExecutionFailed { ref task, .. } if task == "boom"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_implementation_fails_before_any_task() {
        struct Counter(Arc<AtomicUsize>);
        #[async_trait]
        impl BuildTask for Counter {
            async fn execute(&self, _ctx: &mut TaskContext<'_>) -> std::result::Result<(), TaskError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let mut fx = fixture();
        let count = Arc::new(AtomicUsize::new(0));
        let mut registry = TaskRegistry::new();
        registry.register("known", Arc::new(Counter(Arc::clone(&count))));
        let runner = TaskRunner::new(Arc::new(registry));

        let tasks = vec![
            TaskSpec {
                name: "known".into(),
                params: serde_json::Value::Null,
            },
            TaskSpec {
                name: "unknown".into(),
                params: serde_json::Value::Null,
            },
        ];
        let err = runner
            .run_project_tasks(&fx.project, &tasks, &mut fx.cache, &fx.workspace, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_between_tasks() {
        let mut fx = fixture();
        let registry = Arc::new(standard_registry());
        let tasks = compose_task_list(&fx.project, &[]).unwrap();
        let runner = TaskRunner::new(registry);
        runner.cancellation_token().cancel();

        let err = runner
            .run_project_tasks(&fx.project, &tasks, &mut fx.cache, &fx.workspace, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BuildAborted));
    }
}
