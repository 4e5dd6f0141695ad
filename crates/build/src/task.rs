//! The task contract: what a build task sees and produces.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use uibuild_cache::CacheInfo;
use uibuild_core::Project;

use crate::monitor::MonitoredReader;

/// Error type task bodies surface; wrapped into
/// [`crate::Error::TaskExecutionFailed`] by the runner.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// Everything one task execution can touch.
pub struct TaskContext<'a> {
    /// Monitored view of the project workspace; every read is recorded.
    pub workspace: &'a MonitoredReader,
    /// Monitored view of the dependency resources, when the project has
    /// dependencies.
    pub dependencies: Option<&'a MonitoredReader>,
    /// The task's writable stage.
    pub stage: &'a mut ProjectStage,
    /// Task parameters from the project configuration.
    pub params: &'a serde_json::Value,
    /// Set in differential mode: the task may process only these paths.
    pub changed: Option<&'a CacheInfo>,
    pub project: &'a Project,
}

/// A build task implementation.
#[async_trait]
pub trait BuildTask: Send + Sync {
    /// Whether this task can re-run over changed paths only.
    fn supports_differential(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &mut TaskContext<'_>) -> std::result::Result<(), TaskError>;
}

/// A task's writable output view within one build.
#[derive(Debug, Default)]
pub struct ProjectStage {
    written: Vec<(String, Bytes)>,
}

impl ProjectStage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a resource into the stage.
    pub fn write(&mut self, path: impl Into<String>, content: impl Into<Bytes>) {
        self.written.push((path.into(), content.into()));
    }

    #[must_use]
    pub fn outputs(&self) -> &[(String, Bytes)] {
        &self.written
    }

    #[must_use]
    pub fn into_outputs(self) -> Vec<(String, Bytes)> {
        self.written
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.written.is_empty()
    }
}

/// Host-registered task implementations, looked up by name.
#[derive(Default, Clone)]
pub struct TaskRegistry {
    tasks: BTreeMap<String, Arc<dyn BuildTask>>,
}

impl TaskRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, task: Arc<dyn BuildTask>) {
        self.tasks.insert(name.into(), task);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn BuildTask>> {
        self.tasks.get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_collects_writes_in_order() {
        let mut stage = ProjectStage::new();
        stage.write("/dist/a.js", "a");
        stage.write("/dist/b.js", "b");
        let outputs = stage.into_outputs();
        assert_eq!(outputs[0].0, "/dist/a.js");
        assert_eq!(outputs[1].0, "/dist/b.js");
    }

    #[test]
    fn registry_lookup() {
        struct Noop;
        #[async_trait]
        impl BuildTask for Noop {
            async fn execute(
                &self,
                _ctx: &mut TaskContext<'_>,
            ) -> std::result::Result<(), TaskError> {
                Ok(())
            }
        }

        let mut registry = TaskRegistry::new();
        registry.register("noop", Arc::new(Noop));
        assert!(registry.contains("noop"));
        assert!(registry.get("missing").is_none());
    }
}
