//! The per-task cache: one project-side and one dependency-side manager.

use crate::manager::{ResourceRequestManager, NO_REQUESTS_SIGNATURE};
use crate::manifest::TaskCacheObject;
use crate::{Delta, Result};
use std::collections::BTreeMap;
use uibuild_core::{Reader, RequestRecording, RequestSide};

/// The `[projectSig, depSig]` pair keying one recorded task run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TaskSignatures {
    pub project: String,
    pub dependency: String,
}

/// Caches the recorded reads of one task of one project. The two sides are
/// independent indices over independent readers.
pub struct BuildTaskCache {
    project: ResourceRequestManager,
    dependency: ResourceRequestManager,
}

impl Default for BuildTaskCache {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildTaskCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            project: ResourceRequestManager::new(RequestSide::Project),
            dependency: ResourceRequestManager::new(RequestSide::Dependency),
        }
    }

    /// Record one task execution's reads on both sides.
    ///
    /// `dependency` comes back as the literal `"X"` when the task did not
    /// request any dependency resources.
    pub async fn record_requests(
        &mut self,
        project_recording: &RequestRecording,
        dependency_recording: Option<&RequestRecording>,
        project_reader: &dyn Reader,
        dependency_reader: Option<&dyn Reader>,
    ) -> Result<TaskSignatures> {
        let project = if project_recording.is_empty() {
            self.project.record_no_requests().to_string()
        } else {
            self.project
                .add_requests(project_recording, project_reader)
                .await?
                .signature
        };

        let dependency = match (dependency_recording, dependency_reader) {
            (Some(recording), Some(reader)) if !recording.is_empty() => {
                self.dependency.add_requests(recording, reader).await?.signature
            }
            _ => self.dependency.record_no_requests().to_string(),
        };

        Ok(TaskSignatures {
            project,
            dependency,
        })
    }

    /// Apply a project-side change notification.
    pub async fn update_project_indices(
        &mut self,
        reader: &dyn Reader,
        changed_paths: &[String],
    ) -> Result<bool> {
        self.project.update_indices(reader, changed_paths).await
    }

    /// Apply a dependency-side change notification. Without explicit
    /// changed paths a full refresh is performed: dependencies may change
    /// between builds independently of the project's invalidation stream
    /// and must be re-synced once at the start of every build.
    pub async fn update_dependency_indices(
        &mut self,
        reader: &dyn Reader,
        changed_paths: Option<&[String]>,
    ) -> Result<bool> {
        match changed_paths {
            Some(paths) => self.dependency.update_indices(reader, paths).await,
            None => self.dependency.refresh_indices(reader).await,
        }
    }

    pub fn project_index_signatures(&self) -> Result<Vec<String>> {
        self.project.index_signatures()
    }

    pub fn dependency_index_signatures(&self) -> Result<Vec<String>> {
        self.dependency.index_signatures()
    }

    #[must_use]
    pub fn project_index_deltas(&self) -> BTreeMap<String, Delta> {
        self.project.deltas()
    }

    #[must_use]
    pub fn dependency_index_deltas(&self) -> BTreeMap<String, Delta> {
        self.dependency.deltas()
    }

    /// Enable or disable differential delta tracking on both sides.
    pub fn set_differential_update(&mut self, enabled: bool) {
        self.project.set_differential_update(enabled);
        self.dependency.set_differential_update(enabled);
    }

    #[must_use]
    pub fn has_new_or_modified_cache_entries(&self) -> bool {
        self.project.has_new_or_modified_cache_entries()
            || self.dependency.has_new_or_modified_cache_entries()
    }

    pub fn to_cache_objects(&self) -> Result<TaskCacheObject> {
        Ok(TaskCacheObject {
            project_requests: self.project.to_cache_object()?,
            dependency_requests: self.dependency.to_cache_object()?,
        })
    }

    pub fn from_cache(cache: &TaskCacheObject) -> Result<Self> {
        Ok(Self {
            project: ResourceRequestManager::from_cache(
                RequestSide::Project,
                &cache.project_requests,
            )?,
            dependency: ResourceRequestManager::from_cache(
                RequestSide::Dependency,
                &cache.dependency_requests,
            )?,
        })
    }
}
