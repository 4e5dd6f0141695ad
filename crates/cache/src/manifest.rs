//! The persisted build manifest: one JSON document per project and build
//! signature, stored in the content-addressed store. It carries everything
//! needed to restore the project's task caches on the next build.

use crate::manager::ManagerCache;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uibuild_core::BuildConfiguration;

/// Serialisation format version of [`BuildManifest`].
pub const MANIFEST_VERSION: u32 = 1;

/// Per-task serialised cache state: both request managers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCacheObject {
    pub project_requests: ManagerCache,
    pub dependency_requests: ManagerCache,
}

/// One recorded task run: the signature pair it was keyed under and the
/// stage outputs it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedEntry {
    pub project_signature: String,
    pub dependency_signature: String,
    pub output_paths: Vec<String>,
    /// Whether this entry was produced by a differential execution.
    #[serde(default)]
    pub differential: bool,
}

/// Everything persisted for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskManifest {
    #[serde(default)]
    pub supports_differential: bool,
    pub entries: Vec<RecordedEntry>,
    pub cache: TaskCacheObject,
}

/// The per-(project × build signature) manifest document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildManifest {
    pub version: u32,
    pub build_signature: String,
    pub project_id: String,
    pub tool_version: String,
    pub created_at: DateTime<Utc>,
    pub configuration: BuildConfiguration,
    pub task_order: Vec<String>,
    pub tasks: BTreeMap<String, TaskManifest>,
}

impl BuildManifest {
    /// Parse and version-check a manifest document.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let manifest: BuildManifest = serde_json::from_slice(data)
            .map_err(|e| Error::Corruption(format!("unreadable build manifest: {e}")))?;
        if manifest.version != MANIFEST_VERSION {
            return Err(Error::UnsupportedManifestVersion {
                found: manifest.version,
                supported: MANIFEST_VERSION,
            });
        }
        Ok(manifest)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| Error::Corruption(format!("unserialisable build manifest: {e}")))
    }
}

/// Store key of a project's manifest under one build signature.
#[must_use]
pub fn manifest_key(project_id: &str, build_signature: &str) -> String {
    format!("manifest/{project_id}/{build_signature}")
}

/// Store key of one stage output resource.
#[must_use]
pub fn output_key(
    build_signature: &str,
    task_name: &str,
    pair_hash: &str,
    resource_path: &str,
) -> String {
    format!(
        "out/{build_signature}/{task_name}/{pair_hash}{resource_path}",
    )
}
