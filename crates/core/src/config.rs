//! Build configuration participating in the build signature.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How the persistent cache is consulted during a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    /// Read and write the cache.
    #[default]
    Default,
    /// Ignore recorded entries, always rebuild, still record results.
    Force,
    /// Read the cache but never write it.
    Readonly,
    /// Bypass the cache entirely.
    Off,
}

impl CacheMode {
    #[must_use]
    pub fn reads(self) -> bool {
        matches!(self, CacheMode::Default | CacheMode::Readonly)
    }

    #[must_use]
    pub fn writes(self) -> bool {
        matches!(self, CacheMode::Default | CacheMode::Force)
    }
}

/// Serialisable build settings.
///
/// The stable-JSON form of this struct is part of the build signature, so
/// any change here invalidates previously recorded builds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfiguration {
    #[serde(default)]
    pub cache_mode: CacheMode,
    /// Build transitive dependencies along with the requested projects.
    #[serde(default)]
    pub include_dependencies: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_path: Option<String>,
    /// Standard tasks to leave out of the execution order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_tasks: Vec<String>,
    /// Free-form per-task parameters, keyed by task name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub task_parameters: BTreeMap<String, serde_json::Value>,
}
