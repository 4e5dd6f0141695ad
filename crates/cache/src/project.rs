//! The per-project build cache.
//!
//! Owns the task caches of every task run during one project build,
//! computes the project's build signature, decides per task whether cached
//! outputs are still valid, keeps stage outputs in the content-addressed
//! store, and carries tag metadata across tasks.

use crate::manager::Delta;
use crate::manifest::{
    manifest_key, output_key, BuildManifest, RecordedEntry, TaskManifest, MANIFEST_VERSION,
};
use crate::signature::{compute_build_signature, BuildSignatureInputs};
use crate::task::{BuildTaskCache, TaskSignatures};
use crate::{Error, Result};
use bytes::Bytes;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uibuild_cas::BlobStore;
use uibuild_core::{BuildConfiguration, CacheMode, Project, Reader, RequestRecording};
use uibuild_hash_tree::normalize_virtual_path;

/// Change information handed to a task that opted into differential
/// builds: it may process only these paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheInfo {
    pub changed_project_resource_paths: Vec<String>,
    pub changed_dependency_resource_paths: Vec<String>,
}

/// Outcome of validating a task against the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskCacheDecision {
    /// Cached outputs are valid; the task may be skipped entirely.
    Skip,
    /// The task must re-run but may process only the changed paths.
    Differential(CacheInfo),
    /// The task must re-run fully.
    Rebuild,
}

struct TaskEntry {
    cache: BuildTaskCache,
    supports_differential: bool,
    entries: BTreeMap<String, RecordedEntry>,
    /// Pair hash selected by the last successful [`Skip`] validation.
    matched_pair: Option<String>,
}

impl TaskEntry {
    fn new() -> Self {
        Self {
            cache: BuildTaskCache::new(),
            supports_differential: false,
            entries: BTreeMap::new(),
            matched_pair: None,
        }
    }
}

/// Aggregates all task caches of one project build.
pub struct ProjectBuildCache {
    project_id: String,
    build_signature: String,
    configuration: BuildConfiguration,
    tool_version: String,
    cache_mode: CacheMode,
    store: Arc<BlobStore>,
    project_reader: Arc<dyn Reader>,
    dependency_reader: Option<Arc<dyn Reader>>,
    tasks: BTreeMap<String, TaskEntry>,
    task_order: Vec<String>,
    changed_source_paths: BTreeSet<String>,
    executed_output_paths: BTreeSet<String>,
    tags: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    fresh: bool,
}

impl ProjectBuildCache {
    /// Create an empty cache for one project build, computing the build
    /// signature from the project identity, configuration, ordered
    /// dependency and extension identities, and the toolchain version.
    pub fn new(
        project: &Project,
        configuration: BuildConfiguration,
        dependencies: &[(String, String)],
        store: Arc<BlobStore>,
        project_reader: Arc<dyn Reader>,
        dependency_reader: Option<Arc<dyn Reader>>,
        tool_version: &str,
    ) -> Result<Self> {
        let extensions: Vec<(String, String)> = project
            .extensions
            .iter()
            .map(|e| (e.id.clone(), e.version.clone()))
            .collect();
        let build_signature = compute_build_signature(&BuildSignatureInputs {
            project_id: &project.id,
            project_version: &project.version,
            configuration: &configuration,
            dependencies,
            extensions: &extensions,
            tool_version,
            lockfile_hash: None,
        })?;
        Ok(Self {
            project_id: project.id.clone(),
            build_signature,
            cache_mode: configuration.cache_mode,
            configuration,
            tool_version: tool_version.to_string(),
            store,
            project_reader,
            dependency_reader,
            tasks: BTreeMap::new(),
            task_order: Vec::new(),
            changed_source_paths: BTreeSet::new(),
            executed_output_paths: BTreeSet::new(),
            tags: BTreeMap::new(),
            fresh: false,
        })
    }

    /// Try to restore the persisted manifest for this build signature into
    /// `self`. Corruption discards the persisted state and leaves the cache
    /// empty; a miss leaves it empty silently.
    pub async fn restore(&mut self) -> Result<bool> {
        if !self.cache_mode.reads() {
            return Ok(false);
        }
        let key = manifest_key(&self.project_id, &self.build_signature);
        let Some(bytes) = self.store.get(&key).await? else {
            debug!(project = %self.project_id, "No persisted build manifest");
            return Ok(false);
        };
        match self.restore_from_bytes(&bytes) {
            Ok(()) => {
                info!(project = %self.project_id, "Restored build manifest");
                Ok(true)
            }
            Err(e) if e.is_corruption() => {
                warn!(
                    project = %self.project_id,
                    "Discarding corrupt build cache: {e}"
                );
                self.tasks.clear();
                self.task_order.clear();
                self.fresh = false;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn restore_from_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let manifest = BuildManifest::from_bytes(bytes)?;
        if manifest.build_signature != self.build_signature {
            return Err(Error::Corruption(
                "manifest build signature mismatch".to_string(),
            ));
        }
        let mut tasks = BTreeMap::new();
        for (name, task_manifest) in &manifest.tasks {
            let mut cache = BuildTaskCache::from_cache(&task_manifest.cache)?;
            cache.set_differential_update(task_manifest.supports_differential);
            let entries = task_manifest
                .entries
                .iter()
                .map(|entry| {
                    (
                        pair_hash(&entry.project_signature, &entry.dependency_signature),
                        entry.clone(),
                    )
                })
                .collect();
            tasks.insert(
                name.clone(),
                TaskEntry {
                    cache,
                    supports_differential: task_manifest.supports_differential,
                    entries,
                    matched_pair: None,
                },
            );
        }
        self.tasks = tasks;
        self.task_order = manifest.task_order;
        self.fresh = true;
        Ok(())
    }

    /// Persist the manifest for this build signature. A no-op for cache
    /// modes that do not write.
    pub async fn persist_manifest(&self) -> Result<()> {
        if !self.cache_mode.writes() {
            return Ok(());
        }
        let mut tasks = BTreeMap::new();
        for (name, entry) in &self.tasks {
            tasks.insert(
                name.clone(),
                TaskManifest {
                    supports_differential: entry.supports_differential,
                    entries: entry.entries.values().cloned().collect(),
                    cache: entry.cache.to_cache_objects()?,
                },
            );
        }
        let manifest = BuildManifest {
            version: MANIFEST_VERSION,
            build_signature: self.build_signature.clone(),
            project_id: self.project_id.clone(),
            tool_version: self.tool_version.clone(),
            created_at: Utc::now(),
            configuration: self.configuration.clone(),
            task_order: self.task_order.clone(),
            tasks,
        };
        let key = manifest_key(&self.project_id, &self.build_signature);
        self.store.put(&key, &manifest.to_bytes()?).await?;
        debug!(project = %self.project_id, "Persisted build manifest");
        Ok(())
    }

    #[must_use]
    pub fn build_signature(&self) -> &str {
        &self.build_signature
    }

    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    #[must_use]
    pub fn has_new_or_modified_cache_entries(&self) -> bool {
        self.tasks
            .values()
            .any(|entry| entry.cache.has_new_or_modified_cache_entries())
    }

    /// Validate a task against the cache before execution.
    pub async fn prepare_task_execution(&mut self, task_name: &str) -> Result<TaskCacheDecision> {
        if !self.cache_mode.reads() {
            return Ok(TaskCacheDecision::Rebuild);
        }
        let Some(entry) = self.tasks.get_mut(task_name) else {
            return Ok(TaskCacheDecision::Rebuild);
        };
        let project_sigs: BTreeSet<String> =
            entry.cache.project_index_signatures()?.into_iter().collect();
        let dependency_sigs: BTreeSet<String> = entry
            .cache
            .dependency_index_signatures()?
            .into_iter()
            .collect();

        for (hash, recorded) in &entry.entries {
            if project_sigs.contains(&recorded.project_signature)
                && dependency_sigs.contains(&recorded.dependency_signature)
            {
                let mut restorable = true;
                for path in &recorded.output_paths {
                    let key = output_key(&self.build_signature, task_name, hash, path);
                    if !self.store.contains_key(&key).await {
                        restorable = false;
                        break;
                    }
                }
                if restorable {
                    entry.matched_pair = Some(hash.clone());
                    debug!(task = task_name, "Task cache hit, skipping");
                    return Ok(TaskCacheDecision::Skip);
                }
            }
        }

        if entry.supports_differential {
            let project_deltas = entry.cache.project_index_deltas();
            let dependency_deltas = entry.cache.dependency_index_deltas();
            for recorded in entry.entries.values() {
                let project_chain =
                    chain_signature(&recorded.project_signature, &project_sigs, &project_deltas);
                let dependency_chain = chain_signature(
                    &recorded.dependency_signature,
                    &dependency_sigs,
                    &dependency_deltas,
                );
                if let (Some(project_paths), Some(dependency_paths)) =
                    (project_chain, dependency_chain)
                {
                    debug!(task = task_name, "Task eligible for differential rebuild");
                    return Ok(TaskCacheDecision::Differential(CacheInfo {
                        changed_project_resource_paths: project_paths,
                        changed_dependency_resource_paths: dependency_paths,
                    }));
                }
            }
        }

        Ok(TaskCacheDecision::Rebuild)
    }

    /// Fetch the cached stage outputs of a task validated as [`Skip`].
    pub async fn restore_task_outputs(&self, task_name: &str) -> Result<Vec<(String, Bytes)>> {
        let entry = self
            .tasks
            .get(task_name)
            .ok_or_else(|| Error::Corruption(format!("no cache entry for task '{task_name}'")))?;
        let hash = entry.matched_pair.as_ref().ok_or_else(|| {
            Error::Corruption(format!("task '{task_name}' was not validated as skippable"))
        })?;
        let recorded = entry
            .entries
            .get(hash)
            .ok_or_else(|| Error::Corruption(format!("dangling pair hash for '{task_name}'")))?;
        let mut outputs = Vec::with_capacity(recorded.output_paths.len());
        for path in &recorded.output_paths {
            let key = output_key(&self.build_signature, task_name, hash, path);
            let bytes = self.store.get(&key).await?.ok_or_else(|| {
                Error::Corruption(format!("missing cached output '{path}' for '{task_name}'"))
            })?;
            outputs.push((path.clone(), bytes));
        }
        Ok(outputs)
    }

    /// Record one executed task: its reads on both sides and the stage
    /// outputs it produced. Stores the entry under the
    /// `[projectSig, depSig]` pair and the outputs per task in the store.
    pub async fn record_task_result(
        &mut self,
        task_name: &str,
        project_recording: &RequestRecording,
        dependency_recording: Option<&RequestRecording>,
        outputs: &[(String, Bytes)],
        used_cache_info: Option<&CacheInfo>,
        supports_differential: bool,
    ) -> Result<TaskSignatures> {
        let entry = self
            .tasks
            .entry(task_name.to_string())
            .or_insert_with(TaskEntry::new);
        entry.supports_differential = supports_differential;
        entry.cache.set_differential_update(supports_differential);

        let signatures = entry
            .cache
            .record_requests(
                project_recording,
                dependency_recording,
                &*self.project_reader,
                self.dependency_reader.as_deref(),
            )
            .await?;

        let hash = pair_hash(&signatures.project, &signatures.dependency);
        let output_paths: Vec<String> = outputs
            .iter()
            .map(|(path, _)| normalize_virtual_path(path))
            .collect();
        if self.cache_mode.writes() {
            for ((_, bytes), normalized) in outputs.iter().zip(&output_paths) {
                let key = output_key(&self.build_signature, task_name, &hash, normalized);
                self.store.put(&key, bytes).await?;
            }
        }
        self.executed_output_paths.extend(output_paths.clone());
        entry.entries.insert(
            hash,
            RecordedEntry {
                project_signature: signatures.project.clone(),
                dependency_signature: signatures.dependency.clone(),
                output_paths,
                differential: used_cache_info.is_some(),
            },
        );
        if !self.task_order.iter().any(|t| t == task_name) {
            self.task_order.push(task_name.to_string());
        }
        self.fresh = false;
        Ok(signatures)
    }

    /// Mark outputs of a skipped task as present in this build (for
    /// ordering bookkeeping only; skipped outputs are not re-propagated).
    pub fn record_task_skipped(&mut self, task_name: &str) {
        if !self.task_order.iter().any(|t| t == task_name) {
            self.task_order.push(task_name.to_string());
        }
    }

    /// The build finished: return the union of resource paths this build
    /// modified, for propagation to dependent projects, and mark the cache
    /// fresh.
    pub fn all_tasks_completed(&mut self) -> Vec<String> {
        let mut all: BTreeSet<String> = std::mem::take(&mut self.executed_output_paths);
        all.extend(std::mem::take(&mut self.changed_source_paths));
        self.fresh = true;
        all.into_iter().collect()
    }

    /// Project sources changed: update every task's project-side indices.
    /// Returns whether any index actually changed.
    pub async fn project_sources_changed(&mut self, paths: &[String]) -> Result<bool> {
        self.fresh = false;
        self.changed_source_paths
            .extend(paths.iter().map(|p| normalize_virtual_path(p)));
        let reader = Arc::clone(&self.project_reader);
        let mut any = false;
        for entry in self.tasks.values_mut() {
            any |= entry.cache.update_project_indices(&*reader, paths).await?;
        }
        Ok(any)
    }

    /// Resources of a dependency changed (delivered by cross-project
    /// propagation).
    pub async fn dependency_resources_changed(&mut self, paths: &[String]) -> Result<bool> {
        let Some(reader) = self.dependency_reader.clone() else {
            return Ok(false);
        };
        self.fresh = false;
        let mut any = false;
        for entry in self.tasks.values_mut() {
            any |= entry
                .cache
                .update_dependency_indices(&*reader, Some(paths))
                .await?;
        }
        Ok(any)
    }

    /// Full dependency re-sync, run once at the start of every build.
    pub async fn refresh_dependency_indices(&mut self) -> Result<bool> {
        let Some(reader) = self.dependency_reader.clone() else {
            return Ok(false);
        };
        let mut any = false;
        for entry in self.tasks.values_mut() {
            any |= entry.cache.update_dependency_indices(&*reader, None).await?;
        }
        if any {
            self.fresh = false;
        }
        Ok(any)
    }

    /// Attach tag metadata to a resource path for this build.
    pub fn set_tag(&mut self, path: &str, tag: &str, value: serde_json::Value) {
        self.tags
            .entry(normalize_virtual_path(path))
            .or_default()
            .insert(tag.to_string(), value);
    }

    #[must_use]
    pub fn tag(&self, path: &str, tag: &str) -> Option<&serde_json::Value> {
        self.tags.get(&normalize_virtual_path(path))?.get(tag)
    }

    #[must_use]
    pub fn tags_for(&self, path: &str) -> Option<&BTreeMap<String, serde_json::Value>> {
        self.tags.get(&normalize_virtual_path(path))
    }
}

/// Can `recorded` be chained to a currently valid signature? Directly
/// valid signatures chain with no changed paths; otherwise the delta map
/// must connect it to a current signature.
fn chain_signature(
    recorded: &str,
    current: &BTreeSet<String>,
    deltas: &BTreeMap<String, Delta>,
) -> Option<Vec<String>> {
    if current.contains(recorded) {
        return Some(Vec::new());
    }
    let delta = deltas.get(recorded)?;
    if current.contains(&delta.new_signature) {
        return Some(delta.changed_paths.clone());
    }
    None
}

fn pair_hash(project_signature: &str, dependency_signature: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project_signature.as_bytes());
    hasher.update(b"\0");
    hasher.update(dependency_signature.as_bytes());
    hex::encode(hasher.finalize())
}
