//! Garbage collection and verification for the blob store.
//!
//! Collection is a two-step sweep: drop every ref whose key is not in the
//! live set, then delete objects no remaining ref points to. Verification
//! re-hashes every object and cross-checks refs, backing `cache verify`.

use crate::{BlobStore, Error, RefEntry, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Outcome of a [`BlobStore::gc`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GcStats {
    pub removed_refs: usize,
    pub removed_objects: usize,
    pub kept_objects: usize,
}

/// Outcome of a [`BlobStore::verify`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    /// Number of objects whose content matched their name.
    pub intact_objects: usize,
    /// Integrities of objects whose content did not match.
    pub corrupt_objects: Vec<String>,
    /// Keys whose ref points at a missing object.
    pub dangling_refs: Vec<String>,
}

impl VerifyReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.corrupt_objects.is_empty() && self.dangling_refs.is_empty()
    }
}

impl BlobStore {
    /// Remove refs whose keys are not in `live_keys`, then sweep objects no
    /// ref references anymore.
    pub async fn gc(&self, live_keys: &BTreeSet<String>) -> Result<GcStats> {
        let mut stats = GcStats::default();
        let mut live_integrities: BTreeSet<String> = BTreeSet::new();

        for path in files_below(&self.refs_dir()) {
            match read_ref_file(&path)? {
                Some(entry) if live_keys.contains(&entry.key) => {
                    live_integrities.insert(entry.integrity);
                }
                _ => {
                    tokio::fs::remove_file(&path)
                        .await
                        .map_err(|e| Error::io(e, &path, "remove_file"))?;
                    stats.removed_refs += 1;
                }
            }
        }

        for path in files_below(&self.objects_dir()) {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if live_integrities.contains(name) {
                stats.kept_objects += 1;
            } else {
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| Error::io(e, &path, "remove_file"))?;
                stats.removed_objects += 1;
            }
        }

        debug!(
            removed_refs = stats.removed_refs,
            removed_objects = stats.removed_objects,
            kept_objects = stats.kept_objects,
            "Blob store GC complete"
        );
        Ok(stats)
    }

    /// Re-hash every object and cross-check every ref.
    pub async fn verify(&self) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();

        for path in files_below(&self.objects_dir()) {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let data = tokio::fs::read(&path)
                .await
                .map_err(|e| Error::io(e, &path, "read"))?;
            let computed = hex::encode(Sha256::digest(&data));
            if computed == name {
                report.intact_objects += 1;
            } else {
                warn!(object = name, "Corrupt blob detected");
                report.corrupt_objects.push(name.to_string());
            }
        }

        for path in files_below(&self.refs_dir()) {
            if let Some(entry) = read_ref_file(&path)? {
                let exists = tokio::fs::try_exists(self.object_path(&entry.integrity))
                    .await
                    .unwrap_or(false);
                if !exists {
                    report.dangling_refs.push(entry.key);
                }
            }
        }

        report.corrupt_objects.sort();
        report.dangling_refs.sort();
        Ok(report)
    }
}

fn files_below(dir: &Path) -> Vec<std::path::PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

fn read_ref_file(path: &Path) -> Result<Option<RefEntry>> {
    let data = std::fs::read(path).map_err(|e| Error::io(e, path, "read"))?;
    match serde_json::from_slice(&data) {
        Ok(entry) => Ok(Some(entry)),
        Err(e) => {
            warn!(path = %path.display(), "Unreadable ref file: {e}");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn gc_keeps_live_and_sweeps_the_rest() {
        let tmp = TempDir::new().unwrap();
        let store = BlobStore::new(tmp.path());

        store.put("live", b"keep me").await.unwrap();
        store.put("dead", b"sweep me").await.unwrap();

        let live: BTreeSet<String> = ["live".to_string()].into_iter().collect();
        let stats = store.gc(&live).await.unwrap();
        assert_eq!(stats.removed_refs, 1);
        assert_eq!(stats.removed_objects, 1);
        assert_eq!(stats.kept_objects, 1);

        assert!(store.get("live").await.unwrap().is_some());
        assert!(store.get("dead").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn gc_keeps_shared_objects_alive() {
        let tmp = TempDir::new().unwrap();
        let store = BlobStore::new(tmp.path());

        // Two keys, one deduplicated object.
        store.put("live", b"shared").await.unwrap();
        store.put("dead", b"shared").await.unwrap();

        let live: BTreeSet<String> = ["live".to_string()].into_iter().collect();
        let stats = store.gc(&live).await.unwrap();
        assert_eq!(stats.removed_refs, 1);
        assert_eq!(stats.removed_objects, 0);
        assert!(store.get("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn verify_flags_corruption_and_dangling_refs() {
        let tmp = TempDir::new().unwrap();
        let store = BlobStore::new(tmp.path());

        let ok = store.put("fine", b"intact").await.unwrap();
        let bad = store.put("broken", b"will corrupt").await.unwrap();
        std::fs::write(store.object_path(&bad), b"oops").unwrap();

        store.put("dangling", b"to vanish").await.unwrap();
        let vanish = store.read_ref("dangling").await.unwrap().unwrap().integrity;
        // Remove the object but keep the ref; content differs from the two
        // above so no dedup interference.
        if vanish != ok && vanish != bad {
            std::fs::remove_file(store.object_path(&vanish)).unwrap();
        }

        let report = store.verify().await.unwrap();
        assert!(!report.is_clean());
        assert_eq!(report.corrupt_objects, vec![bad]);
        assert_eq!(report.dangling_refs, vec!["dangling".to_string()]);
        assert_eq!(report.intact_objects, 1);
    }

    #[tokio::test]
    async fn verify_on_empty_store_is_clean() {
        let tmp = TempDir::new().unwrap();
        let store = BlobStore::new(tmp.path());
        let report = store.verify().await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.intact_objects, 0);
    }
}
