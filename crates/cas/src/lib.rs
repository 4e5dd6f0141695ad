//! Content-addressed store for task outputs and build manifests.
//!
//! Blobs live under `objects/` keyed by their SHA-256 integrity in a
//! two-level directory fanout; string keys map to integrities through ref
//! files under `refs/`. Writes are atomic per key (temp file + rename).
//! A lookup returns `None` for both cache misses and integrity mismatches,
//! so corrupted entries degrade into rebuilds instead of failures.
//!
//! ```text
//! <root>/
//!   objects/ab/cd/abcdef...        (blob, named by content hash)
//!   refs/12/34/1234ef...           (JSON {key, integrity}, named by key hash)
//! ```
//!
//! Blobs are retained until [`BlobStore::gc`] sweeps the refs that are no
//! longer live and the objects nothing references anymore.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

mod gc;

pub use gc::{GcStats, VerifyReport};

/// Errors of the blob store.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Store IO error during {operation} on {}: {source}", path.display())]
    Io {
        source: std::io::Error,
        path: Box<Path>,
        operation: String,
    },

    #[error("Store serialization error: {0}")]
    Serialization(String),
}

impl Error {
    pub(crate) fn io(source: std::io::Error, path: &Path, operation: impl Into<String>) -> Self {
        Error::Io {
            source,
            path: path.into(),
            operation: operation.into(),
        }
    }
}

/// Result type alias for blob-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A ref file: the mapping from a store key to a blob integrity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RefEntry {
    pub key: String,
    pub integrity: String,
}

/// The persistent content-addressed store.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open a store rooted at the given directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open the process-wide default store below the resolved cache root.
    pub fn open_default() -> Result<Self> {
        let cache_root = uibuild_core::paths::ensure_cache_root()
            .map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(Self::new(cache_root.join("store")))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn object_path(&self, integrity: &str) -> PathBuf {
        fanout(&self.root.join("objects"), integrity)
    }

    pub(crate) fn ref_path(&self, key: &str) -> PathBuf {
        fanout(&self.root.join("refs"), &key_hash(key))
    }

    pub(crate) fn objects_dir(&self) -> PathBuf {
        self.root.join("objects")
    }

    pub(crate) fn refs_dir(&self) -> PathBuf {
        self.root.join("refs")
    }

    /// Store bytes under a key; returns the blob integrity.
    pub async fn put(&self, key: &str, data: &[u8]) -> Result<String> {
        let integrity = hex::encode(Sha256::digest(data));
        self.write_object(&integrity, data).await?;
        self.write_ref(key, &integrity).await?;
        Ok(integrity)
    }

    /// Store a stream under a key, hashing while writing; returns the blob
    /// integrity.
    pub async fn put_stream<R>(&self, key: &str, mut reader: R) -> Result<String>
    where
        R: AsyncRead + Unpin + Send,
    {
        let tmp = self.root.join(format!("objects/.incoming-{}", key_hash(key)));
        if let Some(parent) = tmp.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(e, parent, "create_dir_all"))?;
        }
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| Error::io(e, &tmp, "create"))?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| Error::io(e, &tmp, "read"))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n])
                .await
                .map_err(|e| Error::io(e, &tmp, "write"))?;
        }
        file.sync_all()
            .await
            .map_err(|e| Error::io(e, &tmp, "sync"))?;
        drop(file);

        let integrity = hex::encode(hasher.finalize());
        let target = self.object_path(&integrity);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(e, parent, "create_dir_all"))?;
        }
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|e| Error::io(e, &target, "rename"))?;
        self.write_ref(key, &integrity).await?;
        Ok(integrity)
    }

    /// Look up bytes by key. `None` on miss or integrity mismatch.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let Some(entry) = self.read_ref(key).await? else {
            return Ok(None);
        };
        self.get_by_integrity(&entry.integrity).await
    }

    /// Look up bytes directly by integrity. `None` on miss or mismatch.
    pub async fn get_by_integrity(&self, integrity: &str) -> Result<Option<Bytes>> {
        let path = self.object_path(integrity);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(e, &path, "read")),
        };
        let computed = hex::encode(Sha256::digest(&data));
        if computed != integrity {
            tracing::warn!(integrity, computed, "Blob failed integrity check");
            return Ok(None);
        }
        Ok(Some(Bytes::from(data)))
    }

    /// Does a ref exist for this key? (Does not verify the blob.)
    pub async fn contains_key(&self, key: &str) -> bool {
        tokio::fs::try_exists(self.ref_path(key))
            .await
            .unwrap_or(false)
    }

    /// Remove everything below the store root.
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(e, &self.root, "remove_dir_all")),
        }
    }

    async fn write_object(&self, integrity: &str, data: &[u8]) -> Result<()> {
        let path = self.object_path(integrity);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            // Content-addressed: an existing blob is by definition identical.
            return Ok(());
        }
        atomic_write(&path, data).await
    }

    async fn write_ref(&self, key: &str, integrity: &str) -> Result<()> {
        let entry = RefEntry {
            key: key.to_string(),
            integrity: integrity.to_string(),
        };
        let json = serde_json::to_vec(&entry).map_err(|e| Error::Serialization(e.to_string()))?;
        atomic_write(&self.ref_path(key), &json).await
    }

    pub(crate) async fn read_ref(&self, key: &str) -> Result<Option<RefEntry>> {
        let path = self.ref_path(key);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(e, &path, "read")),
        };
        let entry =
            serde_json::from_slice(&data).map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(Some(entry))
    }
}

fn key_hash(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Two-level directory fanout: `<base>/ab/cd/abcdef...`.
fn fanout(base: &Path, hash: &str) -> PathBuf {
    base.join(&hash[0..2]).join(&hash[2..4]).join(hash)
}

async fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(e, parent, "create_dir_all"))?;
    }
    let tmp = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp)
        .await
        .map_err(|e| Error::io(e, &tmp, "create"))?;
    file.write_all(data)
        .await
        .map_err(|e| Error::io(e, &tmp, "write"))?;
    file.sync_all()
        .await
        .map_err(|e| Error::io(e, &tmp, "sync"))?;
    drop(file);
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::io(e, path, "rename"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn put_get_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = BlobStore::new(tmp.path());

        let integrity = store.put("out/app/minify/a.js", b"payload").await.unwrap();
        let loaded = store.get("out/app/minify/a.js").await.unwrap().unwrap();
        assert_eq!(loaded, Bytes::from_static(b"payload"));

        let direct = store.get_by_integrity(&integrity).await.unwrap().unwrap();
        assert_eq!(direct, loaded);
    }

    #[tokio::test]
    async fn miss_returns_none() {
        let tmp = TempDir::new().unwrap();
        let store = BlobStore::new(tmp.path());
        assert!(store.get("nothing/here").await.unwrap().is_none());
        assert!(!store.contains_key("nothing/here").await);
    }

    #[tokio::test]
    async fn put_is_idempotent_and_keys_can_repoint() {
        let tmp = TempDir::new().unwrap();
        let store = BlobStore::new(tmp.path());

        let i1 = store.put("k", b"v1").await.unwrap();
        let i2 = store.put("k", b"v1").await.unwrap();
        assert_eq!(i1, i2);

        // Re-putting a key with new content repoints the ref.
        let i3 = store.put("k", b"v2").await.unwrap();
        assert_ne!(i1, i3);
        assert_eq!(
            store.get("k").await.unwrap().unwrap(),
            Bytes::from_static(b"v2")
        );
    }

    #[tokio::test]
    async fn corrupt_blob_reads_as_none() {
        let tmp = TempDir::new().unwrap();
        let store = BlobStore::new(tmp.path());

        let integrity = store.put("k", b"original").await.unwrap();
        std::fs::write(store.object_path(&integrity), b"tampered").unwrap();

        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.get_by_integrity(&integrity).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_stream_matches_put() {
        let tmp = TempDir::new().unwrap();
        let store = BlobStore::new(tmp.path());

        let data = vec![42u8; 200_000];
        let from_stream = store.put_stream("streamed", data.as_slice()).await.unwrap();
        let from_bytes = store.put("buffered", &data).await.unwrap();
        assert_eq!(from_stream, from_bytes);
        assert_eq!(
            store.get("streamed").await.unwrap().unwrap().len(),
            data.len()
        );
    }

    #[tokio::test]
    async fn identical_content_is_deduplicated() {
        let tmp = TempDir::new().unwrap();
        let store = BlobStore::new(tmp.path());

        let i1 = store.put("first", b"same bytes").await.unwrap();
        let i2 = store.put("second", b"same bytes").await.unwrap();
        assert_eq!(i1, i2);

        let objects = walkdir::WalkDir::new(store.objects_dir())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count();
        assert_eq!(objects, 1);
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let tmp = TempDir::new().unwrap();
        let store = BlobStore::new(tmp.path().join("store"));
        store.put("k", b"v").await.unwrap();
        store.clear().await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }
}
