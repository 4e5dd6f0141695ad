//! Resources: lazily hashed units of content in a virtual filesystem.
//!
//! A [`Resource`] is owned by the virtual filesystem, not by the cache; the
//! cache layers only hold `Arc` handles and serialisable [`ResourceMetadata`]
//! snapshots. Integrity (SHA-256 over the content) is computed at most once
//! per resource and cached.

use crate::Result;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;

/// A single resource in the virtual filesystem.
#[derive(Debug)]
pub struct Resource {
    path: String,
    size: u64,
    last_modified: DateTime<Utc>,
    inode: u64,
    content: Bytes,
    integrity: OnceCell<String>,
}

impl Resource {
    /// Create a resource from in-memory content.
    #[must_use]
    pub fn new(
        path: impl Into<String>,
        content: impl Into<Bytes>,
        last_modified: DateTime<Utc>,
        inode: u64,
    ) -> Self {
        let content = content.into();
        Self {
            path: path.into(),
            size: content.len() as u64,
            last_modified,
            inode,
            content,
            integrity: OnceCell::new(),
        }
    }

    /// The virtual path of this resource (`/`-separated).
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    /// Stable inode-like identifier assigned by the owning filesystem.
    #[must_use]
    pub fn inode(&self) -> u64 {
        self.inode
    }

    /// The content hash (SHA-256 hex), computed on first access and cached.
    pub async fn integrity(&self) -> Result<String> {
        let value = self
            .integrity
            .get_or_try_init(|| async {
                let digest = Sha256::digest(&self.content);
                Ok::<_, crate::Error>(hex::encode(digest))
            })
            .await?;
        Ok(value.clone())
    }

    /// The raw content.
    #[must_use]
    pub fn buffer(&self) -> Bytes {
        self.content.clone()
    }

    /// Snapshot the serialisable metadata quadruple plus path.
    pub async fn metadata(&self) -> Result<ResourceMetadata> {
        Ok(ResourceMetadata {
            path: self.path.clone(),
            integrity: self.integrity().await?,
            size: self.size,
            last_modified: self.last_modified,
            inode: self.inode,
        })
    }
}

/// Serialisable snapshot of a resource's identity-relevant metadata.
///
/// This is what hash trees store per leaf and what delta indices persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetadata {
    pub path: String,
    pub integrity: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub inode: u64,
}

impl ResourceMetadata {
    /// The final path segment.
    #[must_use]
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        "2024-05-01T10:00:00Z".parse().unwrap()
    }

    #[tokio::test]
    async fn integrity_is_sha256_of_content() {
        let res = Resource::new("/a.js", "hello world", ts(), 1);
        assert_eq!(
            res.integrity().await.unwrap(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn integrity_is_cached() {
        let res = Resource::new("/a.js", "content", ts(), 1);
        let first = res.integrity().await.unwrap();
        let second = res.integrity().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn metadata_snapshot_round_trips() {
        let res = Resource::new("/dir/b.css", "body {}", ts(), 7);
        let meta = res.metadata().await.unwrap();
        assert_eq!(meta.path, "/dir/b.css");
        assert_eq!(meta.size, 7);
        assert_eq!(meta.inode, 7);
        assert_eq!(meta.name(), "b.css");

        let json = serde_json::to_string(&meta).unwrap();
        let parsed: ResourceMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn size_tracks_content_length() {
        let res = Resource::new("/x", vec![0u8; 42], ts(), 3);
        assert_eq!(res.size(), 42);
        assert_eq!(res.buffer().len(), 42);
    }
}
