//! Virtual filesystem readers.
//!
//! Everything above this module reads resources exclusively through the
//! [`Reader`] contract: a path lookup plus a glob query. The concrete
//! implementations here cover the in-memory workspace the build tool
//! operates on ([`MemoryReader`]) and ordered overlays of several readers
//! ([`CombinedReader`]).

use crate::resource::Resource;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use walkdir::WalkDir;

/// Async read access to a set of resources.
#[async_trait]
pub trait Reader: Send + Sync {
    /// Look up a single resource by its virtual path.
    async fn by_path(&self, virtual_path: &str) -> Option<Arc<Resource>>;

    /// Return every resource matched by the given glob patterns.
    ///
    /// Patterns match dotfiles like any other name; ordering of the result
    /// is stable (sorted by path).
    async fn by_glob(&self, patterns: &[String]) -> Vec<Arc<Resource>>;
}

/// Build a [`GlobSet`] from virtual-path patterns.
///
/// Leading slashes are stripped from the patterns so that `/a/*.js` and
/// `a/*.js` match the same resources; matching strips the leading slash
/// from the candidate path symmetrically.
pub fn compile_globs(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let trimmed = pattern.trim_start_matches('/');
        let glob =
            Glob::new(trimmed).map_err(|e| Error::invalid_glob(pattern.clone(), e))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::invalid_glob(patterns.join(","), e))
}

/// Match a virtual path against a compiled glob set.
#[must_use]
pub fn glob_matches(set: &GlobSet, virtual_path: &str) -> bool {
    set.is_match(virtual_path.trim_start_matches('/'))
}

/// An in-memory resource set keyed by virtual path.
///
/// Used for the project workspaces the builder operates on, for task
/// stages, and throughout the test suites.
#[derive(Debug, Default, Clone)]
pub struct MemoryReader {
    inner: Arc<RwLock<BTreeMap<String, Arc<Resource>>>>,
    next_inode: Arc<AtomicU64>,
}

impl MemoryReader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert content under a virtual path, stamping it with the current
    /// time and a fresh inode. Replaces any previous resource at the path.
    pub fn insert(&self, path: impl Into<String>, content: impl Into<Bytes>) -> Arc<Resource> {
        self.insert_with_mtime(path, content, Utc::now())
    }

    /// Insert content with an explicit modification time.
    pub fn insert_with_mtime(
        &self,
        path: impl Into<String>,
        content: impl Into<Bytes>,
        last_modified: DateTime<Utc>,
    ) -> Arc<Resource> {
        let path = path.into();
        let inode = self.next_inode.fetch_add(1, Ordering::Relaxed) + 1;
        let resource = Arc::new(Resource::new(path.clone(), content, last_modified, inode));
        self.insert_resource(Arc::clone(&resource));
        resource
    }

    /// Insert an already constructed resource.
    pub fn insert_resource(&self, resource: Arc<Resource>) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.insert(resource.path().to_string(), resource);
    }

    /// Remove a resource; returns whether it existed.
    pub fn remove(&self, path: &str) -> bool {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.remove(path).is_some()
    }

    /// All paths currently present, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot a directory tree from disk into this reader.
    ///
    /// Every file below `root` becomes a resource at
    /// `<namespace>/<relative path>`. Modification times come from the
    /// filesystem; inodes come from the filesystem where available.
    pub fn load_dir(&self, root: &Path, namespace: &str) -> Result<usize> {
        let mut count = 0usize;
        for entry in WalkDir::new(root).follow_links(true) {
            let entry = entry.map_err(|e| {
                Error::io(
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("walkdir error")),
                    root,
                    "walk",
                )
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let rel = path
                .strip_prefix(root)
                .map_err(|_| Error::configuration("walked path escaped root"))?;
            let virtual_path = format!(
                "{}/{}",
                namespace.trim_end_matches('/'),
                rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/")
            );
            let content =
                std::fs::read(path).map_err(|e| Error::io(e, path, "read"))?;
            let meta = entry
                .metadata()
                .map_err(|e| Error::io(std::io::Error::other(e), path, "metadata"))?;
            let mtime = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            let inode = fs_inode(&meta)
                .unwrap_or_else(|| self.next_inode.fetch_add(1, Ordering::Relaxed) + 1);
            self.insert_resource(Arc::new(Resource::new(virtual_path, content, mtime, inode)));
            count += 1;
        }
        tracing::debug!(root = %root.display(), namespace, count, "Loaded directory snapshot");
        Ok(count)
    }
}

#[cfg(unix)]
fn fs_inode(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn fs_inode(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}

#[async_trait]
impl Reader for MemoryReader {
    async fn by_path(&self, virtual_path: &str) -> Option<Arc<Resource>> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(virtual_path).cloned()
    }

    async fn by_glob(&self, patterns: &[String]) -> Vec<Arc<Resource>> {
        let Ok(set) = compile_globs(patterns) else {
            tracing::trace!(?patterns, "Skipping invalid glob patterns");
            return Vec::new();
        };
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.values()
            .filter(|r| glob_matches(&set, r.path()))
            .cloned()
            .collect()
    }
}

/// Ordered overlay of several readers.
///
/// `by_path` returns the first hit; `by_glob` merges all hits, first
/// reader winning on duplicate paths.
#[derive(Clone, Default)]
pub struct CombinedReader {
    readers: Vec<Arc<dyn Reader>>,
}

impl CombinedReader {
    #[must_use]
    pub fn new(readers: Vec<Arc<dyn Reader>>) -> Self {
        Self { readers }
    }

    pub fn push(&mut self, reader: Arc<dyn Reader>) {
        self.readers.push(reader);
    }
}

#[async_trait]
impl Reader for CombinedReader {
    async fn by_path(&self, virtual_path: &str) -> Option<Arc<Resource>> {
        for reader in &self.readers {
            if let Some(resource) = reader.by_path(virtual_path).await {
                return Some(resource);
            }
        }
        None
    }

    async fn by_glob(&self, patterns: &[String]) -> Vec<Arc<Resource>> {
        let mut merged: BTreeMap<String, Arc<Resource>> = BTreeMap::new();
        for reader in &self.readers {
            for resource in reader.by_glob(patterns).await {
                merged
                    .entry(resource.path().to_string())
                    .or_insert(resource);
            }
        }
        merged.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_reader_by_path() {
        let reader = MemoryReader::new();
        reader.insert("/app/a.js", "a");
        assert!(reader.by_path("/app/a.js").await.is_some());
        assert!(reader.by_path("/app/missing.js").await.is_none());
    }

    #[tokio::test]
    async fn memory_reader_by_glob_sorted() {
        let reader = MemoryReader::new();
        reader.insert("/app/b.js", "b");
        reader.insert("/app/a.js", "a");
        reader.insert("/app/style.css", "c");

        let hits = reader.by_glob(&["**/*.js".into()]).await;
        let paths: Vec<_> = hits.iter().map(|r| r.path().to_string()).collect();
        assert_eq!(paths, vec!["/app/a.js", "/app/b.js"]);
    }

    #[tokio::test]
    async fn glob_matches_dotfiles() {
        let reader = MemoryReader::new();
        reader.insert("/app/.library", "meta");
        let hits = reader.by_glob(&["**/*".into()]).await;
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn glob_with_leading_slash_matches() {
        let reader = MemoryReader::new();
        reader.insert("/app/a.js", "a");
        let hits = reader.by_glob(&["/app/*.js".into()]).await;
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn inodes_are_unique() {
        let reader = MemoryReader::new();
        let a = reader.insert("/a", "1");
        let b = reader.insert("/b", "2");
        assert_ne!(a.inode(), b.inode());
    }

    #[tokio::test]
    async fn combined_reader_first_hit_wins() {
        let first = MemoryReader::new();
        first.insert("/a.js", "from-first");
        let second = MemoryReader::new();
        second.insert("/a.js", "from-second");
        second.insert("/b.js", "only-second");

        let combined = CombinedReader::new(vec![Arc::new(first), Arc::new(second)]);
        let a = combined.by_path("/a.js").await.unwrap();
        assert_eq!(a.buffer(), Bytes::from("from-first"));

        let all = combined.by_glob(&["**/*.js".into()]).await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].buffer(), Bytes::from("from-first"));
    }

    #[tokio::test]
    async fn load_dir_snapshots_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("a.js"), "a").unwrap();
        std::fs::write(tmp.path().join("sub/b.js"), "b").unwrap();

        let reader = MemoryReader::new();
        let count = reader.load_dir(tmp.path(), "/resources/app").unwrap();
        assert_eq!(count, 2);
        assert!(reader.by_path("/resources/app/a.js").await.is_some());
        assert!(reader.by_path("/resources/app/sub/b.js").await.is_some());
    }
}
