//! Cache-root resolution.
//!
//! The persistent store lives under a single root directory resolved once
//! per process: the `UIBUILD_CACHE_DIR` override wins, then a home-relative
//! default, then a temp-dir fallback for environments without a home.

use crate::{Error, Result};
use std::path::PathBuf;

/// Environment variable overriding the cache root directory.
pub const CACHE_DIR_ENV: &str = "UIBUILD_CACHE_DIR";

#[derive(Debug, Clone)]
struct CacheRootInputs {
    override_dir: Option<PathBuf>,
    home_dir: Option<PathBuf>,
    temp_dir: PathBuf,
}

fn cache_root_from_inputs(inputs: CacheRootInputs) -> Result<PathBuf> {
    // Resolution order (first creatable wins):
    // 1) UIBUILD_CACHE_DIR (explicit override)
    // 2) ~/.uibuild/cache
    // 3) TMPDIR/uibuild/cache (fallback)
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(dir) = inputs.override_dir.filter(|p| !p.as_os_str().is_empty()) {
        candidates.push(dir);
    }
    if let Some(home) = inputs.home_dir {
        candidates.push(home.join(".uibuild/cache"));
    }
    candidates.push(inputs.temp_dir.join("uibuild/cache"));

    for path in candidates {
        if path.is_dir() {
            return Ok(path);
        }
        if std::fs::create_dir_all(&path).is_ok() {
            return Ok(path);
        }
        // Permission denied or other errors - try next candidate
    }
    Err(Error::configuration(
        "Failed to determine a writable cache directory",
    ))
}

/// Resolve and create the cache root directory.
pub fn ensure_cache_root() -> Result<PathBuf> {
    let inputs = CacheRootInputs {
        override_dir: std::env::var(CACHE_DIR_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from),
        home_dir: dirs::home_dir(),
        temp_dir: std::env::temp_dir(),
    };
    let root = cache_root_from_inputs(inputs)?;
    tracing::debug!(root = %root.display(), "Resolved cache root");
    Ok(root)
}
