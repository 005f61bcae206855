//! Ordered registry of named caches.
//!
//! `open` is idempotent and creates caches lazily. Cross-cache lookup walks
//! caches in creation order and the first match wins. Snapshots already on
//! disk are reopened on startup, sorted by their recorded creation time, so
//! the lookup order survives restarts.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use super::store::Cache;
use crate::error::{OfflineError, Result};
use crate::http::{Request, Response};

pub struct CacheStorage {
    dir: PathBuf,
    caches: RwLock<Vec<Arc<Cache>>>,
}

impl CacheStorage {
    /// Open cache storage rooted at `dir`, reloading existing snapshots.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let mut caches: Vec<Arc<Cache>> = Vec::new();
        match std::fs::read_dir(&dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                        continue;
                    };
                    caches.push(Arc::new(Cache::open(&dir, name)));
                }
            }
            // Nothing cached yet; the directory appears on first save.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to scan cache dir {}: {}", dir.display(), e),
        }
        caches.sort_by_key(|c| (c.created_at(), c.name().to_string()));
        if !caches.is_empty() {
            debug!(count = caches.len(), "reopened existing caches");
        }
        Self {
            dir,
            caches: RwLock::new(caches),
        }
    }

    /// Return the named cache, creating it empty if absent. Succeeds
    /// whether or not the cache already exists.
    pub fn open(&self, name: &str) -> Result<Arc<Cache>> {
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(OfflineError::Cache(format!("Invalid cache name '{}'", name)));
        }
        {
            let caches = self.caches.read().unwrap();
            if let Some(cache) = caches.iter().find(|c| c.name() == name) {
                return Ok(cache.clone());
            }
        }
        let mut caches = self.caches.write().unwrap();
        // Double-check under the write lock; a concurrent open may have won.
        if let Some(cache) = caches.iter().find(|c| c.name() == name) {
            return Ok(cache.clone());
        }
        debug!(cache = %name, "creating cache");
        let cache = Arc::new(Cache::open(&self.dir, name));
        caches.push(cache.clone());
        Ok(cache)
    }

    /// First match across all caches, walked in creation order.
    pub fn match_request(&self, request: &Request) -> Option<Response> {
        let caches = self.caches.read().unwrap();
        caches.iter().find_map(|cache| cache.match_request(request))
    }

    /// Names of all open caches in creation order.
    pub fn cache_names(&self) -> Vec<String> {
        self.caches
            .read()
            .unwrap()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Snapshot of the open caches, for inspection.
    pub fn caches(&self) -> Vec<Arc<Cache>> {
        self.caches.read().unwrap().clone()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
