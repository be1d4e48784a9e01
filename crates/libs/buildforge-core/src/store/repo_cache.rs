//! Thread-safe LRU cache bounding the number of simultaneously open `git2::Repository`
//! handles, so that many projects under management don't exhaust file descriptors.

use crate::Result;
use git2::Repository;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

pub const DEFAULT_REPO_CACHE_SIZE: usize = 8;

pub struct RepoCache {
    cache: Arc<Mutex<LruCache<PathBuf, Arc<Mutex<Repository>>>>>,
    capacity: usize,
}

impl RepoCache {
    /// # Panics
    /// Panics if `capacity` is 0.
    #[allow(clippy::expect_used)]
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).expect("repo cache capacity must be > 0");
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(cap))),
            capacity,
        }
    }

    /// Gets or opens the repository at `path`. The returned handle must be
    /// locked before use; do not hold the lock across an `.await` point.
    pub async fn get(&self, path: &Path) -> Result<Arc<Mutex<Repository>>> {
        let canonical = path.canonicalize()?;
        let mut cache = self.cache.lock().await;

        if let Some(repo) = cache.get(&canonical) {
            debug!(path = %canonical.display(), "repo cache hit");
            return Ok(Arc::clone(repo));
        }

        debug!(path = %canonical.display(), "repo cache miss, opening");
        let repo = Repository::open(&canonical)?;
        let repo = Arc::new(Mutex::new(repo));

        if cache.len() >= self.capacity {
            if let Some((evicted, _)) = cache.pop_lru() {
                debug!(path = %evicted.display(), "evicted repo handle");
            }
        }
        cache.put(canonical, Arc::clone(&repo));
        Ok(repo)
    }

    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn evict(&self, path: &Path) {
        if let Ok(canonical) = path.canonicalize() {
            self.cache.lock().await.pop(&canonical);
        }
    }
}

impl Default for RepoCache {
    fn default() -> Self {
        Self::new(DEFAULT_REPO_CACHE_SIZE)
    }
}
