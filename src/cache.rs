use std::{
    future::Future,
    num::NonZeroUsize,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use lru::LruCache;
use tracing::debug;

struct Entry<V> {
    stored_at: Instant,
    value: V,
}

impl<V> Entry<V> {
    fn new(value: V) -> Self {
        Entry {
            stored_at: Instant::now(),
            value,
        }
    }
}

/// Page-level cache keyed by route.
///
/// Entries expire after `ttl`; [`PageCache::invalidate`] drops everything at once and
/// must be called after any write that can change what a cached page shows.
pub struct PageCache<V> {
    inner: Mutex<Pages<V>>,
    ttl: Duration,
}

struct Pages<V> {
    entries: LruCache<String, Entry<V>>,
    /// Bumped by every invalidation; loads started under an older value are not stored.
    generation: u64,
}

impl<V: Clone> PageCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        PageCache {
            inner: Mutex::new(Pages {
                entries: LruCache::new(capacity),
                generation: 0,
            }),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Pages<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.lock();
        let fresh = inner
            .entries
            .get(key)
            .map(|entry| (entry.stored_at.elapsed() < self.ttl).then(|| entry.value.clone()));
        match fresh {
            Some(Some(value)) => Some(value),
            Some(None) => {
                inner.entries.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: String, value: V) {
        self.lock().entries.put(key, Entry::new(value));
    }

    /// Cached value for `key`, or the result of `load` which is then stored.
    /// Errors from `load` are returned as-is and nothing is cached. A value loaded
    /// across an [`invalidate`](Self::invalidate) is returned but not cached.
    pub async fn get_or_load<F, Fut, E>(&self, key: String, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            debug!(%key, "page cache hit");
            return Ok(value);
        }
        debug!(%key, "page cache miss");
        let generation = self.lock().generation;
        let value = load().await?;
        let mut inner = self.lock();
        if inner.generation == generation {
            inner.entries.put(key, Entry::new(value.clone()));
        } else {
            debug!(%key, "page cache invalidated during load, not stored");
        }
        Ok(value)
    }

    pub fn invalidate(&self) {
        let mut inner = self.lock();
        debug!(entries = inner.entries.len(), "page cache invalidated");
        inner.entries.clear();
        inner.generation = inner.generation.wrapping_add(1);
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
