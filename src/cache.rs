//! Read cache for query and derived results.
//!
//! Entries are keyed by [`QueryKey`] and stamped with the generation vector
//! of the collections the query reads. A lookup hits only when the stored
//! vector equals the current one and the entry is younger than the TTL.
//! Mutations never evict entries: staleness is detected lazily on the next
//! read by the generation mismatch.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::query::QueryKey;
use crate::store::GenerationVector;

/// Default time-to-live for cached results.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,
    generations: GenerationVector,
    stored_at: Instant,
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Memoizes query results against generation vectors.
pub struct ReadCache {
    ttl: Duration,
    entries: Mutex<HashMap<QueryKey, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for ReadCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadCache")
            .field("ttl", &self.ttl)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Default for ReadCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl ReadCache {
    /// Creates a cache with the given TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<QueryKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cached result for `key` if it is still valid for
    /// `generations`, otherwise runs `compute` and caches its result.
    ///
    /// `compute` runs without the cache lock held, so it may itself read
    /// through the cache.
    ///
    /// # Errors
    /// Propagates the error of `compute`; nothing is cached in that case.
    pub fn get_or_compute<T, E>(
        &self,
        key: &QueryKey,
        generations: &GenerationVector,
        compute: impl FnOnce() -> Result<T, E>,
    ) -> Result<Arc<T>, E>
    where
        T: Any + Send + Sync,
    {
        if let Some(hit) = self.lookup::<T>(key, generations) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "cache hit");
            return Ok(hit);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!(key = %key, "cache miss");
        let value = Arc::new(compute()?);
        self.lock_entries().insert(
            key.clone(),
            CacheEntry {
                value: Arc::clone(&value) as Arc<dyn Any + Send + Sync>,
                generations: generations.clone(),
                stored_at: Instant::now(),
            },
        );
        Ok(value)
    }

    fn lookup<T: Any + Send + Sync>(&self, key: &QueryKey, generations: &GenerationVector) -> Option<Arc<T>> {
        let entries = self.lock_entries();
        let entry = entries.get(key)?;
        if entry.generations != *generations || entry.stored_at.elapsed() >= self.ttl {
            return None;
        }
        Arc::clone(&entry.value).downcast::<T>().ok()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.lock_entries().clear();
    }

    /// Drops entries that can no longer hit (expired).
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.lock_entries();
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, e| e.stored_at.elapsed() < ttl);
        before - entries.len()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.lock_entries().len(),
        }
    }
}
