//! In-memory storage backends.
//!
//! Thread-safe implementations of the backend traits for embedded use and
//! tests. Several views can share one [`MemoryLocalStore`] through an `Arc`
//! to model concurrently open windows over the same data; every write is
//! broadcast to all watchers. [`MemoryRemote`] supports failure injection.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::record::Collection;
use crate::storage::keys::is_valid_key;
use crate::storage::traits::{LocalStore, RemoteBackend, StorageError, StoreEvent};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::Backend(format!("poisoned lock: {context}"))
}

/// Shared in-memory key-value store with optional quotas.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    values: RwLock<BTreeMap<String, String>>,
    per_key_quota: Option<usize>,
    total_quota: Option<usize>,
    watchers: Mutex<Vec<Sender<StoreEvent>>>,
    writes: AtomicU64,
}

impl MemoryLocalStore {
    /// Creates an unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that rejects single values above `per_key` bytes and
    /// writes that would push the total above `total` bytes.
    #[must_use]
    pub fn with_quota(per_key: Option<usize>, total: Option<usize>) -> Self {
        Self {
            per_key_quota: per_key,
            total_quota: total,
            ..Self::default()
        }
    }

    /// Number of successful `set` calls so far.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Total bytes currently stored.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.values
            .read()
            .map(|v| v.values().map(String::len).sum())
            .unwrap_or(0)
    }

    fn notify(&self, key: &str) {
        if let Ok(mut watchers) = self.watchers.lock() {
            let event = StoreEvent { key: key.to_string() };
            watchers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

impl LocalStore for MemoryLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let values = self.values.read().map_err(|_| lock_err("local.get"))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if !is_valid_key(key) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        {
            let mut values = self.values.write().map_err(|_| lock_err("local.set"))?;
            if let Some(limit) = self.per_key_quota {
                if value.len() > limit {
                    return Err(StorageError::QuotaExceeded {
                        key: key.to_string(),
                        size: value.len(),
                        limit,
                    });
                }
            }
            if let Some(limit) = self.total_quota {
                let others: usize = values
                    .iter()
                    .filter(|(k, _)| k.as_str() != key)
                    .map(|(_, v)| v.len())
                    .sum();
                if others + value.len() > limit {
                    return Err(StorageError::QuotaExceeded {
                        key: key.to_string(),
                        size: value.len(),
                        limit: limit.saturating_sub(others),
                    });
                }
            }
            values.insert(key.to_string(), value.to_string());
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.notify(key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let removed = self
            .values
            .write()
            .map_err(|_| lock_err("local.remove"))?
            .remove(key)
            .is_some();
        if removed {
            self.notify(key);
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let values = self.values.read().map_err(|_| lock_err("local.keys"))?;
        Ok(values.keys().cloned().collect())
    }

    fn clear(&self) -> Result<(), StorageError> {
        let removed: Vec<String> = {
            let mut values = self.values.write().map_err(|_| lock_err("local.clear"))?;
            std::mem::take(&mut *values).into_keys().collect()
        };
        for key in &removed {
            self.notify(key);
        }
        Ok(())
    }

    fn watch(&self) -> Option<Receiver<StoreEvent>> {
        let (tx, rx) = unbounded();
        self.watchers.lock().ok()?.push(tx);
        Some(rx)
    }
}

/// In-memory stand-in for the remote persistence service.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    collections: RwLock<HashMap<Collection, String>>,
    offline: AtomicBool,
    failing: Mutex<HashSet<Collection>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryRemote {
    /// Creates an empty, reachable remote.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every request fail (or succeed again).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes writes to one collection fail.
    pub fn fail_writes_to(&self, collection: Collection) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(collection);
        }
    }

    /// Clears all injected failures.
    pub fn heal(&self) {
        self.set_offline(false);
        if let Ok(mut failing) = self.failing.lock() {
            failing.clear();
        }
    }

    /// Number of successful `replace_collection` calls.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of `fetch_collection` calls.
    #[must_use]
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// The stored payload of one collection.
    #[must_use]
    pub fn payload(&self, collection: Collection) -> Option<String> {
        self.collections.read().ok()?.get(&collection).cloned()
    }

    fn check_online(&self) -> Result<(), StorageError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("remote offline".to_string()));
        }
        Ok(())
    }
}

impl RemoteBackend for MemoryRemote {
    fn fetch_collection(&self, collection: Collection) -> Result<String, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        let collections = self.collections.read().map_err(|_| lock_err("remote.fetch"))?;
        Ok(collections
            .get(&collection)
            .cloned()
            .unwrap_or_else(|| "[]".to_string()))
    }

    fn replace_collection(&self, collection: Collection, payload: &str) -> Result<(), StorageError> {
        self.check_online()?;
        let failing = self
            .failing
            .lock()
            .map_err(|_| lock_err("remote.failing"))?
            .contains(&collection);
        if failing {
            return Err(StorageError::Status {
                code: 503,
                message: format!("{collection} write rejected"),
            });
        }
        self.collections
            .write()
            .map_err(|_| lock_err("remote.replace"))?
            .insert(collection, payload.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A remote that is never reachable; used when running local-only.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRemote;

impl RemoteBackend for NullRemote {
    fn fetch_collection(&self, _collection: Collection) -> Result<String, StorageError> {
        Err(StorageError::Unavailable("no remote configured".to_string()))
    }

    fn replace_collection(&self, _collection: Collection, _payload: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("no remote configured".to_string()))
    }
}
