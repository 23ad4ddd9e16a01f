//! File-backed local store.
//!
//! One file per key (`<key>.kv`) in a data directory shared by every
//! process that opens the same data. Writes go to a uniquely named temp
//! file, are fsynced, then atomically renamed over the key file, so a
//! reader in another process sees either the old or the new value and
//! never a torn one.
//!
//! Change notifications reach every handle opened on the same directory
//! within this process. Writes from other processes are not signalled;
//! their readers pick them up by polling.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::storage::keys::is_valid_key;
use crate::storage::traits::{LocalStore, StorageError, StoreEvent};

use super::codec;
use super::FileStoreConfig;

const KEY_EXT: &str = "kv";
const TEMP_MARKER: &str = ".kv.tmp.";

type WatcherMap = HashMap<PathBuf, Vec<Sender<StoreEvent>>>;

/// Watchers of every open data directory, keyed by canonical path.
static WATCHERS: OnceLock<Mutex<WatcherMap>> = OnceLock::new();

fn watchers() -> &'static Mutex<WatcherMap> {
    WATCHERS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn io_err(context: &str, err: &std::io::Error) -> StorageError {
    StorageError::Backend(format!("{context}: {err}"))
}

#[cfg(unix)]
fn is_disk_full(err: &std::io::Error) -> bool {
    const ENOSPC: i32 = 28;
    err.raw_os_error() == Some(ENOSPC)
}

#[cfg(not(unix))]
fn is_disk_full(err: &std::io::Error) -> bool {
    const ERROR_DISK_FULL: i32 = 112;
    err.raw_os_error() == Some(ERROR_DISK_FULL)
}

/// Durable key-value store rooted at a directory.
#[derive(Debug)]
pub struct FileLocalStore {
    dir: PathBuf,
    config: FileStoreConfig,
}

impl FileLocalStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    ///
    /// Leftover temp files from interrupted writes are removed.
    ///
    /// # Errors
    /// Returns `Backend` if the directory cannot be created or listed.
    pub fn open(dir: impl AsRef<Path>, config: FileStoreConfig) -> Result<Self, StorageError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| io_err("create data dir", &e))?;
        // Canonical so every handle on the directory shares one watcher list.
        let dir = fs::canonicalize(dir).map_err(|e| io_err("resolve data dir", &e))?;

        let entries = fs::read_dir(&dir).map_err(|e| io_err("list data dir", &e))?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            if name.to_string_lossy().contains(TEMP_MARKER) {
                if let Err(e) = fs::remove_file(entry.path()) {
                    warn!(path = ?entry.path(), error = %e, "failed to remove stale temp file");
                }
            }
        }

        Ok(Self { dir, config })
    }

    /// The data directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if !is_valid_key(key) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.{KEY_EXT}")))
    }

    fn notify(&self, key: &str) {
        let mut map = watchers().lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = map.get_mut(&self.dir) {
            let event = StoreEvent { key: key.to_string() };
            list.retain(|tx| tx.send(event.clone()).is_ok());
            if list.is_empty() {
                map.remove(&self.dir);
            }
        }
    }
}

impl LocalStore for FileLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err("open key file", &e)),
        };
        codec::decode(&mut BufReader::new(file))
            .map(Some)
            .map_err(|e| StorageError::Corrupted {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let frame = codec::encode(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
        if frame.len() > self.config.per_key_quota {
            return Err(StorageError::QuotaExceeded {
                key: key.to_string(),
                size: frame.len(),
                limit: self.config.per_key_quota,
            });
        }

        let temp = self.dir.join(format!("{key}{TEMP_MARKER}{}", Uuid::new_v4()));
        let result = (|| {
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&temp)?;
            file.write_all(&frame)?;
            if self.config.sync_on_write {
                file.sync_all()?;
            }
            fs::rename(&temp, &path)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&temp);
            // ENOSPC surfaces as a quota failure so the caller's cleanup path runs.
            if is_disk_full(&e) {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    size: frame.len(),
                    limit: 0,
                });
            }
            return Err(io_err("write key file", &e));
        }
        debug!(key, bytes = frame.len(), "key written");
        self.notify(key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                self.notify(key);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err("remove key file", &e)),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| io_err("list data dir", &e))?;
        let mut keys: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(KEY_EXT) {
                    return None;
                }
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .filter(|s| is_valid_key(s))
                    .map(str::to_string)
            })
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn clear(&self) -> Result<(), StorageError> {
        for key in self.keys()? {
            self.remove(&key)?;
        }
        Ok(())
    }

    fn watch(&self) -> Option<Receiver<StoreEvent>> {
        let (tx, rx) = unbounded();
        watchers()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(self.dir.clone())
            .or_default()
            .push(tx);
        Some(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config() -> FileStoreConfig {
        FileStoreConfig {
            per_key_quota: 1024,
            sync_on_write: false,
        }
    }

    #[test]
    fn test_set_get_across_handles() {
        let dir = tempdir().unwrap();
        let a = FileLocalStore::open(dir.path(), config()).unwrap();
        let b = FileLocalStore::open(dir.path(), config()).unwrap();
        a.set("data_customers", "[]").unwrap();
        assert_eq!(b.get("data_customers").unwrap().as_deref(), Some("[]"));
        assert_eq!(b.keys().unwrap(), ["data_customers"]);
    }

    #[test]
    fn test_quota_counts_frame() {
        let dir = tempdir().unwrap();
        let store = FileLocalStore::open(dir.path(), config()).unwrap();
        let value = "x".repeat(1024);
        let err = store.set("data_gallery", &value).unwrap_err();
        assert!(err.is_quota());
        assert!(store.get("data_gallery").unwrap().is_none());
    }

    #[test]
    fn test_corrupted_file_reported() {
        let dir = tempdir().unwrap();
        let store = FileLocalStore::open(dir.path(), config()).unwrap();
        store.set("last_save", "{\"a\":1}").unwrap();

        let path = dir.path().join("last_save.kv");
        let mut bytes = fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x55;
        fs::write(&path, bytes).unwrap();

        assert!(matches!(store.get("last_save"), Err(StorageError::Corrupted { .. })));
    }

    #[test]
    fn test_stale_temp_files_removed_on_open() {
        let dir = tempdir().unwrap();
        let stale = dir.path().join(format!("data_sales{TEMP_MARKER}abc"));
        fs::write(&stale, b"partial").unwrap();
        let store = FileLocalStore::open(dir.path(), config()).unwrap();
        assert!(!stale.exists());
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn test_watch_sees_writes_from_other_handles() {
        let dir = tempdir().unwrap();
        let a = FileLocalStore::open(dir.path(), config()).unwrap();
        let b = FileLocalStore::open(dir.path(), config()).unwrap();
        let events = a.watch().unwrap();

        b.set("last_save", "{}").unwrap();
        assert_eq!(events.try_recv().unwrap().key, "last_save");
        b.remove("last_save").unwrap();
        assert_eq!(events.try_recv().unwrap().key, "last_save");
        b.remove("last_save").unwrap();
        assert!(events.try_recv().is_err(), "removing a missing key is silent");

        let other = tempdir().unwrap();
        FileLocalStore::open(other.path(), config())
            .unwrap()
            .set("last_save", "{}")
            .unwrap();
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_clear_and_remove_missing() {
        let dir = tempdir().unwrap();
        let store = FileLocalStore::open(dir.path(), config()).unwrap();
        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();
        store.remove("missing").unwrap();
        store.clear().unwrap();
        assert!(store.keys().unwrap().is_empty());
    }
}
