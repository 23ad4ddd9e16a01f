//! File-backed local durable store.
//!
//! ```text
//! <data dir>/
//! ├── data_inventory.kv     one framed value per key
//! ├── data_customers.kv
//! ├── ...
//! ├── backup_<millis>.kv
//! ├── backup_index.kv
//! └── last_save.kv
//! ```
//!
//! Values are framed with a CRC32 checksum and replaced with
//! write-to-temp-then-rename, so concurrent readers in other processes never
//! observe a partially written key.

mod codec;
mod file_store;

pub use file_store::FileLocalStore;

use std::path::Path;

use serde::Deserialize;

use crate::error::{LedgerError, LedgerResult};

/// Configuration for the file-backed store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileStoreConfig {
    /// Maximum framed size of a single key (bytes).
    pub per_key_quota: usize,
    /// Whether to fsync every write (slower but safer).
    pub sync_on_write: bool,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            per_key_quota: 5 * 1024 * 1024, // 5 MiB
            sync_on_write: true,
        }
    }
}

impl FileStoreConfig {
    const MIN_QUOTA: usize = 4 * 1024; // 4 KiB; anything smaller cannot hold an empty snapshot index

    /// Checks the configuration.
    ///
    /// # Errors
    /// Returns `Config` if the quota is below the minimum.
    pub fn validate(self) -> LedgerResult<Self> {
        if self.per_key_quota < Self::MIN_QUOTA {
            return Err(LedgerError::config(format!(
                "per_key_quota must be at least {} bytes (got {})",
                Self::MIN_QUOTA,
                self.per_key_quota
            )));
        }
        Ok(self)
    }
}

/// Open or create a file-backed local store at the given path.
///
/// # Errors
/// - If the configuration is invalid
/// - If the directory cannot be created or read
///
/// # Example
/// ```rust,ignore
/// use ledgerkeep::storage::persistent::open_local_store;
///
/// let local = open_local_store("./shop-data", None)?;
/// ```
pub fn open_local_store(
    path: impl AsRef<Path>,
    config: Option<FileStoreConfig>,
) -> LedgerResult<FileLocalStore> {
    let cfg = config.unwrap_or_default().validate()?;
    Ok(FileLocalStore::open(path.as_ref(), cfg)?)
}
