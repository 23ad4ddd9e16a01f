//! Backend traits for ledgerkeep.
//!
//! Two backends sit behind the persistence coordinator:
//! - a remote service holding one full, ordered sequence per collection
//!   (every write is a whole-collection replace)
//! - a local key-value store with a per-key size ceiling, shared by every
//!   view of the same data
//!
//! Both are synchronous; callers run them off the interactive path.

use crossbeam_channel::Receiver;
use thiserror::Error;

use crate::record::Collection;

/// Errors that can occur in a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The value does not fit the store's quota.
    #[error("Quota exceeded writing '{key}': {size} bytes (limit {limit})")]
    QuotaExceeded {
        key: String,
        size: usize,
        limit: usize,
    },

    /// Network failure or service unreachable.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The remote service answered with a non-success status.
    #[error("Remote returned status {code}: {message}")]
    Status {
        code: u16,
        message: String,
    },

    /// The request did not complete in time.
    #[error("Request timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    /// Stored bytes failed their integrity check.
    #[error("Corrupted value at '{key}': {reason}")]
    Corrupted {
        key: String,
        reason: String,
    },

    /// Key contains characters the store cannot represent.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Any other backend failure.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Returns true if the local store rejected the write for size.
    #[must_use]
    pub const fn is_quota(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }

    /// Returns true if a later attempt may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Timeout { .. } => true,
            Self::Status { code, .. } => *code >= 500 || *code == 408 || *code == 429,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// A change to one key of a shared local store.
///
/// The payload is deliberately absent: receivers always re-read the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub key: String,
}

/// The remote persistence service.
///
/// # Contract
/// - `fetch_collection` returns the full ordered sequence as JSON text
/// - `replace_collection` replaces the whole sequence server-side
/// - any failure (network, timeout, non-success status) is an error
pub trait RemoteBackend: Send + Sync {
    /// `GET /api/<collection>`.
    fn fetch_collection(&self, collection: Collection) -> Result<String, StorageError>;

    /// `POST /api/<collection>` with the full sequence.
    fn replace_collection(&self, collection: Collection, payload: &str) -> Result<(), StorageError>;
}

/// The local durable key-value store.
pub trait LocalStore: Send + Sync {
    /// Reads a key.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Writes a key. Fails with `QuotaExceeded` if the value does not fit.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removes a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Lists all keys.
    fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Removes every key.
    fn clear(&self) -> Result<(), StorageError>;

    /// Subscribes to changes made through any handle of the same store.
    ///
    /// Returns `None` when the store cannot deliver notifications; callers
    /// then rely on polling.
    fn watch(&self) -> Option<Receiver<StoreEvent>> {
        None
    }
}
