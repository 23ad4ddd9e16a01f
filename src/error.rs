//! Error types for ledgerkeep.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! the exact failure. Corrupt image payloads are not errors: they are
//! reported as [`IntegrityIssue`](crate::integrity::IntegrityIssue)s next to
//! a successful save.

use thiserror::Error;

use crate::record::{Collection, RecordId};
use crate::storage::StorageError;

/// Structural problems with the data itself.
///
/// These never change on retry, so they are surfaced to the caller as-is.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Collection '{collection}' is missing from the payload")]
    MissingCollection {
        collection: Collection,
    },

    #[error("Collection '{collection}' is not a sequence (found {found})")]
    NotASequence {
        collection: Collection,
        found: String,
    },

    #[error("Record {index} in '{collection}' is malformed: {reason}")]
    MalformedRecord {
        collection: Collection,
        index: usize,
        reason: String,
    },

    #[error("Record in '{collection}' has a nil id")]
    NilId {
        collection: Collection,
    },

    #[error("Duplicate id {id} in '{collection}'")]
    DuplicateId {
        collection: Collection,
        id: RecordId,
    },

    #[error("Field '{field}' of {id} in '{collection}' is not a finite number")]
    NonFiniteNumber {
        collection: Collection,
        id: RecordId,
        field: &'static str,
    },

    #[error("Commission {value}% is out of range [0, 100]")]
    CommissionOutOfRange {
        value: f64,
    },

    #[error("Payload is not a JSON object: {reason}")]
    NotAnObject {
        reason: String,
    },
}

/// Failures of the Entity Store mutation primitive.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record {id} already exists in '{collection}'")]
    DuplicateId {
        collection: Collection,
        id: RecordId,
    },

    #[error("Record {id} not found in '{collection}'")]
    NotFound {
        collection: Collection,
        id: RecordId,
    },

    #[error("Update targets {target} but carries id {actual}")]
    IdMismatch {
        target: RecordId,
        actual: RecordId,
    },

    #[error("Records in '{collection}' are append-only")]
    AppendOnly {
        collection: Collection,
    },

    #[error("Entity store lock poisoned: {context}")]
    Poisoned {
        context: &'static str,
    },
}

/// Top-level error type for ledgerkeep.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Remote service unavailable for '{collection}': {reason}")]
    RemoteUnavailable {
        collection: Collection,
        reason: String,
    },

    #[error("Local store quota exceeded writing '{key}'")]
    LocalQuotaExceeded {
        key: String,
    },

    #[error("Persistence failed on both backends (remote: {remote}; local: {local}); latest edits exist only in memory")]
    PersistenceFailed {
        remote: String,
        local: String,
    },

    #[error("Backup {backup_id} failed validation: {source}")]
    RestoreValidationFailed {
        backup_id: String,
        #[source]
        source: ValidationError,
    },

    #[error("Backup not found: {backup_id}")]
    BackupNotFound {
        backup_id: String,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl LedgerError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error (including restore validation).
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::RestoreValidationFailed { .. })
    }

    /// Returns true when the latest edits could not be made durable anywhere.
    #[must_use]
    pub const fn is_persistence_failure(&self) -> bool {
        matches!(self, Self::PersistenceFailed { .. })
    }

    /// Returns true for failures that must be surfaced to the user as-is.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.is_validation() || self.is_persistence_failure()
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RemoteUnavailable { .. } | Self::LocalQuotaExceeded { .. } => true,
            // Both backends exhausted now, but a later save may succeed.
            Self::PersistenceFailed { .. } => true,
            Self::Storage(e) => e.is_transient(),
            Self::Validation(_)
            | Self::RestoreValidationFailed { .. }
            | Self::Store(_)
            | Self::BackupNotFound { .. }
            | Self::Config { .. }
            | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for ledgerkeep operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::NotASequence {
            collection: Collection::Customers,
            found: "object".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("customers"));
        assert!(msg.contains("not a sequence"));
    }

    #[test]
    fn test_store_error_display() {
        let id = RecordId::new();
        let err = StoreError::NotFound {
            collection: Collection::Inventory,
            id,
        };
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_ledger_error_from_validation() {
        let err: LedgerError = ValidationError::CommissionOutOfRange { value: 120.0 }.into();
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_restore_validation_is_not_retryable() {
        let err = LedgerError::RestoreValidationFailed {
            backup_id: "backup_1".to_string(),
            source: ValidationError::MissingCollection {
                collection: Collection::Ideas,
            },
        };
        assert!(err.is_validation());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("backup_1"));
    }

    #[test]
    fn test_persistence_failed_is_loud() {
        let err = LedgerError::PersistenceFailed {
            remote: "connection refused".to_string(),
            local: "quota".to_string(),
        };
        assert!(err.is_persistence_failure());
        assert!(err.is_fatal());
        assert!(err.to_string().contains("only in memory"));
    }

    #[test]
    fn test_transient_storage_errors_retry() {
        let err: LedgerError = StorageError::Unavailable("reset".to_string()).into();
        assert!(err.is_retryable());

        let err: LedgerError = StorageError::Corrupted {
            key: "data_sales".to_string(),
            reason: "crc".to_string(),
        }
        .into();
        assert!(!err.is_retryable());
    }
}
