//! Backup & Versioning Manager.
//!
//! Backups are full snapshots of the six collections stored in the local
//! store under `backup_<unix-millis>` keys, with their metadata mirrored
//! in the `backup_index` key. At most `cap` backups are retained; the
//! oldest are evicted first.

mod manager;
mod retention;
mod scheduler;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::persistence::SaveOutcome;
use crate::record::Collection;
use crate::storage::keys::backup_millis;

pub use manager::BackupManager;
pub use scheduler::BackupScheduler;

/// Why a backup was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupKind {
    Auto,
    Manual,
    PreRestore,
    PreImport,
}

impl BackupKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::PreRestore => "pre-restore",
            Self::PreImport => "pre-import",
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata of one stored backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMeta {
    /// Local store key of the backup, `backup_<unix-millis>`.
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub kind: BackupKind,
    pub counts: BTreeMap<Collection, usize>,
    /// Corrupt image payloads left out of the stored snapshot.
    #[serde(default)]
    pub dropped_blobs: usize,
}

impl BackupMeta {
    /// Timestamp encoded in the id.
    #[must_use]
    pub fn millis(&self) -> i64 {
        backup_millis(&self.id).unwrap_or(i64::MIN)
    }
}

/// Result of a successful restore.
#[derive(Debug, Clone)]
pub struct RestoreReport {
    /// The backup that was restored.
    pub restored: BackupMeta,
    /// The `pre-restore` backup of the state that was replaced.
    pub safety: BackupMeta,
    pub save: SaveOutcome,
}
