//! Local store key layout.
//!
//! ```text
//! data_<collection>     current state of one collection
//! backup_<millis>       one backup snapshot
//! backup_index          metadata of all backups
//! last_save             marker written by every save (sync polling)
//! pending_remote        set while a degraded save has not reached the remote
//! search_*, template_*  reserved for collaborator features
//! ```
//!
//! Anything else is a stray key and may be discarded by the quota cleanup.

use crate::record::Collection;

pub const DATA_PREFIX: &str = "data_";
pub const BACKUP_PREFIX: &str = "backup_";
pub const BACKUP_INDEX: &str = "backup_index";
pub const LAST_SAVE: &str = "last_save";
pub const PENDING_REMOTE: &str = "pending_remote";

/// Prefixes owned by collaborator features; never touched by cleanup.
pub const COLLABORATOR_PREFIXES: [&str; 2] = ["search_", "template_"];

const MAX_KEY_LEN: usize = 128;

/// What a key is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    Collection(Collection),
    Backup,
    BackupIndex,
    LastSave,
    PendingRemote,
    Collaborator,
    Stray,
}

/// Key holding the current state of `collection`.
#[must_use]
pub fn collection_key(collection: Collection) -> String {
    format!("{DATA_PREFIX}{collection}")
}

/// Key for a backup taken at `millis` since the epoch.
#[must_use]
pub fn backup_key(millis: i64) -> String {
    format!("{BACKUP_PREFIX}{millis}")
}

/// Parses the timestamp out of a backup key.
#[must_use]
pub fn backup_millis(key: &str) -> Option<i64> {
    key.strip_prefix(BACKUP_PREFIX)?.parse().ok()
}

/// Classifies a key.
#[must_use]
pub fn classify(key: &str) -> KeyClass {
    match key {
        BACKUP_INDEX => return KeyClass::BackupIndex,
        LAST_SAVE => return KeyClass::LastSave,
        PENDING_REMOTE => return KeyClass::PendingRemote,
        _ => {}
    }
    if let Some(name) = key.strip_prefix(DATA_PREFIX) {
        if let Some(c) = Collection::ALL.iter().find(|c| c.as_str() == name) {
            return KeyClass::Collection(*c);
        }
    }
    if backup_millis(key).is_some() {
        return KeyClass::Backup;
    }
    if COLLABORATOR_PREFIXES.iter().any(|p| key.starts_with(p)) {
        return KeyClass::Collaborator;
    }
    KeyClass::Stray
}

/// Keys are restricted so every store (including file-backed ones) can hold them.
#[must_use]
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}
