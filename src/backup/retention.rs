//! Rotation eviction for the backup index.

use super::BackupMeta;

/// Sorts `index` oldest first and removes the entries beyond `cap`.
///
/// Returns the evicted entries, oldest first.
pub(crate) fn rotate(index: &mut Vec<BackupMeta>, cap: usize) -> Vec<BackupMeta> {
    index.sort_by_key(BackupMeta::millis);
    let excess = index.len().saturating_sub(cap);
    index.drain(..excess).collect()
}
