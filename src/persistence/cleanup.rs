//! Bounded cleanup pass run when the local store reports a quota failure.

use tracing::{debug, info};

use crate::record::{Dataset, Record};
use crate::storage::keys::{classify, KeyClass};
use crate::storage::{LocalStore, StorageError};

fn strip_records<R: Record>(records: &mut [R], threshold: usize, keep_recent: usize) -> usize {
    let older = records.len().saturating_sub(keep_recent);
    let mut stripped = 0;
    for record in &mut records[..older] {
        let Some(slot) = record.image_slot() else {
            return 0;
        };
        if slot.as_ref().is_some_and(|blob| blob.len() > threshold) {
            *slot = None;
            stripped += 1;
        }
    }
    if stripped > 0 {
        debug!(collection = %R::COLLECTION, stripped, "oversized images stripped");
    }
    stripped
}

/// Drops image payloads larger than `threshold` bytes from every record
/// except the `keep_recent` most recently added of each collection.
///
/// Returns the number of payloads removed.
pub(crate) fn strip_oversized(dataset: &mut Dataset, threshold: usize, keep_recent: usize) -> usize {
    strip_records(&mut dataset.inventory, threshold, keep_recent)
        + strip_records(&mut dataset.gallery, threshold, keep_recent)
        + strip_records(&mut dataset.ideas, threshold, keep_recent)
}

/// Deletes keys that belong neither to this engine nor to a collaborator feature.
pub(crate) fn discard_stray_keys(local: &dyn LocalStore) -> Result<usize, StorageError> {
    let mut removed = 0;
    for key in local.keys()? {
        if classify(&key) == KeyClass::Stray {
            local.remove(&key)?;
            removed += 1;
        }
    }
    if removed > 0 {
        info!(removed, "stray local keys discarded");
    }
    Ok(removed)
}
