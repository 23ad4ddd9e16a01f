use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{info, warn};

use crate::config::BackupConfig;
use crate::error::{LedgerError, LedgerResult, ValidationError};
use crate::integrity::IntegrityValidator;
use crate::persistence::PersistenceCoordinator;
use crate::record::Dataset;
use crate::storage::keys::{backup_key, classify, KeyClass, BACKUP_INDEX};
use crate::storage::{LocalStore, StorageError};
use crate::store::EntityStore;

use super::retention::rotate;
use super::{BackupKind, BackupMeta, RestoreReport};

/// Stored form of a backup.
#[derive(Serialize)]
struct BackupRecord<'a> {
    meta: &'a BackupMeta,
    data: &'a Dataset,
}

#[derive(Deserialize)]
struct StoredMeta {
    meta: BackupMeta,
}

fn storage_err(key: &str, err: StorageError) -> LedgerError {
    if err.is_quota() {
        LedgerError::LocalQuotaExceeded { key: key.to_string() }
    } else {
        LedgerError::Storage(err)
    }
}

/// Creates, rotates and restores backups.
pub struct BackupManager {
    store: Arc<EntityStore>,
    local: Arc<dyn LocalStore>,
    coordinator: Arc<PersistenceCoordinator>,
    validator: IntegrityValidator,
    config: BackupConfig,
    /// Serializes index updates and holds the last issued timestamp.
    last_millis: Mutex<i64>,
}

impl std::fmt::Debug for BackupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BackupManager {
    #[must_use]
    pub fn new(
        store: Arc<EntityStore>,
        local: Arc<dyn LocalStore>,
        coordinator: Arc<PersistenceCoordinator>,
        config: BackupConfig,
    ) -> Self {
        Self {
            store,
            local,
            coordinator,
            validator: IntegrityValidator::new(),
            config,
            last_millis: Mutex::new(i64::MIN),
        }
    }

    fn lock_index(&self) -> MutexGuard<'_, i64> {
        self.last_millis.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reads the index, rebuilding it from the backup keys when it is
    /// missing or unreadable.
    fn read_index(&self) -> LedgerResult<Vec<BackupMeta>> {
        if let Some(text) = self.local.get(BACKUP_INDEX)? {
            match serde_json::from_str(&text) {
                Ok(index) => return Ok(index),
                Err(e) => warn!(key = BACKUP_INDEX, error = %e, "backup index unreadable, rebuilding"),
            }
        }
        self.rebuild_index()
    }

    fn rebuild_index(&self) -> LedgerResult<Vec<BackupMeta>> {
        let mut index = Vec::new();
        for key in self.local.keys()? {
            if classify(&key) != KeyClass::Backup {
                continue;
            }
            let Some(text) = self.local.get(&key)? else { continue };
            match serde_json::from_str::<StoredMeta>(&text) {
                Ok(stored) if stored.meta.id == key => index.push(stored.meta),
                Ok(_) => warn!(key = %key, "backup metadata does not match its key"),
                Err(e) => warn!(key = %key, error = %e, "skipping unreadable backup"),
            }
        }
        index.sort_by_key(BackupMeta::millis);
        Ok(index)
    }

    fn write_index(&self, index: &[BackupMeta]) -> LedgerResult<()> {
        let text = serde_json::to_string(index).map_err(StorageError::from)?;
        self.local
            .set(BACKUP_INDEX, &text)
            .map_err(|e| storage_err(BACKUP_INDEX, e))
    }

    /// Snapshots the Entity Store into a new backup, then evicts the oldest
    /// backups beyond the cap.
    ///
    /// The snapshot passes the integrity validator first: corrupt image
    /// payloads are left out of the stored copy and counted in
    /// [`BackupMeta::dropped_blobs`].
    ///
    /// # Errors
    /// Returns `Validation` if the state is structurally broken (nothing is
    /// written), `LocalQuotaExceeded` if the backup does not fit the local
    /// store, or a storage error if the index cannot be updated.
    pub fn create_backup(&self, kind: BackupKind) -> LedgerResult<BackupMeta> {
        let mut dataset = self.store.snapshot()?.dataset;
        let issues = self.validator.validate(&mut dataset)?;
        let dropped_blobs = issues.dropped_blobs();
        if dropped_blobs > 0 {
            warn!(kind = %kind, dropped_blobs, "corrupt image payloads left out of backup");
        }
        let mut last = self.lock_index();
        let mut index = self.read_index()?;

        let newest = index.iter().map(BackupMeta::millis).max().unwrap_or(i64::MIN);
        let millis = Utc::now()
            .timestamp_millis()
            .max(last.saturating_add(1))
            .max(newest.saturating_add(1));
        *last = millis;

        let meta = BackupMeta {
            id: backup_key(millis),
            created_at: DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now),
            kind,
            counts: dataset.counts(),
            dropped_blobs,
        };
        let text = serde_json::to_string(&BackupRecord { meta: &meta, data: &dataset })
            .map_err(StorageError::from)?;
        self.local.set(&meta.id, &text).map_err(|e| storage_err(&meta.id, e))?;

        index.push(meta.clone());
        let evicted = rotate(&mut index, self.config.cap);
        self.write_index(&index)?;
        for old in &evicted {
            if let Err(e) = self.local.remove(&old.id) {
                warn!(backup_id = %old.id, error = %e, "failed to delete evicted backup");
            }
        }

        info!(backup_id = %meta.id, kind = %kind, evicted = evicted.len(), "backup created");
        Ok(meta)
    }

    /// All retained backups, newest first.
    ///
    /// # Errors
    /// Returns a storage error if the local store cannot be read.
    pub fn list_backups(&self) -> LedgerResult<Vec<BackupMeta>> {
        let _guard = self.lock_index();
        let mut index = self.read_index()?;
        index.sort_by_key(|m| std::cmp::Reverse(m.millis()));
        Ok(index)
    }

    /// The newest backup, optionally restricted to one kind.
    ///
    /// # Errors
    /// Returns a storage error if the local store cannot be read.
    pub fn latest_backup(&self, kind: Option<BackupKind>) -> LedgerResult<Option<BackupMeta>> {
        Ok(self
            .list_backups()?
            .into_iter()
            .find(|m| kind.map_or(true, |k| m.kind == k)))
    }

    /// Deletes one backup.
    ///
    /// # Errors
    /// Returns `BackupNotFound` if no backup has this id.
    pub fn delete_backup(&self, id: &str) -> LedgerResult<()> {
        let _guard = self.lock_index();
        let mut index = self.read_index()?;
        let before = index.len();
        index.retain(|m| m.id != id);
        if index.len() == before {
            return Err(LedgerError::BackupNotFound { backup_id: id.to_string() });
        }
        self.local.remove(id)?;
        self.write_index(&index)?;
        info!(backup_id = id, "backup deleted");
        Ok(())
    }

    /// Reads and validates the contents of a backup without restoring it.
    ///
    /// # Errors
    /// - `BackupNotFound` if the key does not exist
    /// - `RestoreValidationFailed` if the contents are malformed
    pub fn read_backup(&self, id: &str) -> LedgerResult<Dataset> {
        if classify(id) != KeyClass::Backup {
            return Err(LedgerError::BackupNotFound { backup_id: id.to_string() });
        }
        let text = self
            .local
            .get(id)?
            .ok_or_else(|| LedgerError::BackupNotFound { backup_id: id.to_string() })?;

        let invalid = |source: ValidationError| LedgerError::RestoreValidationFailed {
            backup_id: id.to_string(),
            source,
        };
        let value: Json = serde_json::from_str(&text).map_err(|e| {
            invalid(ValidationError::NotAnObject {
                reason: e.to_string(),
            })
        })?;
        let data = value.get("data").ok_or_else(|| {
            invalid(ValidationError::NotAnObject {
                reason: "backup has no data section".to_string(),
            })
        })?;
        let (dataset, report) = self.validator.validate_raw(data).map_err(invalid)?;
        if report.dropped_blobs() > 0 {
            warn!(backup_id = id, dropped = report.dropped_blobs(), "corrupt images dropped from backup");
        }
        Ok(dataset)
    }

    /// Restores a backup.
    ///
    /// The backup is validated first; on success the current state is saved
    /// as a `pre-restore` backup, the Entity Store is replaced and a save is
    /// triggered. A backup that fails validation changes nothing.
    ///
    /// # Errors
    /// - `BackupNotFound` / `RestoreValidationFailed` before any change
    /// - errors from the safety backup (nothing replaced) or from the save
    pub fn restore_backup(&self, id: &str) -> LedgerResult<RestoreReport> {
        let dataset = self.read_backup(id)?;
        let restored = self
            .list_backups()?
            .into_iter()
            .find(|m| m.id == id)
            .ok_or_else(|| LedgerError::BackupNotFound { backup_id: id.to_string() })?;

        let safety = self.create_backup(BackupKind::PreRestore)?;
        self.store.replace_dataset(dataset)?;
        info!(backup_id = id, safety_id = %safety.id, "backup restored");

        let save = self.coordinator.save()?;
        Ok(RestoreReport {
            restored,
            safety,
            save,
        })
    }

    /// Creates an `auto` backup if none exists or the newest is older than
    /// the configured interval.
    ///
    /// # Errors
    /// Same as [`BackupManager::create_backup`].
    pub fn run_due_auto_backup(&self) -> LedgerResult<Option<BackupMeta>> {
        let interval = chrono::Duration::milliseconds(
            i64::try_from(self.config.auto_interval_ms).unwrap_or(i64::MAX),
        );
        let due = match self.latest_backup(Some(BackupKind::Auto))? {
            None => true,
            Some(latest) => Utc::now() - latest.created_at >= interval,
        };
        if due {
            self.create_backup(BackupKind::Auto).map(Some)
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersistenceConfig;
    use crate::customer::Customer;
    use crate::inventory::InventoryItem;
    use crate::persistence::ViewId;
    use crate::record::{ImageBlob, Money};
    use crate::storage::{MemoryLocalStore, MemoryRemote};
    use crate::store::Mutation;

    struct Fixture {
        store: Arc<EntityStore>,
        local: Arc<MemoryLocalStore>,
        manager: BackupManager,
    }

    fn fixture(cap: usize) -> Fixture {
        let store = Arc::new(EntityStore::new());
        let local = Arc::new(MemoryLocalStore::new());
        let coordinator = Arc::new(PersistenceCoordinator::new(
            Arc::clone(&store),
            Arc::new(MemoryRemote::new()),
            local.clone(),
            PersistenceConfig::default(),
            ViewId::new(),
        ));
        let manager = BackupManager::new(
            Arc::clone(&store),
            local.clone(),
            coordinator,
            BackupConfig {
                cap,
                ..BackupConfig::default()
            },
        );
        Fixture { store, local, manager }
    }

    #[test]
    fn test_ids_strictly_increase() {
        let f = fixture(30);
        let a = f.manager.create_backup(BackupKind::Manual).unwrap();
        let b = f.manager.create_backup(BackupKind::Manual).unwrap();
        assert!(b.millis() > a.millis());
    }

    #[test]
    fn test_corrupt_blob_left_out_of_backup() {
        let f = fixture(30);
        let item = InventoryItem::new_project("Broken scan", Money::from_cents(100))
            .with_image(ImageBlob::new("data:image/png;base64,AAAAAAAAAAAA"));
        let id = item.id;
        f.store.mutate(Mutation::Insert(item)).unwrap();

        let meta = f.manager.create_backup(BackupKind::Manual).unwrap();
        assert_eq!(meta.dropped_blobs, 1);
        let stored = f.local.get(&meta.id).unwrap().unwrap();
        assert!(!stored.contains("imageBlobRef"));
        assert!(stored.contains("Broken scan"));

        // The live record keeps its payload.
        assert!(f.store.get::<InventoryItem>(id).unwrap().unwrap().image.is_some());
    }

    #[test]
    fn test_rotation_keeps_cap_most_recent() {
        let f = fixture(3);
        let ids: Vec<String> = (0..5)
            .map(|_| f.manager.create_backup(BackupKind::Auto).unwrap().id)
            .collect();
        let listed: Vec<String> = f.manager.list_backups().unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(listed, [ids[4].clone(), ids[3].clone(), ids[2].clone()]);
        assert!(f.local.get(&ids[0]).unwrap().is_none());
        assert!(f.local.get(&ids[1]).unwrap().is_none());
    }

    #[test]
    fn test_index_rebuilt_when_missing() {
        let f = fixture(30);
        let meta = f.manager.create_backup(BackupKind::Manual).unwrap();
        f.local.remove(BACKUP_INDEX).unwrap();
        assert_eq!(f.manager.list_backups().unwrap(), [meta]);
    }

    #[test]
    fn test_restore_rejects_malformed_backup() {
        let f = fixture(30);
        f.store.mutate(Mutation::Insert(Customer::new("Ana"))).unwrap();
        f.local
            .set("backup_42", "{\"meta\":{},\"data\":{\"inventory\":{}}}")
            .unwrap();
        let err = f.manager.restore_backup("backup_42").unwrap_err();
        assert!(matches!(err, LedgerError::RestoreValidationFailed { .. }));
        assert_eq!(f.store.list::<Customer>().unwrap().len(), 1);
        assert!(f.manager.list_backups().unwrap().is_empty());
    }

    #[test]
    fn test_restore_unknown_backup() {
        let f = fixture(30);
        assert!(matches!(
            f.manager.restore_backup("backup_1"),
            Err(LedgerError::BackupNotFound { .. })
        ));
        assert!(matches!(
            f.manager.restore_backup("data_sales"),
            Err(LedgerError::BackupNotFound { .. })
        ));
    }

    #[test]
    fn test_delete_backup() {
        let f = fixture(30);
        let meta = f.manager.create_backup(BackupKind::Manual).unwrap();
        f.manager.delete_backup(&meta.id).unwrap();
        assert!(f.manager.list_backups().unwrap().is_empty());
        assert!(f.manager.delete_backup(&meta.id).is_err());
    }

    #[test]
    fn test_auto_backup_only_when_due() {
        let f = fixture(30);
        f.manager.create_backup(BackupKind::Manual).unwrap();
        let first = f.manager.run_due_auto_backup().unwrap();
        assert!(first.is_some());
        assert!(f.manager.run_due_auto_backup().unwrap().is_none());
        assert_eq!(
            f.manager.latest_backup(Some(BackupKind::Auto)).unwrap(),
            first
        );
    }
}
