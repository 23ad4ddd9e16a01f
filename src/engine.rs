//! The `Ledger` facade: the API collaborators use.
//!
//! A `Ledger` is one open view of the data. It owns the Entity Store and
//! the read cache, and wires the persistence coordinator, the backup
//! manager and the sync monitor to the two backends it was opened with.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ledgerkeep::{Ledger, LedgerConfig, Customer, Mutation};
//! use ledgerkeep::storage::{MemoryLocalStore, MemoryRemote};
//!
//! let ledger = Ledger::open(
//!     Arc::new(MemoryRemote::new()),
//!     Arc::new(MemoryLocalStore::new()),
//!     LedgerConfig::default(),
//! )?;
//! ledger.mutate(Mutation::Insert(Customer::new("Ana")))?;
//! ledger.save()?;
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::Receiver;
use serde_json::Value as Json;
use tracing::info;

use crate::backup::{BackupKind, BackupManager, BackupMeta, BackupScheduler, RestoreReport};
use crate::cache::{CacheStats, ReadCache};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult, ValidationError};
use crate::integrity::{IntegrityReport, IntegrityValidator};
use crate::inventory::{InventoryItem, ItemStatus};
use crate::persistence::{LoadReport, PersistenceCoordinator, Phase, SaveOutcome, ViewId};
use crate::query::{self, Filter, QueryKey, SalesSummary};
use crate::record::{Collection, Dataset, Record, RecordId};
use crate::sale::SaleRecord;
use crate::storage::{LocalStore, RemoteBackend, StorageError};
use crate::store::{EntityStore, Mutation, Prior};
use crate::sync::{SyncDecision, SyncEvent, SyncMonitor, SyncTasks};

/// Longest wait between auto-backup checks.
const MAX_BACKUP_CHECK: Duration = Duration::from_secs(60);

struct Background {
    sync: SyncTasks,
    backups: BackupScheduler,
}

/// Result of [`Ledger::import_dataset`].
#[derive(Debug, Clone)]
pub struct ImportReport {
    /// Backup of the state the import replaced.
    pub backup: BackupMeta,
    /// Non-fatal problems repaired while adopting the payload.
    pub issues: IntegrityReport,
    pub save: SaveOutcome,
}

/// One open view of the data.
pub struct Ledger {
    config: LedgerConfig,
    store: Arc<EntityStore>,
    cache: ReadCache,
    local: Arc<dyn LocalStore>,
    validator: IntegrityValidator,
    coordinator: Arc<PersistenceCoordinator>,
    backups: Arc<BackupManager>,
    monitor: Arc<SyncMonitor>,
    background: Mutex<Option<Background>>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("view", &self.coordinator.view())
            .field("phase", &self.coordinator.phase())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Ledger {
    /// Creates a ledger with an empty Entity Store, without loading.
    ///
    /// # Errors
    /// Returns `Config` if the configuration is invalid.
    pub fn new(
        remote: Arc<dyn RemoteBackend>,
        local: Arc<dyn LocalStore>,
        config: LedgerConfig,
    ) -> LedgerResult<Self> {
        let config = config.validate()?;
        let view = ViewId::new();
        let store = Arc::new(EntityStore::new());
        let coordinator = Arc::new(PersistenceCoordinator::new(
            Arc::clone(&store),
            remote,
            Arc::clone(&local),
            config.persistence.clone(),
            view,
        ));
        let backups = Arc::new(BackupManager::new(
            Arc::clone(&store),
            Arc::clone(&local),
            Arc::clone(&coordinator),
            config.backup.clone(),
        ));
        let monitor = Arc::new(SyncMonitor::new(Arc::clone(&coordinator)));

        Ok(Self {
            cache: ReadCache::new(config.cache.ttl()),
            config,
            store,
            local,
            validator: IntegrityValidator::new(),
            coordinator,
            backups,
            monitor,
            background: Mutex::new(None),
        })
    }

    /// Creates a ledger and loads the durable state into it.
    ///
    /// # Errors
    /// Returns `Config` for an invalid configuration, or the load error.
    pub fn open(
        remote: Arc<dyn RemoteBackend>,
        local: Arc<dyn LocalStore>,
        config: LedgerConfig,
    ) -> LedgerResult<Self> {
        let ledger = Self::new(remote, local, config)?;
        ledger.load()?;
        Ok(ledger)
    }

    /// Replaces the in-memory state with the durable state.
    ///
    /// # Errors
    /// See [`PersistenceCoordinator::load`].
    pub fn load(&self) -> LedgerResult<LoadReport> {
        let report = self.coordinator.load()?;
        self.monitor.mark_current_seen();
        Ok(report)
    }

    /// Identity of this view in last-save markers.
    #[must_use]
    pub fn view_id(&self) -> ViewId {
        self.coordinator.view()
    }

    #[must_use]
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Current phase of the persistence coordinator.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.coordinator.phase()
    }

    /// The Entity Store backing this view.
    #[must_use]
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    // ---- mutation -------------------------------------------------------

    /// Applies a mutation; returns the prior state of the affected record(s).
    ///
    /// # Errors
    /// See [`EntityStore::mutate`].
    pub fn mutate<R: Record>(&self, mutation: Mutation<R>) -> LedgerResult<Prior<R>> {
        Ok(self.store.mutate(mutation)?)
    }

    /// Inserts a record and returns its id.
    ///
    /// # Errors
    /// Returns `DuplicateId` if the id already exists.
    pub fn insert<R: Record>(&self, record: R) -> LedgerResult<RecordId> {
        let id = record.id();
        self.store.mutate(Mutation::Insert(record))?;
        Ok(id)
    }

    /// Edits a record in place; returns the prior record.
    ///
    /// # Errors
    /// See [`EntityStore::update`].
    pub fn update<R: Record>(&self, id: RecordId, f: impl FnOnce(&mut R)) -> LedgerResult<R> {
        Ok(self.store.update(id, f)?)
    }

    /// Removes a record; returns it.
    ///
    /// # Errors
    /// Returns `NotFound` if the id is unknown.
    pub fn remove<R: Record>(&self, id: RecordId) -> LedgerResult<R> {
        self.store
            .mutate::<R>(Mutation::RemoveAt(id))?
            .into_record()
            .ok_or_else(|| LedgerError::internal("removal returned no prior record"))
    }

    // ---- reads ----------------------------------------------------------

    /// Looks up one record by id.
    ///
    /// # Errors
    /// Returns `Store` if the store lock is poisoned.
    pub fn get<R: Record>(&self, id: RecordId) -> LedgerResult<Option<R>> {
        Ok(self.store.get(id)?)
    }

    /// All records of `R`, in insertion order.
    ///
    /// # Errors
    /// Returns `Store` if the store lock is poisoned.
    pub fn list<R: Record>(&self) -> LedgerResult<Vec<R>> {
        Ok(self.store.list()?)
    }

    /// Record counts per collection.
    ///
    /// # Errors
    /// Returns `Store` if the store lock is poisoned.
    pub fn counts(&self) -> LedgerResult<BTreeMap<Collection, usize>> {
        Ok(self.store.read_all(&[], Dataset::counts)?.0)
    }

    fn cached<T>(&self, key: &QueryKey, compute: impl FnOnce() -> LedgerResult<T>) -> LedgerResult<Arc<T>>
    where
        T: std::any::Any + Send + Sync,
    {
        // Taken before computing: a concurrent mutation can only make the
        // entry look stale, never fresh.
        let generations = self.store.generations(key.reads())?;
        self.cache.get_or_compute(key, &generations, compute)
    }

    /// Records of `R` matching `filter`, in insertion order. Cached.
    ///
    /// # Errors
    /// Returns `Validation` if the filter has an invalid pattern.
    pub fn query<R: Record>(&self, filter: &Filter) -> LedgerResult<Arc<Vec<R>>> {
        let key = QueryKey::filtered(R::COLLECTION, filter);
        self.cached(&key, || {
            let compiled = filter.compile::<R>()?;
            Ok(self.store.read(|records: &[R]| {
                records
                    .iter()
                    .filter(|r| compiled.matches(*r))
                    .cloned()
                    .collect()
            })?)
        })
    }

    /// Totals over all sales. Cached.
    ///
    /// # Errors
    /// Returns `Store` if the store lock is poisoned.
    pub fn sales_summary(&self) -> LedgerResult<Arc<SalesSummary>> {
        let key = QueryKey::derived("sales_summary", &[Collection::Sales]);
        self.cached(&key, || Ok(self.store.read(|sales: &[SaleRecord]| query::sales_summary(sales))?))
    }

    /// Item counts per status. Cached.
    ///
    /// # Errors
    /// Returns `Store` if the store lock is poisoned.
    pub fn status_counts(&self) -> LedgerResult<Arc<BTreeMap<ItemStatus, usize>>> {
        let key = QueryKey::derived("status_counts", &[Collection::Inventory]);
        self.cached(&key, || Ok(self.store.read(|items: &[InventoryItem]| query::status_counts(items))?))
    }

    /// Customer names referenced by items or sales that match no customer. Cached.
    ///
    /// # Errors
    /// Returns `Store` if the store lock is poisoned.
    pub fn dangling_customer_refs(&self) -> LedgerResult<Arc<Vec<String>>> {
        let key = QueryKey::derived(
            "dangling_customer_refs",
            &[Collection::Inventory, Collection::Sales, Collection::Customers],
        );
        self.cached(&key, || Ok(self.store.read_all(&[], query::dangling_customer_refs)?.0))
    }

    /// Drops every cached result.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // ---- persistence ----------------------------------------------------

    /// Persists the current state.
    ///
    /// # Errors
    /// See [`PersistenceCoordinator::save`].
    pub fn save(&self) -> LedgerResult<SaveOutcome> {
        self.coordinator.save()
    }

    /// Runs the integrity checks over a copy of the current state.
    ///
    /// # Errors
    /// Returns the structural problem if there is one.
    pub fn verify(&self) -> LedgerResult<IntegrityReport> {
        let mut dataset = self.store.snapshot()?.dataset;
        Ok(self.validator.validate(&mut dataset)?)
    }

    // ---- backups --------------------------------------------------------

    /// # Errors
    /// See [`BackupManager::create_backup`].
    pub fn create_backup(&self, kind: BackupKind) -> LedgerResult<BackupMeta> {
        self.backups.create_backup(kind)
    }

    /// # Errors
    /// See [`BackupManager::restore_backup`].
    pub fn restore_backup(&self, id: &str) -> LedgerResult<RestoreReport> {
        self.backups.restore_backup(id)
    }

    /// # Errors
    /// See [`BackupManager::list_backups`].
    pub fn list_backups(&self) -> LedgerResult<Vec<BackupMeta>> {
        self.backups.list_backups()
    }

    /// # Errors
    /// See [`BackupManager::delete_backup`].
    pub fn delete_backup(&self, id: &str) -> LedgerResult<()> {
        self.backups.delete_backup(id)
    }

    /// # Errors
    /// See [`BackupManager::latest_backup`].
    pub fn latest_backup(&self, kind: Option<BackupKind>) -> LedgerResult<Option<BackupMeta>> {
        self.backups.latest_backup(kind)
    }

    /// The backup manager, for callers that drive it directly.
    #[must_use]
    pub fn backups(&self) -> &Arc<BackupManager> {
        &self.backups
    }

    // ---- import / export ------------------------------------------------

    /// Replaces the whole dataset with `payload` (an object holding all six
    /// collections), after backing up the current state as `pre-import`.
    ///
    /// # Errors
    /// Returns `Validation` before any change if the payload is malformed.
    pub fn import_dataset(&self, payload: &Json) -> LedgerResult<ImportReport> {
        let (dataset, issues) = self.validator.validate_raw(payload)?;
        let backup = self.backups.create_backup(BackupKind::PreImport)?;
        self.store.replace_dataset(dataset)?;
        info!(backup_id = %backup.id, "dataset imported");
        let save = self.coordinator.save()?;
        Ok(ImportReport { backup, issues, save })
    }

    /// Parses `text` as JSON and imports it.
    ///
    /// # Errors
    /// Returns `Validation` if the text is not a JSON object.
    pub fn import_json(&self, text: &str) -> LedgerResult<ImportReport> {
        let payload: Json = serde_json::from_str(text).map_err(|e| {
            LedgerError::Validation(ValidationError::NotAnObject { reason: e.to_string() })
        })?;
        self.import_dataset(&payload)
    }

    /// The current state as one JSON object keyed by collection.
    ///
    /// # Errors
    /// Returns `Storage` if a record cannot be serialized.
    pub fn export_dataset(&self) -> LedgerResult<Json> {
        let dataset = self.store.snapshot()?.dataset;
        serde_json::to_value(&dataset).map_err(|e| LedgerError::Storage(StorageError::from(e)))
    }

    // ---- sync -----------------------------------------------------------

    /// Receives an event after every reload triggered by another view.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        self.monitor.subscribe()
    }

    /// Runs one reconciliation now.
    ///
    /// # Errors
    /// See [`SyncMonitor::reconcile`].
    pub fn reconcile(&self) -> LedgerResult<SyncDecision> {
        self.monitor.reconcile()
    }

    /// Starts the sync threads and the auto-backup scheduler.
    ///
    /// Calling it again while they run does nothing.
    ///
    /// # Errors
    /// Returns `Internal` if a thread cannot be spawned.
    pub fn start_background(&self) -> LedgerResult<()> {
        let mut background = self.background.lock().unwrap_or_else(PoisonError::into_inner);
        if background.is_some() {
            return Ok(());
        }
        let sync = SyncTasks::start(Arc::clone(&self.monitor), self.local.watch(), &self.config.sync)?;
        let check_every = self.config.backup.auto_interval().min(MAX_BACKUP_CHECK);
        let backups = BackupScheduler::start(Arc::clone(&self.backups), check_every)?;
        *background = Some(Background { sync, backups });
        info!(view = %self.view_id(), "background tasks started");
        Ok(())
    }

    /// Stops the background tasks and waits for them.
    pub fn stop_background(&self) {
        let background = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(Background { sync, backups }) = background {
            sync.stop();
            backups.stop();
        }
    }
}

impl Drop for Ledger {
    fn drop(&mut self) {
        self.stop_background();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customer::Customer;
    use crate::inventory::InventoryItem;
    use crate::record::Money;
    use crate::storage::{MemoryLocalStore, MemoryRemote};

    fn ledger() -> Ledger {
        Ledger::open(
            Arc::new(MemoryRemote::new()),
            Arc::new(MemoryLocalStore::new()),
            LedgerConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_query_is_cached_until_mutation() {
        let ledger = ledger();
        ledger.insert(Customer::new("Ana")).unwrap();
        ledger.insert(Customer::new("Bo")).unwrap();
        let filter = Filter::all().contains("name", "an");

        let first = ledger.query::<Customer>(&filter).unwrap();
        let second = ledger.query::<Customer>(&filter).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 1);

        ledger.insert(Customer::new("Dana")).unwrap();
        let third = ledger.query::<Customer>(&filter).unwrap();
        assert_eq!(third.len(), 2);
        assert_eq!(ledger.cache_stats().hits, 1);
    }

    #[test]
    fn test_unrelated_mutation_keeps_cache() {
        let ledger = ledger();
        ledger
            .insert(InventoryItem::new_project("Mug", Money::from_cents(1500)))
            .unwrap();
        let before = ledger.status_counts().unwrap();
        ledger.insert(Customer::new("Ana")).unwrap();
        let after = ledger.status_counts().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after[&ItemStatus::Pending], 1);
    }

    #[test]
    fn test_remove_returns_record() {
        let ledger = ledger();
        let id = ledger.insert(Customer::new("Ana")).unwrap();
        let removed: Customer = ledger.remove(id).unwrap();
        assert_eq!(removed.name, "Ana");
        assert!(ledger.get::<Customer>(id).unwrap().is_none());
    }

    #[test]
    fn test_export_import() {
        let ledger = ledger();
        ledger.insert(Customer::new("Ana")).unwrap();
        let exported = ledger.export_dataset().unwrap();

        let other = self::ledger();
        let report = other.import_dataset(&exported).unwrap();
        assert_eq!(report.backup.kind, BackupKind::PreImport);
        assert_eq!(other.list::<Customer>().unwrap()[0].name, "Ana");
    }

    #[test]
    fn test_import_rejects_malformed_payload() {
        let ledger = ledger();
        ledger.insert(Customer::new("Ana")).unwrap();
        let err = ledger.import_json("{\"inventory\": 3}").unwrap_err();
        assert!(err.is_validation());
        assert_eq!(ledger.counts().unwrap()[&Collection::Customers], 1);
        assert!(ledger.list_backups().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = LedgerConfig::default();
        config.backup.cap = 0;
        let err = Ledger::new(Arc::new(MemoryRemote::new()), Arc::new(MemoryLocalStore::new()), config).unwrap_err();
        assert!(matches!(err, LedgerError::Config { .. }));
    }

    #[test]
    fn test_background_start_stop() {
        let ledger = ledger();
        ledger.start_background().unwrap();
        ledger.start_background().unwrap();
        ledger.stop_background();
        ledger.stop_background();
    }
}
