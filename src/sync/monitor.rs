use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, info};

use crate::error::LedgerResult;
use crate::persistence::{PersistenceCoordinator, SaveMarker};

use super::{SyncDecision, SyncEvent};

/// Reconciles the Entity Store with saves made by other views.
pub struct SyncMonitor {
    coordinator: Arc<PersistenceCoordinator>,
    last_seen: Mutex<Option<SaveMarker>>,
    subscribers: Mutex<Vec<Sender<SyncEvent>>>,
}

impl std::fmt::Debug for SyncMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncMonitor")
            .field("view", &self.coordinator.view())
            .finish_non_exhaustive()
    }
}

impl SyncMonitor {
    #[must_use]
    pub fn new(coordinator: Arc<PersistenceCoordinator>) -> Self {
        Self {
            coordinator,
            last_seen: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn lock_seen(&self) -> MutexGuard<'_, Option<SaveMarker>> {
        self.last_seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the current marker as seen, so it does not trigger a reload.
    ///
    /// Called right after the initial load.
    pub fn mark_current_seen(&self) {
        let current = self.coordinator.read_marker();
        *self.lock_seen() = current;
    }

    /// The last marker this monitor has accounted for.
    #[must_use]
    pub fn last_seen(&self) -> Option<SaveMarker> {
        self.lock_seen().clone()
    }

    /// Receives a [`SyncEvent`] after every reload.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        let (tx, rx) = unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    fn notify(&self, event: &SyncEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Compares the last-save marker with the last one seen and reloads the
    /// durable state if another view has saved since.
    ///
    /// # Errors
    /// Propagates load errors; the marker is then not marked as seen, so
    /// the next attempt retries.
    pub fn reconcile(&self) -> LedgerResult<SyncDecision> {
        let Some(marker) = self.coordinator.read_marker() else {
            return Ok(SyncDecision::Unchanged);
        };
        if self.lock_seen().as_ref() == Some(&marker) {
            return Ok(SyncDecision::Unchanged);
        }
        if marker.view == self.coordinator.view() {
            *self.lock_seen() = Some(marker);
            return Ok(SyncDecision::Unchanged);
        }
        let Some(report) = self.coordinator.reload_if_clear()? else {
            debug!(from_view = %marker.view, "reconciliation deferred, local write in progress");
            return Ok(SyncDecision::Deferred);
        };
        *self.lock_seen() = Some(marker.clone());
        info!(from_view = %marker.view, source = ?report.source, "reloaded after foreign save");
        self.notify(&SyncEvent::Refreshed {
            source: report.source,
            marker,
        });
        Ok(SyncDecision::Reloaded(report.source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersistenceConfig;
    use crate::customer::Customer;
    use crate::persistence::{LoadSource, ViewId};
    use crate::storage::{LocalStore, MemoryLocalStore, MemoryRemote, RemoteBackend};
    use crate::record::Collection;
    use crate::storage::StorageError;
    use crate::store::{EntityStore, Mutation};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use crossbeam_channel::bounded;

    struct View {
        store: Arc<EntityStore>,
        coordinator: Arc<PersistenceCoordinator>,
        monitor: SyncMonitor,
    }

    fn view(remote: &Arc<MemoryRemote>, local: &Arc<MemoryLocalStore>, quiet_period_ms: u64) -> View {
        let store = Arc::new(EntityStore::new());
        let remote: Arc<dyn RemoteBackend> = remote.clone();
        let local: Arc<dyn LocalStore> = local.clone();
        let coordinator = Arc::new(PersistenceCoordinator::new(
            Arc::clone(&store),
            remote,
            local,
            PersistenceConfig {
                quiet_period_ms,
                ..PersistenceConfig::default()
            },
            ViewId::new(),
        ));
        let monitor = SyncMonitor::new(Arc::clone(&coordinator));
        View {
            store,
            coordinator,
            monitor,
        }
    }

    fn shared() -> (Arc<MemoryRemote>, Arc<MemoryLocalStore>) {
        (Arc::new(MemoryRemote::new()), Arc::new(MemoryLocalStore::new()))
    }

    #[test]
    fn test_own_saves_are_ignored() {
        let (remote, local) = shared();
        let a = view(&remote, &local, 0);
        a.store.mutate(Mutation::Insert(Customer::new("Ana"))).unwrap();
        a.coordinator.save().unwrap();
        assert_eq!(a.monitor.reconcile().unwrap(), SyncDecision::Unchanged);
        assert_eq!(remote.read_count(), 0);
    }

    #[test]
    fn test_foreign_save_reloads_and_notifies() {
        let (remote, local) = shared();
        let a = view(&remote, &local, 0);
        let b = view(&remote, &local, 0);
        let events = b.monitor.subscribe();

        a.store.mutate(Mutation::Insert(Customer::new("Ana"))).unwrap();
        a.coordinator.save().unwrap();

        assert_eq!(b.monitor.reconcile().unwrap(), SyncDecision::Reloaded(LoadSource::Remote));
        assert_eq!(b.store.list::<Customer>().unwrap()[0].name, "Ana");
        let SyncEvent::Refreshed { source, marker } = events.try_recv().unwrap();
        assert_eq!(source, LoadSource::Remote);
        assert_eq!(marker.view, a.coordinator.view());

        // Seen once, not reloaded again.
        assert_eq!(b.monitor.reconcile().unwrap(), SyncDecision::Unchanged);
    }

    #[test]
    fn test_degraded_foreign_save_reloads_from_local() {
        let (remote, local) = shared();
        let a = view(&remote, &local, 0);
        let b = view(&remote, &local, 0);
        remote.set_offline(true);
        a.store.mutate(Mutation::Insert(Customer::new("Offline"))).unwrap();
        a.coordinator.save().unwrap();
        remote.heal();

        assert_eq!(b.monitor.reconcile().unwrap(), SyncDecision::Reloaded(LoadSource::Local));
        assert_eq!(b.store.list::<Customer>().unwrap()[0].name, "Offline");
    }

    #[test]
    fn test_reconcile_defers_during_quiet_period() {
        let (remote, local) = shared();
        let a = view(&remote, &local, 0);
        let b = view(&remote, &local, 60_000);
        b.store.mutate(Mutation::Insert(Customer::new("Local edit"))).unwrap();
        b.coordinator.save().unwrap();

        a.store.mutate(Mutation::Insert(Customer::new("Ana"))).unwrap();
        a.coordinator.save().unwrap();

        assert_eq!(b.monitor.reconcile().unwrap(), SyncDecision::Deferred);
        assert_eq!(b.store.list::<Customer>().unwrap()[0].name, "Local edit");
        assert!(b.monitor.last_seen().is_none());
    }

    /// Blocks the first `fetch_collection` call until released.
    struct GatedFetch {
        inner: Arc<MemoryRemote>,
        armed: AtomicBool,
        entered: Sender<()>,
        release: Receiver<()>,
    }

    impl RemoteBackend for GatedFetch {
        fn fetch_collection(&self, collection: Collection) -> Result<String, StorageError> {
            if self.armed.swap(false, Ordering::SeqCst) {
                let _ = self.entered.send(());
                let _ = self.release.recv();
            }
            self.inner.fetch_collection(collection)
        }

        fn replace_collection(&self, collection: Collection, payload: &str) -> Result<(), StorageError> {
            self.inner.replace_collection(collection, payload)
        }
    }

    #[test]
    fn test_save_during_reload_fetch_defers_reload() {
        let (remote, local) = shared();
        let a = view(&remote, &local, 0);
        a.store.mutate(Mutation::Insert(Customer::new("Ana"))).unwrap();
        a.coordinator.save().unwrap();

        let (entered_tx, entered_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        let gated = Arc::new(GatedFetch {
            inner: Arc::clone(&remote),
            armed: AtomicBool::new(true),
            entered: entered_tx,
            release: release_rx,
        });
        let store = Arc::new(EntityStore::new());
        let coordinator = Arc::new(PersistenceCoordinator::new(
            Arc::clone(&store),
            gated,
            local.clone(),
            PersistenceConfig {
                quiet_period_ms: 60_000,
                ..PersistenceConfig::default()
            },
            ViewId::new(),
        ));
        let monitor = SyncMonitor::new(Arc::clone(&coordinator));
        store.mutate(Mutation::Insert(Customer::new("Local edit"))).unwrap();

        thread::scope(|s| {
            let reconcile = s.spawn(|| monitor.reconcile());
            entered_rx.recv().unwrap();

            // The save lands while the reload is still fetching.
            coordinator.save().unwrap();
            assert!(coordinator.reconciliation_blocked());

            release_tx.send(()).unwrap();
            assert_eq!(reconcile.join().unwrap().unwrap(), SyncDecision::Deferred);
        });

        let names: Vec<String> = store.list::<Customer>().unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Local edit".to_string()]);
        assert!(monitor.last_seen().is_none());
    }

    #[test]
    fn test_mark_current_seen_skips_existing_marker() {
        let (remote, local) = shared();
        let a = view(&remote, &local, 0);
        a.coordinator.save().unwrap();

        let b = view(&remote, &local, 0);
        b.monitor.mark_current_seen();
        assert_eq!(b.monitor.reconcile().unwrap(), SyncDecision::Unchanged);
    }
}
