//! The dual-backend write path.
//!
//! ```text
//!            save()                      remote ok
//!   Idle ───────────▶ Writing ─────────────────────────▶ Idle
//!    ▲                   │ remote failed                   (quiet period)
//!    │                   ▼
//!    │            local fallback ── ok ─────────────────▶ PendingRetry
//!    │                   │ quota
//!    │                   ▼
//!    │            cleanup + retry ── ok ────────────────▶ PendingRetry
//!    │                   │ quota
//!    │                   ▼
//!    │            clear local + remote retry ── ok ─────▶ Idle
//!    │                   │ failed
//!    └───────────────────┴── PersistenceFailed ─────────▶ PendingRetry
//! ```
//!
//! A `save()` issued while another is in flight returns
//! [`SaveOutcome::Coalesced`] without touching either backend.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde_json::{Map, Value as Json};
use tracing::{debug, error, info, warn};

use crate::config::PersistenceConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::integrity::{IntegrityReport, IntegrityValidator};
use crate::record::{Collection, Dataset};
use crate::storage::keys::{collection_key, LAST_SAVE, PENDING_REMOTE};
use crate::storage::{LocalStore, RemoteBackend, StorageError};
use crate::store::EntityStore;

use super::cleanup::{discard_stray_keys, strip_oversized};
use super::marker::{SaveMarker, ViewId};
use super::{Durability, LoadReport, LoadSource, Phase, SaveOutcome, SaveReport};

#[derive(Debug)]
struct CoordinatorState {
    phase: Phase,
    quiet_until: Option<Instant>,
    sequence: u64,
}

/// Resets the phase if a save exits without settling (error or panic).
struct WriteGuard<'a> {
    state: &'a Mutex<CoordinatorState>,
    quiet: Duration,
    settled: bool,
}

impl WriteGuard<'_> {
    fn settle(mut self, phase: Phase) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.phase = phase;
        state.quiet_until = Some(Instant::now() + self.quiet);
        self.settled = true;
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.phase = Phase::Idle;
        }
    }
}

/// Serialized form of every collection, ready to be written.
struct Payloads(Vec<(Collection, String)>);

impl Payloads {
    fn encode(dataset: &Dataset) -> LedgerResult<Self> {
        Collection::ALL
            .iter()
            .map(|c| {
                dataset
                    .collection_json(*c)
                    .map(|json| (*c, json))
                    .map_err(|e| LedgerError::Storage(e.into()))
            })
            .collect::<LedgerResult<Vec<_>>>()
            .map(Self)
    }
}

/// Persists the Entity Store to the remote service with a local fallback.
pub struct PersistenceCoordinator {
    store: Arc<EntityStore>,
    remote: Arc<dyn RemoteBackend>,
    local: Arc<dyn LocalStore>,
    validator: IntegrityValidator,
    config: PersistenceConfig,
    view: ViewId,
    state: Mutex<CoordinatorState>,
}

impl std::fmt::Debug for PersistenceCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceCoordinator")
            .field("view", &self.view)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl PersistenceCoordinator {
    #[must_use]
    pub fn new(
        store: Arc<EntityStore>,
        remote: Arc<dyn RemoteBackend>,
        local: Arc<dyn LocalStore>,
        config: PersistenceConfig,
        view: ViewId,
    ) -> Self {
        Self {
            store,
            remote,
            local,
            validator: IntegrityValidator::new(),
            config,
            view,
            state: Mutex::new(CoordinatorState {
                phase: Phase::Idle,
                quiet_until: None,
                sequence: 0,
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current phase of the state machine.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.lock_state().phase
    }

    /// The view this coordinator writes markers for.
    #[must_use]
    pub const fn view(&self) -> ViewId {
        self.view
    }

    /// True while a save is in flight or its quiet period has not elapsed.
    #[must_use]
    pub fn reconciliation_blocked(&self) -> bool {
        Self::blocked(&self.lock_state())
    }

    fn blocked(state: &CoordinatorState) -> bool {
        state.phase == Phase::Writing || state.quiet_until.is_some_and(|t| Instant::now() < t)
    }

    /// Reads the last-save marker from the local store.
    #[must_use]
    pub fn read_marker(&self) -> Option<SaveMarker> {
        match self.local.get(LAST_SAVE) {
            Ok(value) => value.as_deref().and_then(SaveMarker::parse),
            Err(e) => {
                warn!(error = %e, "failed to read last-save marker");
                None
            }
        }
    }

    fn begin(&self) -> Option<(WriteGuard<'_>, u64)> {
        let mut state = self.lock_state();
        if state.phase == Phase::Writing {
            return None;
        }
        state.phase = Phase::Writing;
        state.sequence += 1;
        Some((
            WriteGuard {
                state: &self.state,
                quiet: self.config.quiet_period(),
                settled: false,
            },
            state.sequence,
        ))
    }

    /// Persists the current in-memory state.
    ///
    /// # Errors
    /// - `Validation` if the state is structurally broken (nothing is written)
    /// - `PersistenceFailed` if neither backend accepted the write
    pub fn save(&self) -> LedgerResult<SaveOutcome> {
        let Some((guard, sequence)) = self.begin() else {
            debug!("save coalesced into in-flight write");
            return Ok(SaveOutcome::Coalesced);
        };

        let snapshot = self.store.snapshot()?;
        let generations = snapshot.generations;
        let mut dataset = snapshot.dataset;
        let issues = self.validator.validate(&mut dataset)?;
        if !issues.is_clean() {
            info!(issues = issues.issues.len(), dropped_blobs = issues.dropped_blobs(), "integrity issues found before save");
        }
        let payloads = Payloads::encode(&dataset)?;

        let remote_failure = match self.write_remote(&payloads) {
            Ok(()) => {
                self.after_remote_success(sequence);
                guard.settle(Phase::Idle);
                info!(outcome = "remote", "save complete");
                return Ok(SaveOutcome::Completed(SaveReport {
                    durability: Durability::Remote,
                    issues,
                    generations,
                    stripped_blobs: 0,
                    local_reset: false,
                }));
            }
            Err(reason) => reason,
        };
        warn!(reason = %remote_failure, "remote save failed, falling back to local store");

        match self.write_local_with_cleanup(dataset, payloads, sequence) {
            Ok(stripped_blobs) => {
                guard.settle(Phase::PendingRetry);
                warn!(outcome = "degraded", stripped_blobs, "save stored locally only");
                Ok(SaveOutcome::Completed(SaveReport {
                    durability: Durability::Degraded {
                        reason: remote_failure,
                    },
                    issues,
                    generations,
                    stripped_blobs,
                    local_reset: false,
                }))
            }
            Err(LocalFailure::Quota(payloads)) => {
                self.clear_local_and_retry_remote(guard, &payloads, remote_failure, sequence)
                    .map(|()| {
                        SaveOutcome::Completed(SaveReport {
                            durability: Durability::Remote,
                            issues,
                            generations,
                            stripped_blobs: 0,
                            local_reset: true,
                        })
                    })
            }
            Err(LocalFailure::Other(local)) => {
                guard.settle(Phase::PendingRetry);
                error!(remote = %remote_failure, local = %local, "persistence failed on both backends");
                Err(LedgerError::PersistenceFailed {
                    remote: remote_failure,
                    local: local.to_string(),
                })
            }
        }
    }

    /// Writes all six collections; partial success counts as failure.
    fn write_remote(&self, payloads: &Payloads) -> Result<(), String> {
        let failures: Vec<String> = payloads
            .0
            .iter()
            .filter_map(|(collection, json)| {
                self.remote
                    .replace_collection(*collection, json)
                    .err()
                    .map(|e| {
                        debug!(%collection, error = %e, "remote write failed");
                        format!("{collection}: {e}")
                    })
            })
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.join("; "))
        }
    }

    fn after_remote_success(&self, sequence: u64) {
        self.write_marker(sequence, false);
        if let Err(e) = self.local.remove(PENDING_REMOTE) {
            warn!(key = PENDING_REMOTE, error = %e, "failed to clear pending flag");
        }
    }

    fn write_marker(&self, sequence: u64, degraded: bool) {
        let marker = SaveMarker::new(self.view, sequence, degraded);
        let result = serde_json::to_string(&marker)
            .map_err(StorageError::from)
            .and_then(|text| self.local.set(LAST_SAVE, &text));
        if let Err(e) = result {
            warn!(key = LAST_SAVE, error = %e, "failed to write last-save marker");
        }
    }

    fn write_local(&self, payloads: &Payloads, sequence: u64) -> Result<(), StorageError> {
        for (collection, json) in &payloads.0 {
            self.local.set(&collection_key(*collection), json)?;
        }
        self.local.set(PENDING_REMOTE, "1")?;
        let marker = SaveMarker::new(self.view, sequence, true);
        self.local.set(LAST_SAVE, &serde_json::to_string(&marker)?)
    }

    fn write_local_with_cleanup(
        &self,
        mut dataset: Dataset,
        payloads: Payloads,
        sequence: u64,
    ) -> Result<usize, LocalFailure> {
        match self.write_local(&payloads, sequence) {
            Ok(()) => return Ok(0),
            Err(e) if !e.is_quota() => return Err(LocalFailure::Other(e)),
            Err(e) => warn!(error = %e, "local store over quota, running cleanup"),
        }

        let stripped = strip_oversized(
            &mut dataset,
            self.config.strip_threshold_bytes,
            self.config.keep_recent,
        );
        if let Err(e) = discard_stray_keys(self.local.as_ref()) {
            warn!(error = %e, "stray key cleanup failed");
        }
        let payloads = if stripped > 0 {
            Payloads::encode(&dataset).map_err(|e| LocalFailure::Other(StorageError::Serialization(e.to_string())))?
        } else {
            payloads
        };

        match self.write_local(&payloads, sequence) {
            Ok(()) => Ok(stripped),
            Err(e) if e.is_quota() => Err(LocalFailure::Quota(payloads)),
            Err(e) => Err(LocalFailure::Other(e)),
        }
    }

    fn clear_local_and_retry_remote(
        &self,
        guard: WriteGuard<'_>,
        payloads: &Payloads,
        first_failure: String,
        sequence: u64,
    ) -> LedgerResult<()> {
        warn!("local store still over quota after cleanup, clearing it");
        let cleared = self.local.clear();
        match (cleared, self.write_remote(payloads)) {
            (Ok(()), Ok(())) => {
                self.after_remote_success(sequence);
                guard.settle(Phase::Idle);
                info!(outcome = "remote-after-reset", "save complete");
                Ok(())
            }
            (Err(e), _) => {
                guard.settle(Phase::PendingRetry);
                error!(remote = %first_failure, local = %e, "persistence failed on both backends");
                Err(LedgerError::PersistenceFailed {
                    remote: first_failure,
                    local: e.to_string(),
                })
            }
            (Ok(()), Err(remote)) => {
                guard.settle(Phase::PendingRetry);
                error!(remote = %remote, "persistence failed on both backends");
                Err(LedgerError::PersistenceFailed {
                    remote,
                    local: "quota exceeded after cleanup; local store cleared".to_string(),
                })
            }
        }
    }

    /// Loads the durable state into the Entity Store.
    ///
    /// The remote copy is preferred unless a degraded save is still pending
    /// there; any remote failure falls back to the local store.
    ///
    /// # Errors
    /// Returns `Validation` if the local copy is structurally broken, or a
    /// storage error if the local store cannot be read.
    pub fn load(&self) -> LedgerResult<LoadReport> {
        let durable = self.fetch_durable()?;
        self.adopt(durable)
    }

    /// Reloads the durable state unless a local save is in flight or quiet.
    ///
    /// The fetch runs without holding the state lock. The phase and the
    /// quiet period are checked again under the lock, and the Entity Store is
    /// replaced before the lock is released, so no save can start in between.
    /// Returns `None` when reconciliation has to wait.
    ///
    /// # Errors
    /// Same as [`load`](Self::load).
    pub fn reload_if_clear(&self) -> LedgerResult<Option<LoadReport>> {
        if self.reconciliation_blocked() {
            return Ok(None);
        }
        let durable = self.fetch_durable()?;

        let state = self.lock_state();
        if Self::blocked(&state) {
            debug!("local save started during reload fetch, discarding fetched state");
            return Ok(None);
        }
        let report = self.adopt(durable)?;
        drop(state);
        Ok(Some(report))
    }

    fn fetch_durable(&self) -> LedgerResult<Durable> {
        let pending = match self.local.get(PENDING_REMOTE) {
            Ok(flag) => flag.is_some(),
            Err(e) => {
                warn!(key = PENDING_REMOTE, error = %e, "cannot read pending flag");
                false
            }
        };

        let remote = if pending {
            info!("degraded save pending, loading local copy");
            None
        } else {
            match self.fetch_remote() {
                Ok(loaded) => Some(loaded),
                Err(e) => {
                    warn!(error = %e, "remote load failed, falling back to local store");
                    None
                }
            }
        };

        let (source, (dataset, issues)) = match remote {
            Some(loaded) => (LoadSource::Remote, loaded),
            None => match self.read_local()? {
                Some(loaded) => (LoadSource::Local, loaded),
                None => (LoadSource::Empty, (Dataset::new(), IntegrityReport::default())),
            },
        };
        Ok(Durable { source, dataset, issues })
    }

    fn adopt(&self, durable: Durable) -> LedgerResult<LoadReport> {
        let Durable { source, dataset, issues } = durable;
        let counts = dataset.counts();
        self.store.replace_dataset(dataset)?;
        info!(source = ?source, "dataset loaded");
        Ok(LoadReport { source, issues, counts })
    }

    fn fetch_remote(&self) -> LedgerResult<(Dataset, IntegrityReport)> {
        let mut dataset = Dataset::new();
        for collection in Collection::ALL {
            let text = self
                .remote
                .fetch_collection(collection)
                .map_err(|e| LedgerError::RemoteUnavailable {
                    collection,
                    reason: e.to_string(),
                })?;
            let value: Json = serde_json::from_str(&text).map_err(|e| LedgerError::Storage(e.into()))?;
            self.validator.decode_collection(collection, &value, &mut dataset)?;
        }
        let issues = self.validator.validate(&mut dataset)?;
        Ok((dataset, issues))
    }

    fn read_local(&self) -> LedgerResult<Option<(Dataset, IntegrityReport)>> {
        let mut payload = Map::new();
        let mut found = false;
        for collection in Collection::ALL {
            let value = match self.local.get(&collection_key(collection))? {
                Some(text) => {
                    found = true;
                    serde_json::from_str(&text).map_err(|e| LedgerError::Storage(e.into()))?
                }
                None => Json::Array(Vec::new()),
            };
            payload.insert(collection.as_str().to_string(), value);
        }
        if !found {
            return Ok(None);
        }
        let loaded = self.validator.validate_raw(&Json::Object(payload))?;
        Ok(Some(loaded))
    }
}

/// A dataset read from a backend, not yet applied to the Entity Store.
struct Durable {
    source: LoadSource,
    dataset: Dataset,
    issues: IntegrityReport,
}

enum LocalFailure {
    /// Still over quota after cleanup; carries the payloads for the remote retry.
    Quota(Payloads),
    Other(StorageError),
}
