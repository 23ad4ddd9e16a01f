//! Persistence Coordinator: dual-backend saves and the load path.
//!
//! Every save validates a snapshot of the Entity Store, writes all six
//! collections to the remote service, and falls back to the shared local
//! store when the remote path fails. Saves never overlap: a save requested
//! while one is in flight is coalesced into it.

mod cleanup;
mod coordinator;
mod marker;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::integrity::IntegrityReport;
use crate::record::Collection;
use crate::store::GenerationVector;

pub use coordinator::PersistenceCoordinator;
pub use marker::{SaveMarker, ViewId};

/// State of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Idle,
    Writing,
    /// The last save did not reach the remote; the next one retries it.
    PendingRetry,
}

/// Where a completed save ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Durability {
    /// All six collections were confirmed by the remote service.
    Remote,
    /// Stored in the local store only; the remote copy may be stale.
    Degraded { reason: String },
}

/// Result of a save that ran.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveReport {
    pub durability: Durability,
    /// Non-fatal findings, including dropped corrupt image payloads.
    pub issues: IntegrityReport,
    /// Generations of the snapshot that was written.
    pub generations: GenerationVector,
    /// Image payloads stripped by the quota cleanup.
    pub stripped_blobs: usize,
    /// True when the local store had to be cleared to make room.
    pub local_reset: bool,
}

impl SaveReport {
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(self.durability, Durability::Degraded { .. })
    }
}

/// Result of [`PersistenceCoordinator::save`].
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Completed(SaveReport),
    /// Another save was already in flight; call `save()` again after it
    /// completes to persist later mutations.
    Coalesced,
}

impl SaveOutcome {
    /// The report of a save that ran.
    #[must_use]
    pub const fn report(&self) -> Option<&SaveReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Coalesced => None,
        }
    }
}

/// Where a load took its data from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadSource {
    Remote,
    Local,
    /// Neither backend held any data.
    Empty,
}

/// Result of [`PersistenceCoordinator::load`].
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub source: LoadSource,
    pub issues: IntegrityReport,
    pub counts: BTreeMap<Collection, usize>,
}
