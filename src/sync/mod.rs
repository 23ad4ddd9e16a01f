//! Sync Monitor: picks up saves made by other views of the same data.
//!
//! Two best-effort detection channels feed one reconciliation function:
//! change notifications from the shared local store (when it offers them)
//! and periodic polling of the last-save marker. Reconciliation never runs
//! while the local coordinator is writing or inside its quiet period; it is
//! deferred and retried shortly after.

mod monitor;
mod tasks;

use crate::persistence::{LoadSource, SaveMarker};

pub use monitor::SyncMonitor;
pub use tasks::SyncTasks;

/// Outcome of one reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncDecision {
    /// No foreign save since the last one seen.
    Unchanged,
    /// A foreign save was seen but a local write is in flight or just finished.
    Deferred,
    /// The durable state was reloaded into the Entity Store.
    Reloaded(LoadSource),
}

/// Delivered to subscribers after a reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Refreshed {
        source: LoadSource,
        marker: SaveMarker,
    },
}
