use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::storage::keys::{classify, KeyClass};
use crate::storage::StoreEvent;

use super::{SyncDecision, SyncMonitor};

/// Keys whose change may mean another view saved.
fn is_sync_relevant(key: &str) -> bool {
    matches!(
        classify(key),
        KeyClass::LastSave | KeyClass::Collection(_) | KeyClass::PendingRemote
    )
}

fn spawn(name: &str, body: impl FnOnce() + Send + 'static) -> LedgerResult<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("ledgerkeep-sync-{name}"))
        .spawn(body)
        .map_err(|e| LedgerError::internal(format!("failed to spawn sync {name} thread: {e}")))
}

/// The Sync Monitor's background threads.
///
/// - poll: requests a reconciliation every poll interval
/// - notify: requests one whenever the shared store reports a relevant change
/// - reconciler: runs requests, retrying deferred ones after a short delay
///
/// Requests are coalesced: at most one is queued at a time.
#[derive(Debug)]
pub struct SyncTasks {
    shutdown: Option<Sender<()>>,
    handles: Vec<JoinHandle<()>>,
}

impl SyncTasks {
    /// Starts the threads. The notification thread only runs when `events`
    /// is available.
    ///
    /// # Errors
    /// Returns `Internal` if a thread cannot be spawned; threads already
    /// started are stopped.
    pub fn start(
        monitor: Arc<SyncMonitor>,
        events: Option<Receiver<StoreEvent>>,
        config: &SyncConfig,
    ) -> LedgerResult<Self> {
        // Never sent on; dropping the sender disconnects every receiver.
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let (request_tx, request_rx) = bounded::<()>(1);
        let mut tasks = Self {
            shutdown: Some(shutdown_tx),
            handles: Vec::with_capacity(3),
        };

        let poll_interval = config.poll_interval();
        let defer_retry = config.defer_retry();

        {
            let shutdown = shutdown_rx.clone();
            let requests = request_tx.clone();
            tasks.handles.push(spawn("poll", move || poll_loop(&shutdown, &requests, poll_interval))?);
        }

        if let Some(events) = events {
            let shutdown = shutdown_rx.clone();
            let requests = request_tx.clone();
            tasks.handles.push(spawn("notify", move || notify_loop(&shutdown, &events, &requests))?);
        }

        drop(request_tx);
        tasks.handles.push(spawn("reconcile", move || {
            reconcile_loop(&monitor, &shutdown_rx, &request_rx, defer_retry);
        })?);

        Ok(tasks)
    }

    /// Signals all threads and waits for them to exit.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        drop(self.shutdown.take());
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for SyncTasks {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

fn poll_loop(shutdown: &Receiver<()>, requests: &Sender<()>, interval: Duration) {
    loop {
        match shutdown.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                let _ = requests.try_send(());
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn notify_loop(shutdown: &Receiver<()>, events: &Receiver<StoreEvent>, requests: &Sender<()>) {
    loop {
        select! {
            recv(shutdown) -> _ => break,
            recv(events) -> event => match event {
                Ok(event) if is_sync_relevant(&event.key) => {
                    let _ = requests.try_send(());
                }
                Ok(_) => {}
                Err(_) => break,
            },
        }
    }
}

fn reconcile_loop(
    monitor: &SyncMonitor,
    shutdown: &Receiver<()>,
    requests: &Receiver<()>,
    defer_retry: Duration,
) {
    loop {
        select! {
            recv(shutdown) -> _ => return,
            recv(requests) -> request => {
                if request.is_err() {
                    return;
                }
            },
        }

        loop {
            match monitor.reconcile() {
                Ok(SyncDecision::Deferred) => match shutdown.recv_timeout(defer_retry) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                },
                Ok(decision) => debug!(?decision, "reconciliation finished"),
                Err(e) => warn!(error = %e, "reconciliation failed"),
            }
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relevant_keys() {
        assert!(is_sync_relevant("last_save"));
        assert!(is_sync_relevant("data_invoices"));
        assert!(!is_sync_relevant("backup_1700000000000"));
        assert!(!is_sync_relevant("search_recent"));
    }
}
