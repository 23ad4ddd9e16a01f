use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::{debug, error};

use crate::error::{LedgerError, LedgerResult};

use super::BackupManager;

/// Background thread that takes `auto` backups when they are due.
///
/// Stopping is explicit; dropping the scheduler also stops and joins it.
#[derive(Debug)]
pub struct BackupScheduler {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl BackupScheduler {
    /// Starts the scheduler. It checks immediately and then every `check_every`.
    ///
    /// # Errors
    /// Returns `Internal` if the thread cannot be spawned.
    pub fn start(manager: Arc<BackupManager>, check_every: Duration) -> LedgerResult<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("ledgerkeep-backup".to_string())
            .spawn(move || loop {
                match manager.run_due_auto_backup() {
                    Ok(Some(meta)) => debug!(backup_id = %meta.id, "scheduled backup taken"),
                    Ok(None) => {}
                    Err(e) => error!(error = %e, "scheduled backup failed"),
                }
                match shutdown_rx.recv_timeout(check_every) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| LedgerError::internal(format!("failed to spawn backup scheduler: {e}")))?;

        Ok(Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Signals the thread and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BackupScheduler {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}
