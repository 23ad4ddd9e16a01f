//! Local-only operation over the file-backed store.
//!
//! These tests verify:
//! - Degraded saves survive a reopen of the data directory
//! - Backups persist across reopen
//! - A damaged data file fails the load instead of yielding partial data
//! - A save through one handle wakes the sync threads of another

#![cfg(feature = "persistent")]

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;

use ledgerkeep::config::{PersistenceConfig, SyncConfig};
use ledgerkeep::storage::persistent::open_local_store;
use ledgerkeep::storage::NullRemote;
use ledgerkeep::{
    BackupKind, Customer, InventoryItem, Ledger, LedgerConfig, LedgerError, LoadSource, Money, StorageError, SyncEvent,
};

fn open(path: &std::path::Path) -> Ledger {
    let local = Arc::new(open_local_store(path, None).unwrap());
    Ledger::new(Arc::new(NullRemote), local, LedgerConfig::default()).unwrap()
}

#[test]
fn test_local_only_save_survives_reopen() {
    let dir = tempdir().unwrap();
    {
        let ledger = open(dir.path());
        assert_eq!(ledger.load().unwrap().source, LoadSource::Empty);
        ledger.insert(Customer::new("Ana")).unwrap();
        ledger
            .insert(InventoryItem::new_stock("Linen thread", 40, Money::from_cents(350)))
            .unwrap();
        assert!(ledger.save().unwrap().report().unwrap().is_degraded());
    }

    let ledger = open(dir.path());
    let report = ledger.load().unwrap();
    assert_eq!(report.source, LoadSource::Local);
    assert_eq!(ledger.list::<Customer>().unwrap()[0].name, "Ana");
    assert_eq!(ledger.list::<InventoryItem>().unwrap()[0].quantity, 40);
}

#[test]
fn test_backups_persist_across_reopen() {
    let dir = tempdir().unwrap();
    let id = {
        let ledger = open(dir.path());
        ledger.insert(Customer::new("Ana")).unwrap();
        ledger.create_backup(BackupKind::Manual).unwrap().id
    };

    let ledger = open(dir.path());
    ledger.load().unwrap();
    let backups = ledger.list_backups().unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].id, id);

    ledger.restore_backup(&id).unwrap();
    assert_eq!(ledger.list::<Customer>().unwrap()[0].name, "Ana");
}

#[test]
fn test_damaged_data_file_fails_load() {
    let dir = tempdir().unwrap();
    {
        let ledger = open(dir.path());
        ledger.insert(Customer::new("Ana")).unwrap();
        ledger.save().unwrap();
    }

    let path = dir.path().join("data_customers.kv");
    let mut bytes = fs::read(&path).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x55;
    fs::write(&path, bytes).unwrap();

    let ledger = open(dir.path());
    let err = ledger.load().unwrap_err();
    assert!(matches!(err, LedgerError::Storage(StorageError::Corrupted { .. })));
    assert!(ledger.list::<Customer>().unwrap().is_empty());
}

#[test]
fn test_save_through_one_handle_wakes_another() {
    let dir = tempdir().unwrap();
    let config = LedgerConfig {
        persistence: PersistenceConfig {
            quiet_period_ms: 0,
            ..PersistenceConfig::default()
        },
        sync: SyncConfig {
            poll_interval_ms: 60_000,
            defer_retry_ms: 10,
        },
        ..LedgerConfig::default()
    };
    let open_view = || {
        let local = Arc::new(open_local_store(dir.path(), None).unwrap());
        Ledger::open(Arc::new(NullRemote), local, config.clone()).unwrap()
    };
    let a = open_view();
    let b = open_view();
    let events = b.subscribe();
    b.start_background().unwrap();

    a.insert(Customer::new("Ana")).unwrap();
    assert!(a.save().unwrap().report().unwrap().is_degraded());

    let SyncEvent::Refreshed { source, marker } = events.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(source, LoadSource::Local);
    assert_eq!(marker.view, a.view_id());
    assert_eq!(b.list::<Customer>().unwrap()[0].name, "Ana");

    b.stop_background();
}
