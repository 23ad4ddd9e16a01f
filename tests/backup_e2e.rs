//! End-to-end backup tests.
//!
//! These tests verify:
//! - Rotation keeps exactly the cap, most recent first
//! - Restoring the pre-restore backup undoes a restore
//! - A malformed backup is rejected without touching the live state
//! - Import is guarded by a pre-import backup

use std::collections::BTreeSet;
use std::sync::Arc;

use ledgerkeep::config::BackupConfig;
use ledgerkeep::storage::{LocalStore, MemoryLocalStore, MemoryRemote};
use ledgerkeep::{BackupKind, Customer, Dataset, Idea, Ledger, LedgerConfig, LedgerError};

fn ledger_with(local: &Arc<MemoryLocalStore>, config: LedgerConfig) -> Ledger {
    Ledger::open(Arc::new(MemoryRemote::new()), local.clone(), config).unwrap()
}

fn ledger(local: &Arc<MemoryLocalStore>) -> Ledger {
    ledger_with(local, LedgerConfig::default())
}

fn dataset(ledger: &Ledger) -> Dataset {
    ledger.store().snapshot().unwrap().dataset
}

fn backup_keys(local: &MemoryLocalStore) -> BTreeSet<String> {
    local
        .keys()
        .unwrap()
        .into_iter()
        .filter(|k| k.starts_with("backup_") && k != "backup_index")
        .collect()
}

#[test]
fn test_rotation_keeps_most_recent_cap() {
    let local = Arc::new(MemoryLocalStore::new());
    let ledger = ledger(&local);
    ledger.insert(Customer::new("Ana")).unwrap();

    let mut created = Vec::new();
    for _ in 0..35 {
        created.push(ledger.create_backup(BackupKind::Manual).unwrap().id);
    }

    let listed: Vec<String> = ledger.list_backups().unwrap().into_iter().map(|m| m.id).collect();
    assert_eq!(listed.len(), 30);
    let expected: Vec<String> = created.iter().rev().take(30).cloned().collect();
    assert_eq!(listed, expected);

    // Evicted backups are gone from the store, not just from the index.
    assert_eq!(backup_keys(&local), expected.into_iter().collect());
}

#[test]
fn test_rotation_honors_configured_cap() {
    let local = Arc::new(MemoryLocalStore::new());
    let config = LedgerConfig {
        backup: BackupConfig {
            cap: 3,
            ..BackupConfig::default()
        },
        ..LedgerConfig::default()
    };
    let ledger = ledger_with(&local, config);
    for _ in 0..5 {
        ledger.create_backup(BackupKind::Auto).unwrap();
    }
    assert_eq!(ledger.list_backups().unwrap().len(), 3);
    assert_eq!(backup_keys(&local).len(), 3);
}

#[test]
fn test_restore_of_pre_restore_backup_undoes_restore() {
    let local = Arc::new(MemoryLocalStore::new());
    let ledger = ledger(&local);
    ledger.insert(Customer::new("Ana")).unwrap();
    let checkpoint = ledger.create_backup(BackupKind::Manual).unwrap();
    let at_checkpoint = dataset(&ledger);

    ledger.insert(Customer::new("Bo")).unwrap();
    ledger.insert(Idea::new("Pop-up shop")).unwrap();
    let before_restore = dataset(&ledger);

    let first = ledger.restore_backup(&checkpoint.id).unwrap();
    assert_eq!(first.restored.id, checkpoint.id);
    assert_eq!(first.safety.kind, BackupKind::PreRestore);
    assert_eq!(dataset(&ledger), at_checkpoint);

    let second = ledger.restore_backup(&first.safety.id).unwrap();
    assert_eq!(dataset(&ledger), before_restore);
    assert_eq!(second.safety.kind, BackupKind::PreRestore);
}

#[test]
fn test_malformed_backup_is_rejected_without_changes() {
    let local = Arc::new(MemoryLocalStore::new());
    let ledger = ledger(&local);
    ledger.insert(Customer::new("Ana")).unwrap();
    let meta = ledger.create_backup(BackupKind::Manual).unwrap();
    local
        .set(&meta.id, r#"{"meta":null,"data":{"inventory":"nope"}}"#)
        .unwrap();

    ledger.insert(Customer::new("Bo")).unwrap();
    let live = dataset(&ledger);

    let err = ledger.restore_backup(&meta.id).unwrap_err();
    assert!(matches!(err, LedgerError::RestoreValidationFailed { .. }));
    assert!(err.is_validation());
    assert_eq!(dataset(&ledger), live);
    assert_eq!(ledger.list_backups().unwrap().len(), 1, "no pre-restore backup taken");
}

#[test]
fn test_unknown_backup_not_found() {
    let local = Arc::new(MemoryLocalStore::new());
    let ledger = ledger(&local);
    assert!(matches!(
        ledger.restore_backup("backup_42").unwrap_err(),
        LedgerError::BackupNotFound { .. }
    ));
    assert!(matches!(
        ledger.delete_backup("backup_42").unwrap_err(),
        LedgerError::BackupNotFound { .. }
    ));
}

#[test]
fn test_delete_and_latest_by_kind() {
    let local = Arc::new(MemoryLocalStore::new());
    let ledger = ledger(&local);
    let auto = ledger.create_backup(BackupKind::Auto).unwrap();
    let manual = ledger.create_backup(BackupKind::Manual).unwrap();

    assert_eq!(ledger.latest_backup(None).unwrap().unwrap().id, manual.id);
    assert_eq!(ledger.latest_backup(Some(BackupKind::Auto)).unwrap().unwrap().id, auto.id);

    ledger.delete_backup(&manual.id).unwrap();
    assert_eq!(ledger.latest_backup(None).unwrap().unwrap().id, auto.id);
    assert!(local.get(&manual.id).unwrap().is_none());
}

#[test]
fn test_import_takes_pre_import_backup() {
    let local = Arc::new(MemoryLocalStore::new());
    let ledger = ledger(&local);
    ledger.insert(Customer::new("Ana")).unwrap();
    let original = dataset(&ledger);

    let source = Ledger::new(
        Arc::new(MemoryRemote::new()),
        Arc::new(MemoryLocalStore::new()),
        LedgerConfig::default(),
    )
    .unwrap();
    source.insert(Customer::new("Imported")).unwrap();
    let report = ledger.import_dataset(&source.export_dataset().unwrap()).unwrap();

    assert_eq!(report.backup.kind, BackupKind::PreImport);
    assert_eq!(ledger.list::<Customer>().unwrap()[0].name, "Imported");

    ledger.restore_backup(&report.backup.id).unwrap();
    assert_eq!(dataset(&ledger), original);
}
