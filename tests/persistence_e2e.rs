//! End-to-end persistence tests through the `Ledger` facade.
//!
//! These tests verify:
//! - Save then fresh load reproduces the in-memory collections
//! - Remote failure degrades to the local store and is reported as such
//! - Back-to-back saves collapse into one write cycle
//! - Commission math and the item lifecycle survive persistence

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};

use ledgerkeep::storage::{MemoryLocalStore, MemoryRemote, RemoteBackend, StorageError};
use ledgerkeep::{
    Collection, Customer, Dataset, Durability, GalleryPhoto, Idea, ImageBlob, InventoryItem, Invoice, ItemStatus,
    Ledger, LedgerConfig, LineItem, LoadSource, Money, SaleRecord, SaveOutcome,
};

const PNG: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

fn open(remote: &Arc<MemoryRemote>, local: &Arc<MemoryLocalStore>) -> Ledger {
    Ledger::open(remote.clone(), local.clone(), LedgerConfig::default()).unwrap()
}

fn backends() -> (Arc<MemoryRemote>, Arc<MemoryLocalStore>) {
    (Arc::new(MemoryRemote::new()), Arc::new(MemoryLocalStore::new()))
}

fn populate(ledger: &Ledger) {
    ledger.insert(Customer::new("Ana")).unwrap();
    let item = ledger
        .insert(
            InventoryItem::new_project("Portrait", Money::from_cents(45_000))
                .for_customer("Ana")
                .with_image(ImageBlob::new(PNG)),
        )
        .unwrap();
    ledger
        .insert(InventoryItem::new_stock("Canvas 30x40", 12, Money::from_cents(899)))
        .unwrap();
    ledger
        .insert(
            SaleRecord::new(Money::from_cents(45_000), 15.0)
                .unwrap()
                .for_item(item)
                .for_customer("Ana"),
        )
        .unwrap();
    ledger
        .insert(GalleryPhoto::new("Studio", ImageBlob::new(PNG)))
        .unwrap();
    ledger
        .insert(Invoice::new(
            "Ana",
            vec![LineItem::new("Portrait", 1, Money::from_cents(45_000))],
        ))
        .unwrap();
    ledger.insert(Idea::new("Spring market stall")).unwrap();
}

fn dataset(ledger: &Ledger) -> Dataset {
    ledger.store().snapshot().unwrap().dataset
}

#[test]
fn test_save_then_fresh_load_round_trips() {
    let (remote, local) = backends();
    let writer = open(&remote, &local);
    populate(&writer);

    let outcome = writer.save().unwrap();
    let report = outcome.report().unwrap();
    assert_eq!(report.durability, Durability::Remote);
    assert!(report.issues.is_clean());

    let reader = open(&remote, &local);
    assert_eq!(dataset(&reader), dataset(&writer));
}

#[test]
fn test_corrupt_blob_dropped_only_from_persisted_copy() {
    let (remote, local) = backends();
    let writer = open(&remote, &local);
    let id = writer
        .insert(
            InventoryItem::new_project("Broken scan", Money::from_cents(100))
                .with_image(ImageBlob::new("data:image/png;base64,AAAAAAAAAAAA")),
        )
        .unwrap();

    let outcome = writer.save().unwrap();
    assert_eq!(outcome.report().unwrap().issues.dropped_blobs(), 1);
    assert!(writer.get::<InventoryItem>(id).unwrap().unwrap().image.is_some());

    let reader = open(&remote, &local);
    let loaded = reader.get::<InventoryItem>(id).unwrap().unwrap();
    assert!(loaded.image.is_none());
    assert_eq!(loaded.description, "Broken scan");
}

#[test]
fn test_remote_outage_degrades_to_local() {
    let (remote, local) = backends();
    let writer = open(&remote, &local);
    populate(&writer);
    remote.set_offline(true);

    let outcome = writer.save().unwrap();
    let report = outcome.report().unwrap();
    assert!(report.is_degraded());
    assert!(matches!(report.durability, Durability::Degraded { .. }));
    assert!(remote.payload(Collection::Customers).is_none());

    // The pending flag makes the next view prefer the local copy even once
    // the remote is back.
    remote.heal();
    let reader = Ledger::new(remote.clone(), local.clone(), LedgerConfig::default()).unwrap();
    assert_eq!(reader.load().unwrap().source, LoadSource::Local);
    assert_eq!(dataset(&reader), dataset(&writer));

    // A successful remote save clears it.
    assert!(!reader.save().unwrap().report().unwrap().is_degraded());
    let third = Ledger::new(remote.clone(), local.clone(), LedgerConfig::default()).unwrap();
    assert_eq!(third.load().unwrap().source, LoadSource::Remote);
}

#[test]
fn test_single_collection_failure_degrades_whole_save() {
    let (remote, local) = backends();
    let writer = open(&remote, &local);
    populate(&writer);
    remote.fail_writes_to(Collection::Sales);

    assert!(writer.save().unwrap().report().unwrap().is_degraded());
}

struct GatedRemote {
    inner: MemoryRemote,
    entered: Sender<()>,
    release: Receiver<()>,
}

impl RemoteBackend for GatedRemote {
    fn fetch_collection(&self, collection: Collection) -> Result<String, StorageError> {
        self.inner.fetch_collection(collection)
    }

    fn replace_collection(&self, collection: Collection, payload: &str) -> Result<(), StorageError> {
        if collection == Collection::Inventory {
            let _ = self.entered.send(());
            let _ = self.release.recv();
        }
        self.inner.replace_collection(collection, payload)
    }
}

#[test]
fn test_back_to_back_saves_coalesce() {
    let (entered_tx, entered_rx) = bounded(1);
    let (release_tx, release_rx) = bounded(1);
    let remote = Arc::new(GatedRemote {
        inner: MemoryRemote::new(),
        entered: entered_tx,
        release: release_rx,
    });
    let local = Arc::new(MemoryLocalStore::new());
    let ledger = Ledger::new(remote.clone(), local.clone(), LedgerConfig::default()).unwrap();
    ledger.insert(Customer::new("Ana")).unwrap();

    thread::scope(|s| {
        let first = s.spawn(|| ledger.save());
        entered_rx.recv().unwrap();

        assert_eq!(ledger.save().unwrap(), SaveOutcome::Coalesced);

        release_tx.send(()).unwrap();
        assert!(matches!(first.join().unwrap().unwrap(), SaveOutcome::Completed(_)));
    });

    assert_eq!(remote.inner.write_count(), 6);
    assert_eq!(local.write_count(), 1, "only the last-save marker is written locally");
}

#[test]
fn test_commission_math_survives_reload() {
    let (remote, local) = backends();
    let writer = open(&remote, &local);
    let sale = SaleRecord::new(Money::from_cents(10_000), 20.0).unwrap();
    assert_eq!(sale.net_price, Money::from_cents(8_000));
    assert_eq!(sale.commission_amount(), Money::from_cents(2_000));
    let id = writer.insert(sale).unwrap();
    writer.save().unwrap();

    let reader = open(&remote, &local);
    let loaded = reader.get::<SaleRecord>(id).unwrap().unwrap();
    assert_eq!(loaded.net_price, Money::from_cents(8_000));

    let summary = reader.sales_summary().unwrap();
    assert_eq!(summary.count, 1);
    assert_eq!(summary.gross, Money::from_cents(10_000));
    assert_eq!(summary.commission, Money::from_cents(2_000));
    assert_eq!(summary.net, Money::from_cents(8_000));
}

#[test]
fn test_commission_out_of_range_rejected() {
    assert!(SaleRecord::new(Money::from_cents(10_000), 120.0).is_err());
    assert!(SaleRecord::new(Money::from_cents(10_000), -1.0).is_err());
}

#[test]
fn test_project_lifecycle_passes_through_in_progress() {
    let (remote, local) = backends();
    let ledger = open(&remote, &local);

    // Three mutations: the insert and two advances.
    let id = ledger
        .insert(InventoryItem::new_project("Mural", Money::from_cents(120_000)))
        .unwrap();
    assert_eq!(ledger.get::<InventoryItem>(id).unwrap().unwrap().status, ItemStatus::Pending);
    ledger
        .update::<InventoryItem>(id, |item| {
            item.advance_status();
        })
        .unwrap();
    ledger
        .update::<InventoryItem>(id, |item| {
            item.advance_status();
        })
        .unwrap();

    let item = ledger.get::<InventoryItem>(id).unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Completed);
    let history: Vec<ItemStatus> = item.status_history.iter().map(|c| c.status).collect();
    assert_eq!(
        history,
        vec![ItemStatus::Pending, ItemStatus::InProgress, ItemStatus::Completed]
    );

    ledger.save().unwrap();
    let reader = open(&remote, &local);
    assert_eq!(reader.get::<InventoryItem>(id).unwrap().unwrap().status_history.len(), 3);
}

#[test]
fn test_invoices_are_append_only() {
    let (remote, local) = backends();
    let ledger = open(&remote, &local);
    let id = ledger
        .insert(Invoice::new("Ana", vec![LineItem::new("Frame", 2, Money::from_cents(2_500))]))
        .unwrap();
    assert_eq!(ledger.get::<Invoice>(id).unwrap().unwrap().total, Money::from_cents(5_000));

    let err = ledger
        .update::<Invoice>(id, |invoice| invoice.total = Money::ZERO)
        .unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(ledger.get::<Invoice>(id).unwrap().unwrap().total, Money::from_cents(5_000));
}
