//! # ledgerkeep - persistence, caching and sync for a small-business ledger
//!
//! ledgerkeep keeps six collections (inventory, customers, sales, gallery,
//! invoices, ideas) in memory and makes them durable against a remote
//! service, with a local key-value store as the fallback when the remote is
//! unreachable. Several views of the same data stay consistent through a
//! last-save marker in the shared local store.
//!
//! ## Components
//!
//! - **Entity Store**: the in-memory collections and their generation counters
//! - **Integrity Validator**: structural checks and blob sanitization
//! - **Read Cache**: query results memoized against generation vectors
//! - **Persistence Coordinator**: remote-first saves, local fallback, quota cleanup
//! - **Backup Manager**: rotating full snapshots in the local store
//! - **Sync Monitor**: reloads after saves made by other views
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ledgerkeep::{InventoryItem, Ledger, LedgerConfig, Money};
//! use ledgerkeep::storage::{MemoryLocalStore, MemoryRemote};
//!
//! let ledger = Ledger::open(
//!     Arc::new(MemoryRemote::new()),
//!     Arc::new(MemoryLocalStore::new()),
//!     LedgerConfig::default(),
//! )?;
//! ledger.insert(InventoryItem::new_project("Wedding portrait", Money::from_cents(45_000)))?;
//! let outcome = ledger.save()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Records
pub mod customer;
pub mod gallery;
pub mod idea;
pub mod inventory;
pub mod invoice;
pub mod record;
pub mod sale;

// Core
pub mod cache;
pub mod config;
pub mod error;
pub mod integrity;
pub mod query;
pub mod store;

// Durability and sync
pub mod backup;
pub mod persistence;
pub mod storage;
pub mod sync;

pub mod engine;

pub use customer::Customer;
pub use gallery::GalleryPhoto;
pub use idea::{Idea, IdeaStatus, Priority};
pub use inventory::{InventoryItem, ItemKind, ItemStatus, StatusChange};
pub use invoice::{Invoice, LineItem};
pub use record::{Collection, Dataset, ImageBlob, Money, Record, RecordId};
pub use sale::SaleRecord;

pub use cache::{CacheStats, ReadCache};
pub use config::LedgerConfig;
pub use error::{LedgerError, LedgerResult, StoreError, ValidationError};
pub use integrity::{IntegrityIssue, IntegrityReport, IntegrityValidator, IssueKind};
pub use query::{Filter, QueryKey, SalesSummary};
pub use store::{EntityStore, GenerationVector, Mutation, Prior, Snapshot};

pub use backup::{BackupKind, BackupManager, BackupMeta, RestoreReport};
pub use persistence::{
    Durability, LoadReport, LoadSource, PersistenceCoordinator, Phase, SaveMarker, SaveOutcome, SaveReport,
    ViewId,
};
pub use storage::{LocalStore, RemoteBackend, StorageError};
pub use sync::{SyncDecision, SyncEvent, SyncMonitor};

pub use engine::{ImportReport, Ledger};
