//! Storage backends for ledgerkeep.
//!
//! The traits define the remote service and the shared local key-value
//! store; the in-memory implementations are always available, the
//! file-backed store and the HTTP client are behind features.

pub mod keys;
mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

#[cfg(feature = "remote-http")]
mod http;

pub use memory::{MemoryLocalStore, MemoryRemote, NullRemote};
pub use traits::{LocalStore, RemoteBackend, StorageError, StoreEvent};

#[cfg(feature = "persistent")]
pub use persistent::{FileLocalStore, FileStoreConfig};

#[cfg(feature = "remote-http")]
pub use http::HttpRemote;
