//! Converge Store
//!
//! The storage engine of the Converge Ledger: keyed tables with
//! secondary indices (in-memory by default, redb for durability), the
//! transactional store facade, the versioned snapshot codec and the
//! watch registry. The ledger is derivative and append-only: it never
//! validates payload semantics, resolves conflicts, or coordinates
//! writers.

pub mod durable;
pub mod error;
pub mod memory;
pub mod snapshot;
pub mod store;
pub mod tables;
pub mod watch;

pub use durable::RedbBackend;
pub use error::LedgerError;
pub use memory::MemoryBackend;
pub use snapshot::{Snapshot, SnapshotInfo, SNAPSHOT_VERSION};
pub use store::{GetOptions, LedgerStore, LoadOptions, StoreConfig, DEFAULT_MAX_PAYLOAD_BYTES};
pub use tables::{TableBackend, TableError};
pub use watch::{WatchHandle, WatchRegistry, WATCH_CHANNEL_CAPACITY};
