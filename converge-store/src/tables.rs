//! Narrow table abstraction over the three ledger tables
//!
//! Entries (primary key: entry id, secondary indices on context and
//! key), per-context sequence counters, per-context logical clocks.
//! Every trait method is atomic: a backend either applies the whole
//! write or none of it, and reads observe a consistent committed
//! snapshot.

use converge_model::{Entry, EntryId};
use thiserror::Error;

/// Errors raised by a table backend
#[derive(Error, Debug)]
pub enum TableError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("decode error: {0}")]
    Decode(String),
}

/// The table set behind the store facade.
///
/// The in-memory implementation is the default; the redb-backed one
/// offers durability with the same contract. Callers serialize writers
/// per context (the store facade holds a per-context critical section
/// around counter+clock read-modify-write), so implementations only
/// need atomicity, not their own counter allocation.
pub trait TableBackend: Send + Sync + 'static {
    /// Persist one entry and advance the owning context's sequence
    /// counter and logical clock to the entry's values, atomically.
    fn commit_entry(&self, entry: &Entry) -> Result<(), TableError>;

    /// Persist a batch of imported entries and raise the context's
    /// sequence counter to `max(current, sequence)`, atomically. The
    /// logical clock table is left untouched. Returns the resulting
    /// counter value.
    fn commit_import(
        &self,
        context_id: &str,
        entries: &[Entry],
        sequence: u64,
    ) -> Result<u64, TableError>;

    /// Entries of a context with sequence strictly greater than
    /// `after_sequence`, ordered by ascending sequence, together with
    /// the current counter value, read from one consistent snapshot.
    /// A `key` restricts the scan via the key index.
    fn read_context(
        &self,
        context_id: &str,
        key: Option<&str>,
        after_sequence: u64,
    ) -> Result<(Vec<Entry>, u64), TableError>;

    /// Current sequence counter; 0 for an unknown context.
    fn sequence(&self, context_id: &str) -> Result<u64, TableError>;

    /// Current logical clock value; 0 for an unknown context.
    fn lamport_time(&self, context_id: &str) -> Result<u64, TableError>;

    /// Point lookup by entry id.
    fn entry(&self, id: &EntryId) -> Result<Option<Entry>, TableError>;
}
