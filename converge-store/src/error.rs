//! Error kinds surfaced by the store facade

use std::time::Duration;

use converge_model::Hash;
use thiserror::Error;

/// Errors that can occur during ledger operations.
///
/// Input and precondition failures never mutate state; the transient
/// kinds wrap the underlying transaction reason and may be retried by
/// the caller. The ledger never retries internally.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("payload of {size} bytes exceeds limit of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("context id must be a non-empty string")]
    InvalidContextId,

    #[error("invalid snapshot format: {0}")]
    InvalidSnapshotFormat(String),

    #[error("unsupported snapshot version {version} (highest supported: {supported})")]
    UnsupportedSnapshotVersion { version: u32, supported: u32 },

    #[error("context {0:?} already has entries")]
    ContextAlreadyExists(String),

    #[error("integrity verification failed: snapshot root {expected}, computed {computed}")]
    IntegrityVerificationFailed { expected: Hash, computed: Hash },

    #[error("content hash mismatch for entry {entry_id}: stored {stored}, computed {computed}")]
    HashMismatch {
        entry_id: String,
        stored: Hash,
        computed: Hash,
    },

    #[error("transaction lock not acquired within {0:?}")]
    LockTimeout(Duration),

    #[error("append failed: {0}")]
    AppendFailed(String),

    #[error("get failed: {0}")]
    GetFailed(String),

    #[error("snapshot failed: {0}")]
    SnapshotFailed(String),

    #[error("load failed: {0}")]
    LoadFailed(String),

    #[error("sequence read failed: {0}")]
    SequenceFailed(String),

    #[error("lamport time read failed: {0}")]
    LamportTimeFailed(String),
}
