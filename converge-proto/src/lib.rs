//! Generated Protobuf definitions for the Converge Ledger
//!
//! Conversions between the raw wire records and the strongly-typed
//! model structs live here, so every other crate works with validated
//! fixed-size hashes and parsed ids.

use converge_model::{Entry, EntryId, Hash};
use thiserror::Error;

pub mod ledger {
    tonic::include_proto!("converge.ledger");
}

pub use ledger::{
    AppendRequest, AppendResponse, EntryRecord, GetRequest, GetResponse, LoadRequest,
    LoadResponse, SnapshotMeta, SnapshotRecord, SnapshotRequest, SnapshotResponse, WatchRequest,
};

/// Errors converting a wire record into a typed entry
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("invalid entry id: {0:?}")]
    InvalidId(String),

    #[error("invalid content hash length: expected 32 bytes, got {0}")]
    InvalidHashLength(usize),
}

impl From<Entry> for EntryRecord {
    fn from(entry: Entry) -> Self {
        EntryRecord {
            id: entry.id.to_string(),
            context_id: entry.context_id,
            key: entry.key,
            payload: entry.payload,
            sequence: entry.sequence,
            appended_at_ns: entry.appended_at_ns,
            metadata: entry.metadata,
            lamport_clock: entry.lamport_clock,
            // A zero hash marks a legacy record with no integrity fields;
            // keep it empty on the wire.
            content_hash: if entry.content_hash.is_zero() {
                Vec::new()
            } else {
                entry.content_hash.to_vec()
            },
        }
    }
}

impl TryFrom<EntryRecord> for Entry {
    type Error = RecordError;

    fn try_from(record: EntryRecord) -> Result<Self, Self::Error> {
        let id = EntryId::parse(&record.id).map_err(|_| RecordError::InvalidId(record.id))?;

        // Legacy (version-1) records carry no content hash.
        let content_hash = if record.content_hash.is_empty() {
            Hash::ZERO
        } else {
            record
                .content_hash
                .try_into()
                .map_err(|v: Vec<u8>| RecordError::InvalidHashLength(v.len()))?
        };

        Ok(Entry {
            id,
            context_id: record.context_id,
            key: record.key,
            payload: record.payload,
            sequence: record.sequence,
            appended_at_ns: record.appended_at_ns,
            metadata: record.metadata,
            lamport_clock: record.lamport_clock,
            content_hash,
        })
    }
}
