//! Versioned snapshot codec
//!
//! Blob layout: 4-byte magic, little-endian u32 format version, then a
//! zstd-compressed protobuf `SnapshotRecord`. The version is the first
//! field decoded and unknown versions fail closed before the body is
//! touched. Decoding never executes anything from the blob; prost
//! validates shape and types.
//!
//! Version 1 is the legacy format: entries carry no lamport clock or
//! content hash and the record has no Merkle root, so no integrity
//! check is possible. Version 2 (current) adds both.

use converge_model::{hasher, merkle, Entry, Hash};
use converge_proto::{EntryRecord, SnapshotRecord};
use prost::Message;

use crate::error::LedgerError;

pub const SNAPSHOT_MAGIC: [u8; 4] = *b"CLGR";
pub const SNAPSHOT_VERSION: u32 = 2;

const HEADER_LEN: usize = 8;
const COMPRESSION_LEVEL: i32 = 3;

/// An encoded snapshot plus the metadata surfaced to the caller.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub blob: Vec<u8>,
    pub sequence: u64,
    pub info: SnapshotInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub created_at_ns: u64,
    pub entry_count: u64,
    pub version: u32,
    /// Hex-encoded Merkle root over the snapshot's entry hashes.
    pub merkle_root: String,
}

/// A decoded, shape-validated snapshot body.
#[derive(Debug, Clone)]
pub struct DecodedSnapshot {
    pub version: u32,
    pub context_id: String,
    pub entries: Vec<Entry>,
    pub sequence: u64,
    /// Absent for legacy version-1 blobs.
    pub merkle_root: Option<Hash>,
}

/// Serialize and compress a context's entries into a snapshot blob.
pub fn encode(
    context_id: &str,
    entries: &[Entry],
    sequence: u64,
    created_at_ns: u64,
) -> Result<Snapshot, LedgerError> {
    let root = merkle::compute_root(&leaves(entries));
    let record = SnapshotRecord {
        version: SNAPSHOT_VERSION,
        context_id: context_id.to_string(),
        entries: entries.iter().cloned().map(EntryRecord::from).collect(),
        sequence,
        merkle_root: root.to_vec(),
    };

    let body = record.encode_to_vec();
    let compressed = zstd::encode_all(body.as_slice(), COMPRESSION_LEVEL)
        .map_err(|e| LedgerError::SnapshotFailed(format!("compression: {e}")))?;

    let mut blob = Vec::with_capacity(HEADER_LEN + compressed.len());
    blob.extend_from_slice(&SNAPSHOT_MAGIC);
    blob.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    blob.extend_from_slice(&compressed);

    Ok(Snapshot {
        blob,
        sequence,
        info: SnapshotInfo {
            created_at_ns,
            entry_count: entries.len() as u64,
            version: SNAPSHOT_VERSION,
            merkle_root: root.to_string(),
        },
    })
}

/// Decode and shape-validate a snapshot blob.
pub fn decode(blob: &[u8]) -> Result<DecodedSnapshot, LedgerError> {
    if blob.len() < HEADER_LEN {
        return Err(LedgerError::InvalidSnapshotFormat(
            "truncated header".into(),
        ));
    }
    if blob[..4] != SNAPSHOT_MAGIC {
        return Err(LedgerError::InvalidSnapshotFormat("bad magic".into()));
    }
    let version = u32::from_le_bytes(blob[4..8].try_into().expect("4-byte slice"));
    if version == 0 {
        return Err(LedgerError::InvalidSnapshotFormat("version 0".into()));
    }
    if version > SNAPSHOT_VERSION {
        return Err(LedgerError::UnsupportedSnapshotVersion {
            version,
            supported: SNAPSHOT_VERSION,
        });
    }

    let body = zstd::decode_all(&blob[HEADER_LEN..])
        .map_err(|e| LedgerError::InvalidSnapshotFormat(format!("decompression: {e}")))?;
    let record = SnapshotRecord::decode(body.as_slice())
        .map_err(|e| LedgerError::InvalidSnapshotFormat(e.to_string()))?;
    if record.version != version {
        return Err(LedgerError::InvalidSnapshotFormat(format!(
            "header version {version} does not match body version {}",
            record.version
        )));
    }

    let merkle_root = if record.merkle_root.is_empty() {
        if version >= 2 {
            return Err(LedgerError::InvalidSnapshotFormat(
                "missing merkle root".into(),
            ));
        }
        None
    } else {
        Some(
            Hash::try_from(record.merkle_root)
                .map_err(|v| LedgerError::InvalidSnapshotFormat(format!(
                    "merkle root of {} bytes",
                    v.len()
                )))?,
        )
    };

    let mut entries = Vec::with_capacity(record.entries.len());
    for entry in record.entries {
        entries.push(
            Entry::try_from(entry)
                .map_err(|e| LedgerError::InvalidSnapshotFormat(e.to_string()))?,
        );
    }

    Ok(DecodedSnapshot {
        version,
        context_id: record.context_id,
        entries,
        sequence: record.sequence,
        merkle_root,
    })
}

/// Verify a decoded snapshot's Merkle root against a recomputation
/// from the entries' semantic fields. Legacy blobs carry no root and
/// pass vacuously.
pub fn verify_root(decoded: &DecodedSnapshot) -> Result<(), LedgerError> {
    let Some(expected) = decoded.merkle_root else {
        return Ok(());
    };
    let computed = merkle::compute_root(&leaves(&decoded.entries));
    if computed != expected {
        return Err(LedgerError::IntegrityVerificationFailed { expected, computed });
    }
    Ok(())
}

/// Leaf hashes are recomputed from entry fields rather than read from
/// `content_hash`, so a payload mutation is caught even if the stored
/// hash was patched up alongside it at rest.
fn leaves(entries: &[Entry]) -> Vec<Hash> {
    entries.iter().map(hasher::hash_entry).collect()
}
