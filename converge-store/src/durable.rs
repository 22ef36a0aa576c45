//! Durable table backend on redb
//!
//! Tables:
//! - entries: entry id (16 bytes) -> protobuf-encoded entry
//! - ctx_index: (len-prefixed context, BE sequence, id) -> id
//! - key_index: (len-prefixed context, len-prefixed key, BE sequence, id) -> id
//! - sequences: context -> u64
//! - lamport: context -> u64
//!
//! Index keys embed the entry id so two entries at the same sequence
//! (a load into a non-empty context) never shadow each other. The
//! big-endian sequence gives ordered range scans.

use std::path::Path;

use converge_model::{Entry, EntryId};
use converge_proto::EntryRecord;
use prost::Message;
use redb::{Database, ReadableTable, TableDefinition};

use crate::tables::{TableBackend, TableError};

const ENTRIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("entries");
const CONTEXT_INDEX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("ctx_index");
const KEY_INDEX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("key_index");
const SEQUENCES: TableDefinition<&[u8], u64> = TableDefinition::new("sequences");
const LAMPORT: TableDefinition<&[u8], u64> = TableDefinition::new("lamport");

const DB_FILE: &str = "ledger.db";

macro_rules! storage_error {
    ($($err:ty),* $(,)?) => {
        $(
            impl From<$err> for TableError {
                fn from(e: $err) -> Self {
                    TableError::Storage(e.to_string())
                }
            }
        )*
    };
}

storage_error!(
    redb::DatabaseError,
    redb::TableError,
    redb::TransactionError,
    redb::CommitError,
    redb::StorageError,
    std::io::Error,
);

/// Persistent table set backed by a single redb database file.
pub struct RedbBackend {
    db: Database,
}

impl RedbBackend {
    /// Open or create the database in the given directory. Each
    /// context's sequence counter is reconciled to
    /// `max(counter, max(sequence in entries))` so an inconsistent
    /// shutdown never leaves the counter behind the data.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, TableError> {
        std::fs::create_dir_all(dir.as_ref())?;
        let db = Database::create(dir.as_ref().join(DB_FILE))?;

        let txn = db.begin_write()?;
        {
            let _ = txn.open_table(ENTRIES)?;
            let _ = txn.open_table(KEY_INDEX)?;
            let _ = txn.open_table(LAMPORT)?;
            let index = txn.open_table(CONTEXT_INDEX)?;
            let mut sequences = txn.open_table(SEQUENCES)?;

            let mut current: Option<(Vec<u8>, u64)> = None;
            for item in index.iter()? {
                let (key, _) = item?;
                let (context, sequence) = split_index_key(key.value())?;
                match &mut current {
                    Some((ctx, max)) if ctx.as_slice() == context => *max = (*max).max(sequence),
                    other => {
                        let finished = other.take();
                        reconcile(&mut sequences, finished)?;
                        *other = Some((context.to_vec(), sequence));
                    }
                }
            }
            reconcile(&mut sequences, current)?;
        }
        txn.commit()?;

        Ok(Self { db })
    }

    fn insert_entry(
        entries: &mut redb::Table<&[u8], &[u8]>,
        ctx_index: &mut redb::Table<&[u8], &[u8]>,
        key_index: &mut redb::Table<&[u8], &[u8]>,
        entry: &Entry,
    ) -> Result<(), TableError> {
        let record: EntryRecord = entry.clone().into();
        let id = entry.id.as_bytes().as_slice();
        entries.insert(id, record.encode_to_vec().as_slice())?;
        ctx_index.insert(context_index_key(entry).as_slice(), id)?;
        key_index.insert(key_index_key(entry).as_slice(), id)?;
        Ok(())
    }

    fn scan(
        &self,
        context_id: &str,
        key: Option<&str>,
        after_sequence: u64,
    ) -> Result<(Vec<Entry>, u64), TableError> {
        let txn = self.db.begin_read()?;
        let entries_table = txn.open_table(ENTRIES)?;
        let sequences = txn.open_table(SEQUENCES)?;

        let prefix = match key {
            Some(key) => framed(context_id.as_bytes())
                .into_iter()
                .chain(framed(key.as_bytes()))
                .collect::<Vec<u8>>(),
            None => framed(context_id.as_bytes()),
        };

        let mut out = Vec::new();
        if let Some(start) = after_sequence.checked_add(1) {
            let mut lower = prefix.clone();
            lower.extend_from_slice(&start.to_be_bytes());
            let mut upper = prefix;
            upper.extend_from_slice(&u64::MAX.to_be_bytes());
            upper.extend_from_slice(&[0xff; 16]);

            let index = match key {
                Some(_) => txn.open_table(KEY_INDEX)?,
                None => txn.open_table(CONTEXT_INDEX)?,
            };
            for item in index.range(lower.as_slice()..=upper.as_slice())? {
                let (_, id) = item?;
                let encoded = entries_table.get(id.value())?.ok_or_else(|| {
                    TableError::Storage("index points at a missing entry".into())
                })?;
                out.push(decode_entry(encoded.value())?);
            }
        }

        let latest = sequences
            .get(context_id.as_bytes())?
            .map(|v| v.value())
            .unwrap_or(0);
        Ok((out, latest))
    }
}

impl TableBackend for RedbBackend {
    fn commit_entry(&self, entry: &Entry) -> Result<(), TableError> {
        let txn = self.db.begin_write()?;
        {
            let mut entries = txn.open_table(ENTRIES)?;
            let mut ctx_index = txn.open_table(CONTEXT_INDEX)?;
            let mut key_index = txn.open_table(KEY_INDEX)?;
            let mut sequences = txn.open_table(SEQUENCES)?;
            let mut lamport = txn.open_table(LAMPORT)?;

            Self::insert_entry(&mut entries, &mut ctx_index, &mut key_index, entry)?;
            sequences.insert(entry.context_id.as_bytes(), entry.sequence)?;
            lamport.insert(entry.context_id.as_bytes(), entry.lamport_clock)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn commit_import(
        &self,
        context_id: &str,
        entries: &[Entry],
        sequence: u64,
    ) -> Result<u64, TableError> {
        let txn = self.db.begin_write()?;
        let latest;
        {
            let mut entries_table = txn.open_table(ENTRIES)?;
            let mut ctx_index = txn.open_table(CONTEXT_INDEX)?;
            let mut key_index = txn.open_table(KEY_INDEX)?;
            let mut sequences = txn.open_table(SEQUENCES)?;

            for entry in entries {
                Self::insert_entry(&mut entries_table, &mut ctx_index, &mut key_index, entry)?;
            }
            let current = sequences
                .get(context_id.as_bytes())?
                .map(|v| v.value())
                .unwrap_or(0);
            latest = current.max(sequence);
            sequences.insert(context_id.as_bytes(), latest)?;
        }
        txn.commit()?;
        Ok(latest)
    }

    fn read_context(
        &self,
        context_id: &str,
        key: Option<&str>,
        after_sequence: u64,
    ) -> Result<(Vec<Entry>, u64), TableError> {
        self.scan(context_id, key, after_sequence)
    }

    fn sequence(&self, context_id: &str) -> Result<u64, TableError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SEQUENCES)?;
        Ok(table
            .get(context_id.as_bytes())?
            .map(|v| v.value())
            .unwrap_or(0))
    }

    fn lamport_time(&self, context_id: &str) -> Result<u64, TableError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(LAMPORT)?;
        Ok(table
            .get(context_id.as_bytes())?
            .map(|v| v.value())
            .unwrap_or(0))
    }

    fn entry(&self, id: &EntryId) -> Result<Option<Entry>, TableError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        match table.get(id.as_bytes().as_slice())? {
            Some(encoded) => Ok(Some(decode_entry(encoded.value())?)),
            None => Ok(None),
        }
    }
}

/// Length-prefix a variable-length field so compound keys stay
/// unambiguous and ordered per context.
fn framed(field: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + field.len());
    out.extend_from_slice(&(field.len() as u32).to_be_bytes());
    out.extend_from_slice(field);
    out
}

fn context_index_key(entry: &Entry) -> Vec<u8> {
    let mut key = framed(entry.context_id.as_bytes());
    key.extend_from_slice(&entry.sequence.to_be_bytes());
    key.extend_from_slice(entry.id.as_bytes());
    key
}

fn key_index_key(entry: &Entry) -> Vec<u8> {
    let mut key = framed(entry.context_id.as_bytes());
    key.extend(framed(entry.key.as_bytes()));
    key.extend_from_slice(&entry.sequence.to_be_bytes());
    key.extend_from_slice(entry.id.as_bytes());
    key
}

/// Split a context-index key back into (context bytes, sequence).
fn split_index_key(key: &[u8]) -> Result<(&[u8], u64), TableError> {
    if key.len() < 4 {
        return Err(TableError::Decode("index key too short".into()));
    }
    let len = u32::from_be_bytes(key[..4].try_into().expect("4-byte slice")) as usize;
    if key.len() < 4 + len + 8 {
        return Err(TableError::Decode("truncated index key".into()));
    }
    let context = &key[4..4 + len];
    let sequence = u64::from_be_bytes(
        key[4 + len..4 + len + 8]
            .try_into()
            .expect("8-byte slice"),
    );
    Ok((context, sequence))
}

fn reconcile(
    sequences: &mut redb::Table<&[u8], u64>,
    observed: Option<(Vec<u8>, u64)>,
) -> Result<(), TableError> {
    let Some((context, max_sequence)) = observed else {
        return Ok(());
    };
    let stored = sequences
        .get(context.as_slice())?
        .map(|v| v.value())
        .unwrap_or(0);
    if stored < max_sequence {
        sequences.insert(context.as_slice(), max_sequence)?;
    }
    Ok(())
}

fn decode_entry(bytes: &[u8]) -> Result<Entry, TableError> {
    let record =
        EntryRecord::decode(bytes).map_err(|e| TableError::Decode(e.to_string()))?;
    record
        .try_into()
        .map_err(|e: converge_proto::RecordError| TableError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::tempdir;

    use super::*;

    fn entry(ctx: &str, key: &str, seq: u64) -> Entry {
        Entry::new(
            ctx.into(),
            key.into(),
            format!("p{seq}").into_bytes(),
            HashMap::new(),
            seq,
            seq,
            seq * 10,
        )
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempdir().unwrap();
        {
            let backend = RedbBackend::open(dir.path()).unwrap();
            backend.commit_entry(&entry("ctx", "facts", 1)).unwrap();
            backend.commit_entry(&entry("ctx", "intents", 2)).unwrap();
        }

        let backend = RedbBackend::open(dir.path()).unwrap();
        let (entries, latest) = backend.read_context("ctx", None, 0).unwrap();
        assert_eq!(latest, 2);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].payload, b"p1");
        assert_eq!(entries[1].payload, b"p2");
        assert_eq!(backend.lamport_time("ctx").unwrap(), 2);
    }

    #[test]
    fn test_key_index_scan() {
        let dir = tempdir().unwrap();
        let backend = RedbBackend::open(dir.path()).unwrap();
        backend.commit_entry(&entry("ctx", "facts", 1)).unwrap();
        backend.commit_entry(&entry("ctx", "intents", 2)).unwrap();
        backend.commit_entry(&entry("ctx", "facts", 3)).unwrap();

        let (entries, _) = backend.read_context("ctx", Some("facts"), 0).unwrap();
        assert_eq!(
            entries.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![1, 3]
        );
        let (entries, _) = backend.read_context("ctx", Some("facts"), 1).unwrap();
        assert_eq!(
            entries.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![3]
        );
    }

    #[test]
    fn test_contexts_do_not_leak_into_each_other() {
        let dir = tempdir().unwrap();
        let backend = RedbBackend::open(dir.path()).unwrap();
        // "a" is a prefix of "ab"; framing must keep the scans apart
        backend.commit_entry(&entry("a", "facts", 1)).unwrap();
        backend.commit_entry(&entry("ab", "facts", 1)).unwrap();

        let (entries, latest) = backend.read_context("a", None, 0).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].context_id, "a");
        assert_eq!(latest, 1);
    }

    #[test]
    fn test_counter_reconciled_on_reopen() {
        let dir = tempdir().unwrap();
        {
            let backend = RedbBackend::open(dir.path()).unwrap();
            // Import rows without raising the counter, simulating an
            // inconsistent shutdown where entries outran the counter.
            let rows = vec![entry("ctx", "facts", 1), entry("ctx", "facts", 3)];
            let latest = backend.commit_import("ctx", &rows, 0).unwrap();
            assert_eq!(latest, 0);
        }

        let backend = RedbBackend::open(dir.path()).unwrap();
        assert_eq!(backend.sequence("ctx").unwrap(), 3);
    }

    #[test]
    fn test_point_lookup() {
        let dir = tempdir().unwrap();
        let backend = RedbBackend::open(dir.path()).unwrap();
        let e = entry("ctx", "facts", 1);
        backend.commit_entry(&e).unwrap();
        assert_eq!(backend.entry(&e.id).unwrap(), Some(e));
        assert_eq!(backend.entry(&EntryId::generate()).unwrap(), None);
    }
}
