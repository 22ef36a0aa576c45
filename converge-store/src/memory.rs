//! In-memory table backend
//!
//! Hash maps plus ordered secondary indices behind a single RwLock.
//! Commits take the write lock for their whole scope, which gives
//! atomicity; reads share the read lock and therefore observe a
//! consistent committed snapshot.

use std::collections::{BTreeMap, HashMap};

use converge_model::{Entry, EntryId};
use parking_lot::RwLock;

use crate::tables::{TableBackend, TableError};

#[derive(Default)]
struct Tables {
    /// Primary table: entry id -> entry.
    entries: HashMap<EntryId, Entry>,
    /// Context index: context -> sequence -> ids at that sequence.
    context_index: HashMap<String, BTreeMap<u64, Vec<EntryId>>>,
    /// Key index: (context, key) -> sequence -> ids at that sequence.
    key_index: HashMap<(String, String), BTreeMap<u64, Vec<EntryId>>>,
    sequences: HashMap<String, u64>,
    lamport: HashMap<String, u64>,
}

impl Tables {
    fn insert_entry(&mut self, entry: Entry) {
        let by_context = self
            .context_index
            .entry(entry.context_id.clone())
            .or_default()
            .entry(entry.sequence)
            .or_default();
        if !by_context.contains(&entry.id) {
            by_context.push(entry.id);
        }
        let by_key = self
            .key_index
            .entry((entry.context_id.clone(), entry.key.clone()))
            .or_default()
            .entry(entry.sequence)
            .or_default();
        if !by_key.contains(&entry.id) {
            by_key.push(entry.id);
        }
        self.entries.insert(entry.id, entry);
    }

    fn collect(
        &self,
        index: Option<&BTreeMap<u64, Vec<EntryId>>>,
        after_sequence: u64,
    ) -> Vec<Entry> {
        let Some(index) = index else {
            return Vec::new();
        };
        let Some(start) = after_sequence.checked_add(1) else {
            return Vec::new();
        };
        index
            .range(start..)
            .flat_map(|(_, ids)| ids.iter())
            .filter_map(|id| self.entries.get(id).cloned())
            .collect()
    }
}

/// Default, non-durable table set.
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Tables>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TableBackend for MemoryBackend {
    fn commit_entry(&self, entry: &Entry) -> Result<(), TableError> {
        let mut tables = self.inner.write();
        tables
            .sequences
            .insert(entry.context_id.clone(), entry.sequence);
        tables
            .lamport
            .insert(entry.context_id.clone(), entry.lamport_clock);
        tables.insert_entry(entry.clone());
        Ok(())
    }

    fn commit_import(
        &self,
        context_id: &str,
        entries: &[Entry],
        sequence: u64,
    ) -> Result<u64, TableError> {
        let mut tables = self.inner.write();
        for entry in entries {
            tables.insert_entry(entry.clone());
        }
        let current = tables.sequences.get(context_id).copied().unwrap_or(0);
        let latest = current.max(sequence);
        tables.sequences.insert(context_id.to_string(), latest);
        Ok(latest)
    }

    fn read_context(
        &self,
        context_id: &str,
        key: Option<&str>,
        after_sequence: u64,
    ) -> Result<(Vec<Entry>, u64), TableError> {
        let tables = self.inner.read();
        let index = match key {
            Some(key) => tables
                .key_index
                .get(&(context_id.to_string(), key.to_string())),
            None => tables.context_index.get(context_id),
        };
        let entries = tables.collect(index, after_sequence);
        let latest = tables.sequences.get(context_id).copied().unwrap_or(0);
        Ok((entries, latest))
    }

    fn sequence(&self, context_id: &str) -> Result<u64, TableError> {
        Ok(self
            .inner
            .read()
            .sequences
            .get(context_id)
            .copied()
            .unwrap_or(0))
    }

    fn lamport_time(&self, context_id: &str) -> Result<u64, TableError> {
        Ok(self
            .inner
            .read()
            .lamport
            .get(context_id)
            .copied()
            .unwrap_or(0))
    }

    fn entry(&self, id: &EntryId) -> Result<Option<Entry>, TableError> {
        Ok(self.inner.read().entries.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

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
    fn test_commit_and_read_back() {
        let backend = MemoryBackend::new();
        backend.commit_entry(&entry("ctx", "facts", 1)).unwrap();
        backend.commit_entry(&entry("ctx", "intents", 2)).unwrap();

        let (entries, latest) = backend.read_context("ctx", None, 0).unwrap();
        assert_eq!(latest, 2);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sequence, 1);
        assert_eq!(entries[1].sequence, 2);
    }

    #[test]
    fn test_key_index_scan() {
        let backend = MemoryBackend::new();
        backend.commit_entry(&entry("ctx", "facts", 1)).unwrap();
        backend.commit_entry(&entry("ctx", "intents", 2)).unwrap();
        backend.commit_entry(&entry("ctx", "facts", 3)).unwrap();

        let (entries, latest) = backend.read_context("ctx", Some("facts"), 0).unwrap();
        assert_eq!(latest, 3);
        assert_eq!(
            entries.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![1, 3]
        );
    }

    #[test]
    fn test_after_sequence_bound() {
        let backend = MemoryBackend::new();
        for seq in 1..=5 {
            backend.commit_entry(&entry("ctx", "facts", seq)).unwrap();
        }
        let (entries, _) = backend.read_context("ctx", None, 3).unwrap();
        assert_eq!(
            entries.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![4, 5]
        );
        let (entries, _) = backend.read_context("ctx", None, u64::MAX).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_unknown_context_reads_empty() {
        let backend = MemoryBackend::new();
        let (entries, latest) = backend.read_context("nope", None, 0).unwrap();
        assert!(entries.is_empty());
        assert_eq!(latest, 0);
        assert_eq!(backend.sequence("nope").unwrap(), 0);
        assert_eq!(backend.lamport_time("nope").unwrap(), 0);
    }

    #[test]
    fn test_import_raises_counter_monotonically() {
        let backend = MemoryBackend::new();
        backend.commit_entry(&entry("ctx", "facts", 1)).unwrap();
        let latest = backend.commit_import("ctx", &[], 10).unwrap();
        assert_eq!(latest, 10);
        // A lower import sequence never lowers the counter
        let latest = backend.commit_import("ctx", &[], 4).unwrap();
        assert_eq!(latest, 10);
        // The clock table is untouched by imports
        assert_eq!(backend.lamport_time("ctx").unwrap(), 1);
    }

    #[test]
    fn test_entry_point_lookup() {
        let backend = MemoryBackend::new();
        let e = entry("ctx", "facts", 1);
        backend.commit_entry(&e).unwrap();
        assert_eq!(backend.entry(&e.id).unwrap(), Some(e));
        assert_eq!(backend.entry(&EntryId::generate()).unwrap(), None);
    }
}
