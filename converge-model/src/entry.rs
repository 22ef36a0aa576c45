//! Ledger entries with strong typing

use std::collections::HashMap;

use crate::hasher;
use crate::types::{EntryId, Hash};

/// An immutable record representing one append to one context.
///
/// The content hash covers `{context_id, key, payload, sequence,
/// appended_at_ns}`; `id`, `metadata` and `lamport_clock` are excluded
/// (random, auxiliary, and non-semantic respectively).
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub id: EntryId,
    pub context_id: String,
    /// Categorical tag ("facts", "intents", ...); never interpreted.
    pub key: String,
    /// Opaque payload bytes; never interpreted.
    pub payload: Vec<u8>,
    /// Per-context position, starting at 1, no gaps.
    pub sequence: u64,
    /// Wall-clock capture at creation; informational only.
    pub appended_at_ns: u64,
    pub metadata: HashMap<String, String>,
    pub lamport_clock: u64,
    pub content_hash: Hash,
}

impl Entry {
    /// Assemble a new entry with a fresh random id and a computed
    /// content hash.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context_id: String,
        key: String,
        payload: Vec<u8>,
        metadata: HashMap<String, String>,
        sequence: u64,
        lamport_clock: u64,
        appended_at_ns: u64,
    ) -> Self {
        let mut entry = Self {
            id: EntryId::generate(),
            context_id,
            key,
            payload,
            sequence,
            appended_at_ns,
            metadata,
            lamport_clock,
            content_hash: Hash::ZERO,
        };
        entry.content_hash = hasher::hash_entry(&entry);
        entry
    }

    /// Recompute the canonical hash and compare against the stored one.
    pub fn verify_hash(&self) -> bool {
        hasher::hash_entry(self) == self.content_hash
    }

    /// Move this entry to a different context: fresh id (ids stay
    /// globally unique) and a recomputed content hash (the hash covers
    /// the context id). Used when loading a snapshot cross-context.
    /// A zero hash marks a legacy record that never had one; it stays
    /// zero rather than being back-filled.
    pub fn rebind_context(&mut self, context_id: &str) {
        self.context_id = context_id.to_string();
        self.id = EntryId::generate();
        if !self.content_hash.is_zero() {
            self.content_hash = hasher::hash_entry(self);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Entry {
        Entry::new(
            "ctx".into(),
            "facts".into(),
            b"p1".to_vec(),
            HashMap::new(),
            1,
            1,
            1_000,
        )
    }

    #[test]
    fn test_new_entry_hash_verifies() {
        let entry = sample();
        assert!(!entry.content_hash.is_zero());
        assert!(entry.verify_hash());
    }

    #[test]
    fn test_mutated_payload_fails_verification() {
        let mut entry = sample();
        entry.payload = b"p2".to_vec();
        assert!(!entry.verify_hash());
    }

    #[test]
    fn test_metadata_not_part_of_hash() {
        let mut entry = sample();
        let before = entry.content_hash;
        entry
            .metadata
            .insert("origin".to_string(), "test".to_string());
        assert_eq!(hasher::hash_entry(&entry), before);
    }

    #[test]
    fn test_rebind_context_changes_id_and_hash() {
        let mut entry = sample();
        let old_id = entry.id;
        let old_hash = entry.content_hash;
        entry.rebind_context("other");
        assert_ne!(entry.id, old_id);
        assert_ne!(entry.content_hash, old_hash);
        assert!(entry.verify_hash());
    }
}
