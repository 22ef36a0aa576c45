//! SHA-256 primitives and canonical entry serialization
//!
//! Every hashed field is framed with a little-endian u64 length prefix
//! so that no two distinct field tuples serialize to the same byte
//! string.

use sha2::{Digest, Sha256};

use crate::entry::Entry;
use crate::types::Hash;

/// Raw SHA-256 over a byte slice.
pub fn hash(bytes: &[u8]) -> Hash {
    Hash(Sha256::digest(bytes).into())
}

/// Merkle internal-node rule: `hash(left || right)`.
pub fn combine(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Hash(hasher.finalize().into())
}

/// Canonical content hash of an entry.
///
/// Covers exactly `{context_id, key, payload, sequence, appended_at_ns}`.
pub fn hash_entry(entry: &Entry) -> Hash {
    let mut hasher = Sha256::new();
    update_framed(&mut hasher, entry.context_id.as_bytes());
    update_framed(&mut hasher, entry.key.as_bytes());
    update_framed(&mut hasher, &entry.payload);
    update_framed(&mut hasher, &entry.sequence.to_le_bytes());
    update_framed(&mut hasher, &entry.appended_at_ns.to_le_bytes());
    Hash(hasher.finalize().into())
}

fn update_framed(hasher: &mut Sha256, field: &[u8]) {
    hasher.update((field.len() as u64).to_le_bytes());
    hasher.update(field);
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn entry(context_id: &str, key: &str, payload: &[u8], seq: u64, at: u64) -> Entry {
        Entry::new(
            context_id.into(),
            key.into(),
            payload.to_vec(),
            HashMap::new(),
            seq,
            1,
            at,
        )
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash(b"abc"), hash(b"abc"));
        assert_ne!(hash(b"abc"), hash(b"abd"));
    }

    #[test]
    fn test_hash_empty_is_sha256_of_empty_string() {
        // Well-known SHA-256("") digest
        let expected =
            Hash::from_hex("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
                .unwrap();
        assert_eq!(hash(b""), expected);
    }

    #[test]
    fn test_combine_is_order_sensitive() {
        let a = hash(b"a");
        let b = hash(b"b");
        assert_ne!(combine(&a, &b), combine(&b, &a));
    }

    #[test]
    fn test_framing_prevents_field_boundary_ambiguity() {
        // Same concatenated bytes, different field split
        let e1 = entry("ab", "c", b"", 1, 0);
        let e2 = entry("a", "bc", b"", 1, 0);
        assert_ne!(hash_entry(&e1), hash_entry(&e2));
    }

    #[test]
    fn test_each_semantic_field_affects_hash() {
        let base = entry("ctx", "facts", b"p", 1, 100);
        let variants = [
            entry("ctx2", "facts", b"p", 1, 100),
            entry("ctx", "intents", b"p", 1, 100),
            entry("ctx", "facts", b"q", 1, 100),
            entry("ctx", "facts", b"p", 2, 100),
            entry("ctx", "facts", b"p", 1, 101),
        ];
        for variant in &variants {
            assert_ne!(hash_entry(&base), hash_entry(variant));
        }
    }
}
