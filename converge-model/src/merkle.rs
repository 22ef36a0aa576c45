//! Merkle engine over ordered leaf-hash lists
//!
//! Root computation, inclusion-proof generation and verification. The
//! tree pairs adjacent hashes level by level, duplicating a trailing odd
//! element; a single leaf is self-paired.

use thiserror::Error;

use crate::hasher;
use crate::types::Hash;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MerkleError {
    #[error("invalid leaf index {index} for tree of {len} leaves")]
    InvalidIndex { index: usize, len: usize },
}

/// Which side of the current node a proof sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// One step of an inclusion proof: the sibling hash and its side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofStep {
    pub side: Side,
    pub sibling: Hash,
}

/// Inclusion proof for one leaf, ordered from leaf level to root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    pub steps: Vec<ProofStep>,
}

impl MerkleProof {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Compute the root of an ordered list of leaf hashes.
///
/// Empty list hashes to `hash("")`; a single leaf is combined with
/// itself.
pub fn compute_root(leaves: &[Hash]) -> Hash {
    match leaves {
        [] => hasher::hash(b""),
        [leaf] => hasher::combine(leaf, leaf),
        _ => {
            let mut level = leaves.to_vec();
            while level.len() > 1 {
                level = next_level(&level);
            }
            level[0]
        }
    }
}

/// Generate an inclusion proof for the leaf at `index`.
pub fn generate_proof(leaves: &[Hash], index: usize) -> Result<MerkleProof, MerkleError> {
    if index >= leaves.len() {
        return Err(MerkleError::InvalidIndex {
            index,
            len: leaves.len(),
        });
    }
    if leaves.len() == 1 {
        // Self-paired root: the sibling is the leaf itself.
        return Ok(MerkleProof {
            steps: vec![ProofStep {
                side: Side::Right,
                sibling: leaves[0],
            }],
        });
    }

    let mut steps = Vec::new();
    let mut level = leaves.to_vec();
    let mut pos = index;
    while level.len() > 1 {
        let mut sibling = pos ^ 1;
        if sibling >= level.len() {
            // Trailing odd element pairs with itself.
            sibling = pos;
        }
        let side = if sibling < pos { Side::Left } else { Side::Right };
        steps.push(ProofStep {
            side,
            sibling: level[sibling],
        });
        level = next_level(&level);
        pos /= 2;
    }
    Ok(MerkleProof { steps })
}

/// Fold a proof over a leaf hash and compare against the expected root.
pub fn verify_proof(leaf: &Hash, proof: &MerkleProof, root: &Hash) -> bool {
    let mut acc = *leaf;
    for step in &proof.steps {
        acc = match step.side {
            Side::Left => hasher::combine(&step.sibling, &acc),
            Side::Right => hasher::combine(&acc, &step.sibling),
        };
    }
    acc == *root
}

fn next_level(level: &[Hash]) -> Vec<Hash> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => hasher::combine(left, right),
            [odd] => hasher::combine(odd, odd),
            _ => unreachable!("chunks(2) yields 1 or 2 elements"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::hash;

    fn leaves(n: usize) -> Vec<Hash> {
        (0..n).map(|i| hash(format!("leaf-{i}").as_bytes())).collect()
    }

    #[test]
    fn test_empty_root_is_hash_of_empty_string() {
        assert_eq!(compute_root(&[]), hash(b""));
    }

    #[test]
    fn test_single_leaf_self_pairs() {
        let leaf = hash(b"only");
        assert_eq!(compute_root(&[leaf]), hasher::combine(&leaf, &leaf));
    }

    #[test]
    fn test_two_leaves() {
        let l = leaves(2);
        assert_eq!(compute_root(&l), hasher::combine(&l[0], &l[1]));
    }

    #[test]
    fn test_odd_count_duplicates_trailing() {
        let l = leaves(3);
        let ab = hasher::combine(&l[0], &l[1]);
        let cc = hasher::combine(&l[2], &l[2]);
        assert_eq!(compute_root(&l), hasher::combine(&ab, &cc));
    }

    #[test]
    fn test_root_is_deterministic() {
        let l = leaves(7);
        assert_eq!(compute_root(&l), compute_root(&l));
    }

    #[test]
    fn test_any_leaf_mutation_changes_root() {
        let l = leaves(8);
        let root = compute_root(&l);
        for i in 0..l.len() {
            let mut mutated = l.clone();
            let mut bytes = *mutated[i].as_bytes();
            bytes[0] ^= 0x01;
            mutated[i] = Hash::from(bytes);
            assert_ne!(compute_root(&mutated), root, "mutating leaf {i}");
        }
    }

    #[test]
    fn test_proofs_verify_for_all_indices() {
        for n in 1..=9 {
            let l = leaves(n);
            let root = compute_root(&l);
            for i in 0..n {
                let proof = generate_proof(&l, i).unwrap();
                assert!(
                    verify_proof(&l[i], &proof, &root),
                    "proof for {i} of {n} leaves"
                );
            }
        }
    }

    #[test]
    fn test_proof_only_verifies_its_own_leaf() {
        let l = leaves(6);
        let root = compute_root(&l);
        let proof = generate_proof(&l, 2).unwrap();
        for (i, leaf) in l.iter().enumerate() {
            let ok = verify_proof(leaf, &proof, &root);
            assert_eq!(ok, i == 2, "leaf {i} against proof for index 2");
        }
    }

    #[test]
    fn test_proof_size_bound() {
        for n in 1..=64usize {
            let l = leaves(n);
            let bound = (n as f64).log2().ceil() as usize + 1;
            let proof = generate_proof(&l, n - 1).unwrap();
            assert!(
                proof.len() <= bound,
                "{n} leaves: proof len {} > bound {bound}",
                proof.len()
            );
        }
    }

    #[test]
    fn test_invalid_index_rejected() {
        let l = leaves(4);
        assert_eq!(
            generate_proof(&l, 4),
            Err(MerkleError::InvalidIndex { index: 4, len: 4 })
        );
        assert_eq!(
            generate_proof(&[], 0),
            Err(MerkleError::InvalidIndex { index: 0, len: 0 })
        );
    }

    #[test]
    fn test_tampered_proof_fails() {
        let l = leaves(5);
        let root = compute_root(&l);
        let mut proof = generate_proof(&l, 1).unwrap();
        let mut bytes = *proof.steps[0].sibling.as_bytes();
        bytes[31] ^= 0xff;
        proof.steps[0].sibling = Hash::from(bytes);
        assert!(!verify_proof(&l[1], &proof, &root));
    }
}
