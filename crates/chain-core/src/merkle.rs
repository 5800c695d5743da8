//! Merkle commitment over a block's transaction identities.
//!
//! Leaves are sorted in descending order of their uppercase hex encoding, an
//! odd level count duplicates the last leaf, and parents are `H(left || right)`.
//! The tree lives in an index-addressed arena that is dropped once the root
//! (or an inclusion path) has been read out.

use crate::crypto::{concat_hashes, NULL_HASH};
use crate::error::Result;
use crate::transaction::Transaction;
use crate::Hash;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

struct Node {
    hash: Hash,
    parent: Option<usize>,
    children: Option<(usize, usize)>,
}

struct Arena {
    nodes: Vec<Node>,
    leaves: usize,
}

impl Arena {
    fn build(mut hashes: Vec<Hash>) -> Option<Arena> {
        if hashes.is_empty() {
            return None;
        }
        sort_leaves(&mut hashes);

        let mut nodes: Vec<Node> = hashes
            .into_iter()
            .map(|hash| Node {
                hash,
                parent: None,
                children: None,
            })
            .collect();
        if nodes.len() % 2 == 1 {
            let last = nodes[nodes.len() - 1].hash;
            nodes.push(Node {
                hash: last,
                parent: None,
                children: None,
            });
        }
        let leaves = nodes.len();

        let mut queue: VecDeque<usize> = (0..leaves).collect();
        while queue.len() > 1 {
            let (Some(a), Some(b)) = (queue.pop_front(), queue.pop_front()) else {
                break;
            };
            let idx = nodes.len();
            nodes.push(Node {
                hash: concat_hashes(&nodes[a].hash, &nodes[b].hash),
                parent: None,
                children: Some((a, b)),
            });
            nodes[a].parent = Some(idx);
            nodes[b].parent = Some(idx);
            queue.push_back(idx);
        }
        Some(Arena { nodes, leaves })
    }

    fn root(&self) -> Hash {
        self.nodes[self.nodes.len() - 1].hash
    }
}

/// Descending order of the canonical (hex) encoding. Hex preserves byte
/// order, so comparing raw bytes gives the same sequence.
pub fn sort_leaves(hashes: &mut [Hash]) {
    hashes.sort_unstable_by(|a, b| b.cmp(a));
}

pub fn root_from_hashes(hashes: Vec<Hash>) -> Hash {
    Arena::build(hashes).map_or(NULL_HASH, |arena| arena.root())
}

pub fn identity_hashes(transactions: &[Transaction]) -> Result<Vec<Hash>> {
    transactions
        .par_iter()
        .map(Transaction::identity_hash)
        .collect()
}

/// Merkle root of `transactions`; [`NULL_HASH`] when there are none.
pub fn compute_root(transactions: &[Transaction]) -> Result<Hash> {
    Ok(root_from_hashes(identity_hashes(transactions)?))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling: Hash,
    /// The sibling is the left operand of the fold at this level.
    pub sibling_is_left: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf: Hash,
    pub path: Vec<ProofStep>,
}

impl MerkleProof {
    pub fn compute_root(&self) -> Hash {
        self.path.iter().fold(self.leaf, |acc, step| {
            if step.sibling_is_left {
                concat_hashes(&step.sibling, &acc)
            } else {
                concat_hashes(&acc, &step.sibling)
            }
        })
    }

    pub fn verify(&self, root: &Hash) -> bool {
        self.compute_root() == *root
    }
}

/// Inclusion path for `tx_id`, or `None` if it is not among `transactions`.
pub fn inclusion_proof(transactions: &[Transaction], tx_id: &Hash) -> Result<Option<MerkleProof>> {
    let Some(arena) = Arena::build(identity_hashes(transactions)?) else {
        return Ok(None);
    };
    let Some(mut idx) = (0..arena.leaves).find(|&i| arena.nodes[i].hash == *tx_id) else {
        return Ok(None);
    };

    let mut path = Vec::new();
    while let Some(parent) = arena.nodes[idx].parent {
        let Some((left, right)) = arena.nodes[parent].children else {
            break;
        };
        let step = if left == idx {
            ProofStep {
                sibling: arena.nodes[right].hash,
                sibling_is_left: false,
            }
        } else {
            ProofStep {
                sibling: arena.nodes[left].hash,
                sibling_is_left: true,
            }
        };
        path.push(step);
        idx = parent;
    }
    Ok(Some(MerkleProof {
        leaf: *tx_id,
        path,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{sha256, KeyPair};

    fn txs(n: u64) -> Vec<Transaction> {
        let alice = KeyPair::from_secret_bytes(&[1u8; 32]).unwrap();
        let bob = KeyPair::from_secret_bytes(&[2u8; 32]).unwrap();
        (0..n)
            .map(|i| Transaction::signed(bob.address(), 10 + i, 1, 1_600_000_000 + i, &alice))
            .collect()
    }

    fn sorted_ids(txs: &[Transaction]) -> Vec<Hash> {
        let mut ids = identity_hashes(txs).unwrap();
        sort_leaves(&mut ids);
        ids
    }

    #[test]
    fn empty_root_is_null_hash() {
        assert_eq!(compute_root(&[]).unwrap(), NULL_HASH);
    }

    #[test]
    fn single_leaf_is_duplicated() {
        let txs = txs(1);
        let id = txs[0].identity_hash().unwrap();
        assert_eq!(compute_root(&txs).unwrap(), concat_hashes(&id, &id));
    }

    #[test]
    fn three_leaves_duplicate_last_after_sort() {
        let txs = txs(3);
        let ids = sorted_ids(&txs);
        let ab = concat_hashes(&ids[0], &ids[1]);
        let cc = concat_hashes(&ids[2], &ids[2]);
        assert_eq!(compute_root(&txs).unwrap(), concat_hashes(&ab, &cc));
    }

    #[test]
    fn six_leaves_fold_through_the_queue() {
        // 6 leaves -> 3 parents; the queue folds (p0,p1) then (p2,p01).
        let txs = txs(6);
        let ids = sorted_ids(&txs);
        let p0 = concat_hashes(&ids[0], &ids[1]);
        let p1 = concat_hashes(&ids[2], &ids[3]);
        let p2 = concat_hashes(&ids[4], &ids[5]);
        let p01 = concat_hashes(&p0, &p1);
        assert_eq!(compute_root(&txs).unwrap(), concat_hashes(&p2, &p01));
    }

    #[test]
    fn sort_matches_descending_hex() {
        let mut hashes: Vec<Hash> = (0u8..20).map(|i| sha256(&[i])).collect();
        let mut by_hex = hashes.clone();
        by_hex.sort_by_key(|h| std::cmp::Reverse(hex::encode_upper(h)));
        sort_leaves(&mut hashes);
        assert_eq!(hashes, by_hex);
    }

    #[test]
    fn root_ignores_input_order() {
        let txs = txs(5);
        let mut reversed = txs.clone();
        reversed.reverse();
        let mut rotated = txs.clone();
        rotated.rotate_left(2);
        let root = compute_root(&txs).unwrap();
        assert_eq!(root, compute_root(&reversed).unwrap());
        assert_eq!(root, compute_root(&rotated).unwrap());
    }

    #[test]
    fn root_changes_with_any_identity() {
        let mut txs = txs(4);
        let root = compute_root(&txs).unwrap();
        let alice = KeyPair::from_secret_bytes(&[1u8; 32]).unwrap();
        let (to, amount, timestamp) = (txs[2].to(), txs[2].amount(), txs[2].timestamp());
        txs[2] = Transaction::signed(to, amount + 1, 1, timestamp, &alice);
        assert_ne!(root, compute_root(&txs).unwrap());
    }

    #[test]
    fn unsigned_transaction_fails_commitment() {
        let alice = KeyPair::from_secret_bytes(&[1u8; 32]).unwrap();
        let mut list = txs(2);
        list.push(Transaction::transfer(alice.address(), 1, 0, 1, alice.verifying));
        assert!(compute_root(&list).is_err());
    }

    #[test]
    fn inclusion_proofs_verify_for_every_leaf() {
        for n in [1u64, 2, 3, 7, 16] {
            let txs = txs(n);
            let root = compute_root(&txs).unwrap();
            for tx in &txs {
                let id = tx.identity_hash().unwrap();
                let proof = inclusion_proof(&txs, &id).unwrap().expect("leaf present");
                assert!(proof.verify(&root), "n={n}");
                assert!(!proof.verify(&sha256(b"other root")));
            }
        }
    }

    #[test]
    fn inclusion_proof_for_missing_leaf_is_none() {
        let txs = txs(3);
        assert!(inclusion_proof(&txs, &sha256(b"absent")).unwrap().is_none());
        assert!(inclusion_proof(&[], &sha256(b"absent")).unwrap().is_none());
    }
}
