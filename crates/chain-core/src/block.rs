use crate::config::ConsensusParams;
use crate::crypto::{hash_to_hex, hex_hash, sha256};
use crate::difficulty::BlockStamp;
use crate::error::{ChainError, Result};
use crate::merkle;
use crate::pow::meets_difficulty;
use crate::transaction::Transaction;
use crate::Hash;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    /// Height of this block; the first block is 1.
    pub id: u64,
    pub timestamp: u64,
    #[serde(with = "hex_hash")]
    pub previous_hash: Hash,
    #[serde(with = "hex_hash")]
    pub merkle_root: Hash,
    pub nonce: u64,
    pub difficulty: u32,
}

impl BlockHeader {
    pub fn hash_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(32 + 32 + 8 * 4);
        bytes.extend_from_slice(&self.previous_hash);
        bytes.extend_from_slice(&self.merkle_root);
        bytes.extend_from_slice(&self.timestamp.to_be_bytes());
        bytes.extend_from_slice(&self.nonce.to_be_bytes());
        bytes.extend_from_slice(&(self.difficulty as u64).to_be_bytes());
        bytes.extend_from_slice(&self.id.to_be_bytes());
        bytes
    }

    pub fn proof_of_work_hash(&self) -> Hash {
        sha256(&self.hash_bytes())
    }

    pub fn stamp(&self) -> BlockStamp {
        BlockStamp {
            timestamp: self.timestamp,
            difficulty: self.difficulty,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

/// What a candidate block is checked against: the current tip and the
/// controller's view of the next height.
#[derive(Clone, Copy, Debug)]
pub struct ValidationContext<'a> {
    pub params: &'a ConsensusParams,
    pub expected_id: u64,
    pub tip_hash: Hash,
    pub required_difficulty: u32,
    pub median_time_past: Option<u64>,
}

impl Block {
    /// Assembles a block with its merkle root filled in and a zero nonce.
    pub fn new(
        id: u64,
        previous_hash: Hash,
        timestamp: u64,
        difficulty: u32,
        transactions: Vec<Transaction>,
    ) -> Result<Self> {
        let merkle_root = merkle::compute_root(&transactions)?;
        Ok(Block {
            header: BlockHeader {
                id,
                timestamp,
                previous_hash,
                merkle_root,
                nonce: 0,
                difficulty,
            },
            transactions,
        })
    }

    pub fn id(&self) -> u64 {
        self.header.id
    }

    /// Chain-linking hash; the same value the proof of work is judged on.
    pub fn hash(&self) -> Hash {
        self.header.proof_of_work_hash()
    }

    pub fn proof_of_work_hash(&self) -> Hash {
        self.header.proof_of_work_hash()
    }

    pub fn meets_difficulty(hash: &Hash, difficulty: u32) -> bool {
        meets_difficulty(hash, difficulty)
    }

    pub fn reward(&self) -> Option<&Transaction> {
        self.transactions.iter().find(|tx| tx.is_reward())
    }

    /// Stateless checks against the current tip. Nothing is mutated.
    pub fn validate_structure(&self, ctx: &ValidationContext<'_>) -> Result<()> {
        let header = &self.header;
        let max = ctx.params.max_transactions_per_block;
        if self.transactions.len() > max {
            return Err(ChainError::TransactionCapacityExceeded {
                count: self.transactions.len(),
                max,
            });
        }

        if header.id != ctx.expected_id {
            return Err(ChainError::ChainLinkMismatch(format!(
                "block {} does not extend tip, expected block {}",
                header.id, ctx.expected_id
            )));
        }
        if header.previous_hash != ctx.tip_hash {
            return Err(ChainError::ChainLinkMismatch(format!(
                "previous hash {} does not match tip {}",
                hash_to_hex(&header.previous_hash),
                hash_to_hex(&ctx.tip_hash)
            )));
        }

        if let Some(median) = ctx.median_time_past {
            if header.timestamp <= median {
                return Err(ChainError::InvalidTimestamp {
                    timestamp: header.timestamp,
                    median,
                });
            }
        }

        if header.difficulty != ctx.required_difficulty {
            return Err(ChainError::DifficultyMismatch {
                expected: ctx.required_difficulty,
                declared: header.difficulty,
            });
        }
        let pow = self.proof_of_work_hash();
        if !meets_difficulty(&pow, header.difficulty) {
            return Err(ChainError::InsufficientDifficulty {
                hash: hash_to_hex(&pow),
                difficulty: header.difficulty,
            });
        }

        self.validate_reward(ctx)?;
        self.validate_signatures()?;

        let ids = merkle::identity_hashes(&self.transactions)?;
        let mut seen = HashSet::with_capacity(ids.len());
        for id in &ids {
            if !seen.insert(*id) {
                return Err(ChainError::DuplicateTransaction(hash_to_hex(id)));
            }
        }
        let root = merkle::root_from_hashes(ids);
        if root != header.merkle_root {
            return Err(ChainError::MerkleRootMismatch {
                expected: hash_to_hex(&root),
                declared: hash_to_hex(&header.merkle_root),
            });
        }
        Ok(())
    }

    fn validate_reward(&self, ctx: &ValidationContext<'_>) -> Result<()> {
        let positions: Vec<usize> = self
            .transactions
            .iter()
            .enumerate()
            .filter(|(_, tx)| tx.is_reward())
            .map(|(i, _)| i)
            .collect();
        match positions.as_slice() {
            [] => Ok(()),
            [0] => {
                let reward = &self.transactions[0];
                let subsidy = ctx.params.block_subsidy(self.header.id);
                if reward.fee() != 0 {
                    return Err(ChainError::InvalidReward(format!(
                        "reward carries fee {}",
                        reward.fee()
                    )));
                }
                if reward.amount() != subsidy {
                    return Err(ChainError::InvalidReward(format!(
                        "reward of {} does not equal subsidy {subsidy}",
                        reward.amount()
                    )));
                }
                Ok(())
            }
            [pos] => Err(ChainError::MalformedRewardPlacement(format!(
                "reward at position {pos}, must be first"
            ))),
            many => Err(ChainError::MalformedRewardPlacement(format!(
                "{} reward transactions, at most one allowed",
                many.len()
            ))),
        }
    }

    /// Signature checks are independent per transaction and run in parallel.
    fn validate_signatures(&self) -> Result<()> {
        self.transactions.par_iter().try_for_each(|tx| {
            if tx.is_reward() {
                return Ok(());
            }
            tx.signature()?;
            if tx.verify_signature() {
                Ok(())
            } else {
                Err(ChainError::InvalidSignature(hash_to_hex(&tx.content_hash())))
            }
        })
    }
}
