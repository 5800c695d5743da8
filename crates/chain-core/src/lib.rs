//! Consensus and ledger core for an account-based proof-of-work chain.
//!
//! - [`transaction`]: signed transfers and the block reward
//! - [`merkle`]: commitment over a block's transaction identities
//! - [`block`]: headers, proof-of-work hash and structural validation
//! - [`difficulty`]: retargeting and cumulative work
//! - [`ledger`]: balance application, rollback and fork choice
//! - [`store`]: the storage gateway contract and an in-memory implementation

pub mod block;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod difficulty;
pub mod error;
pub mod ledger;
pub mod merkle;
pub mod store;
pub mod transaction;

pub type Hash = [u8; 32];

pub use block::{Block, BlockHeader, ValidationContext};
pub use config::ConsensusParams;
pub use crypto::{Address, KeyPair, NULL_HASH};
pub use difficulty::{BlockStamp, DifficultyController};
pub use error::{ChainError, Result};
pub use ledger::Ledger;
pub use store::{ChainStore, ChainSummary, MemoryStore};
pub use transaction::{Transaction, TxKind};

pub mod pow {
    use super::Hash;
    use num_bigint::BigUint;
    use num_traits::One;

    /// `2^(256 - difficulty)`. A hash meets the difficulty when its big-endian
    /// integer value is strictly below this.
    pub fn target(difficulty: u32) -> BigUint {
        BigUint::one() << (256u32.saturating_sub(difficulty) as usize)
    }

    pub fn meets_difficulty(hash: &Hash, difficulty: u32) -> bool {
        BigUint::from_bytes_be(hash) < target(difficulty)
    }

    pub fn count_leading_zero_bits(hash: &Hash) -> u32 {
        let mut total = 0u32;
        for b in hash {
            if *b == 0 {
                total += 8;
            } else {
                total += b.leading_zeros();
                break;
            }
        }
        total
    }
}
