//! Error types for the consensus core.

use crate::crypto::Address;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("transaction is not signed")]
    UnsignedTransaction,

    #[error("invalid signature on transaction {0}")]
    InvalidSignature(String),

    #[error("merkle root mismatch: expected {expected}, got {declared}")]
    MerkleRootMismatch { expected: String, declared: String },

    #[error("chain link mismatch: {0}")]
    ChainLinkMismatch(String),

    #[error("proof of work {hash} does not meet difficulty {difficulty}")]
    InsufficientDifficulty { hash: String, difficulty: u32 },

    #[error("difficulty mismatch: expected {expected}, declared {declared}")]
    DifficultyMismatch { expected: u32, declared: u32 },

    #[error("block carries {count} transactions, maximum is {max}")]
    TransactionCapacityExceeded { count: usize, max: usize },

    #[error("insufficient balance for {address}: needs {needed}, has {available}")]
    InsufficientBalance {
        address: Address,
        needed: u64,
        available: u64,
    },

    #[error("malformed reward placement: {0}")]
    MalformedRewardPlacement(String),

    #[error("invalid reward: {0}")]
    InvalidReward(String),

    #[error("duplicate transaction {0}")]
    DuplicateTransaction(String),

    #[error("invalid timestamp {timestamp}: must exceed median time past {median}")]
    InvalidTimestamp { timestamp: u64, median: u64 },

    #[error("balance overflow for {0}")]
    BalanceOverflow(Address),

    #[error("unknown block {0}")]
    UnknownBlock(u64),

    #[error("invalid height {height} (chain height {tip})")]
    InvalidHeight { height: u64, tip: u64 },

    #[error("storage unavailable: {0:#}")]
    StorageUnavailable(#[source] anyhow::Error),

    #[error("timed out waiting for the chain writer")]
    WriterBusy,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("encoding error: {0}")]
    Encoding(String),
}

impl ChainError {
    /// Storage failures and writer contention may succeed on retry; every
    /// other kind is a property of the input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChainError::StorageUnavailable(_) | ChainError::WriterBusy)
    }

    /// True for rejections of a candidate block or transaction.
    pub fn is_validation(&self) -> bool {
        !matches!(
            self,
            ChainError::StorageUnavailable(_)
                | ChainError::WriterBusy
                | ChainError::InvalidConfig(_)
                | ChainError::UnknownBlock(_)
                | ChainError::InvalidHeight { .. }
        )
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Encoding(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;
