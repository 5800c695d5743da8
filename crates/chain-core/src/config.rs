//! Consensus parameters shared by every node on a network.

use crate::constants::*;
use crate::error::{ChainError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusParams {
    /// Blocks in the difficulty window, and the retarget interval.
    pub lookback: u64,
    pub desired_block_time_secs: u64,
    pub min_difficulty: u32,
    pub max_difficulty: u32,
    pub initial_difficulty: u32,
    pub max_transactions_per_block: usize,
    pub initial_subsidy: u64,
    pub halving_interval: u64,
    pub median_time_span: usize,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            lookback: DIFFICULTY_LOOKBACK,
            desired_block_time_secs: DESIRED_BLOCK_TIME_SEC,
            min_difficulty: MIN_DIFFICULTY,
            max_difficulty: MAX_DIFFICULTY,
            initial_difficulty: INITIAL_DIFFICULTY,
            max_transactions_per_block: MAX_TRANSACTIONS_PER_BLOCK,
            initial_subsidy: INITIAL_SUBSIDY,
            halving_interval: HALVING_INTERVAL,
            median_time_span: MEDIAN_TIME_SPAN,
        }
    }
}

impl ConsensusParams {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let params: ConsensusParams = serde_json::from_str(s)?;
        params.validate()?;
        Ok(params)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            ChainError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(ChainError::InvalidConfig(msg));
        if self.lookback < 2 {
            return fail(format!("lookback must be at least 2, got {}", self.lookback));
        }
        if self.desired_block_time_secs == 0 {
            return fail("desired block time must be positive".into());
        }
        if self.min_difficulty > self.max_difficulty {
            return fail(format!(
                "min difficulty {} exceeds max difficulty {}",
                self.min_difficulty, self.max_difficulty
            ));
        }
        if self.max_difficulty > 256 {
            return fail(format!("max difficulty {} exceeds 256", self.max_difficulty));
        }
        if !(self.min_difficulty..=self.max_difficulty).contains(&self.initial_difficulty) {
            return fail(format!(
                "initial difficulty {} outside [{}, {}]",
                self.initial_difficulty, self.min_difficulty, self.max_difficulty
            ));
        }
        if self.max_transactions_per_block == 0 {
            return fail("max transactions per block must be positive".into());
        }
        if self.halving_interval == 0 {
            return fail("halving interval must be positive".into());
        }
        Ok(())
    }

    /// Amount minted by the reward transaction of block `height`.
    pub fn block_subsidy(&self, height: u64) -> u64 {
        let halvings = height / self.halving_interval;
        if halvings >= 64 {
            0
        } else {
            self.initial_subsidy >> halvings
        }
    }
}
