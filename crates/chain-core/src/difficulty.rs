//! Difficulty retargeting and cumulative chain work.
//!
//! Work per block is `2^difficulty`, the expected number of hashes needed to
//! get under [`crate::pow::target`]. Retargeting scales that work by
//! `desired / elapsed` over the last `lookback` blocks, which in difficulty
//! space is an additive shift of `log2(desired / elapsed)`. The shift is
//! computed exactly in integers and rounded toward zero, then the result is
//! clamped to `[min_difficulty, max_difficulty]`.

use crate::config::ConsensusParams;
use num_bigint::BigUint;
use num_traits::{CheckedSub, One, Zero};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// The slice of a block header the controller needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStamp {
    pub timestamp: u64,
    pub difficulty: u32,
}

pub fn work(difficulty: u32) -> BigUint {
    BigUint::one() << (difficulty as usize)
}

pub fn accumulate(total_work: &BigUint, difficulty: u32) -> BigUint {
    total_work + work(difficulty)
}

/// Inverse of [`accumulate`], used only when rolling back the tip.
pub fn remove_work(total_work: &BigUint, difficulty: u32) -> BigUint {
    total_work
        .checked_sub(&work(difficulty))
        .unwrap_or_else(BigUint::zero)
}

/// Largest `k` with `den * 2^k <= num`. Requires `0 < den <= num`.
fn log2_floor_ratio(num: u128, den: u128) -> i64 {
    let mut k = 0u32;
    while k + 1 < u128::BITS && den <= num >> (k + 1) {
        k += 1;
    }
    k as i64
}

/// Difficulty after scaling the last stamp's difficulty by the window's
/// desired-to-actual time ratio.
pub fn retarget(params: &ConsensusParams, window: &[BlockStamp]) -> u32 {
    let (Some(first), Some(last)) = (window.first(), window.last()) else {
        return params.initial_difficulty;
    };
    let intervals = (window.len() as u128).saturating_sub(1).max(1);
    let desired = intervals * params.desired_block_time_secs.max(1) as u128;
    let elapsed = last.timestamp.saturating_sub(first.timestamp).max(1) as u128;

    let shift = if elapsed < desired {
        log2_floor_ratio(desired, elapsed)
    } else {
        -log2_floor_ratio(elapsed, desired)
    };
    let next = (last.difficulty as i64 + shift).clamp(
        params.min_difficulty as i64,
        params.max_difficulty as i64,
    );
    next as u32
}

/// Difficulty the block at `height + 1` must declare, given the stamps of the
/// most recent blocks (oldest first) on a chain of `height` blocks.
/// Always within `[min_difficulty, max_difficulty]`, even for a history
/// recorded under wider bounds.
pub fn next_difficulty(params: &ConsensusParams, height: u64, history: &[BlockStamp]) -> u32 {
    let bounded = |d: u32| d.clamp(params.min_difficulty, params.max_difficulty);
    if height < params.lookback {
        return bounded(params.initial_difficulty);
    }
    let tip = match history.last() {
        Some(stamp) => stamp.difficulty,
        None => return bounded(params.initial_difficulty),
    };
    if height % params.lookback != 0 {
        return bounded(tip);
    }
    let take = (params.lookback as usize).min(history.len());
    retarget(params, &history[history.len() - take..])
}

/// Rolling window over the chain tip, rebuilt from storage on open and kept
/// in step with every applied or rolled-back block.
#[derive(Clone, Debug)]
pub struct DifficultyController {
    params: ConsensusParams,
    height: u64,
    window: VecDeque<BlockStamp>,
}

impl DifficultyController {
    pub fn new(params: ConsensusParams) -> Self {
        Self {
            params,
            height: 0,
            window: VecDeque::new(),
        }
    }

    /// `stamps` are the trailing blocks of a chain of `height` blocks, oldest first.
    pub fn from_history<I>(params: ConsensusParams, height: u64, stamps: I) -> Self
    where
        I: IntoIterator<Item = BlockStamp>,
    {
        let mut controller = Self::new(params);
        for stamp in stamps {
            controller.window.push_back(stamp);
            if controller.window.len() > controller.capacity() {
                controller.window.pop_front();
            }
        }
        controller.height = height;
        controller
    }

    /// Number of trailing blocks the controller needs to see.
    pub fn capacity(&self) -> usize {
        (self.params.lookback as usize).max(self.params.median_time_span)
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn window(&self) -> Vec<BlockStamp> {
        self.window.iter().copied().collect()
    }

    pub fn next_difficulty(&self) -> u32 {
        let history: Vec<BlockStamp> = self.window.iter().copied().collect();
        next_difficulty(&self.params, self.height, &history)
    }

    /// Median timestamp of the last `median_time_span` blocks.
    pub fn median_time_past(&self) -> Option<u64> {
        let span = self.params.median_time_span.min(self.window.len());
        if span == 0 {
            return None;
        }
        let mut times: Vec<u64> = self
            .window
            .iter()
            .skip(self.window.len() - span)
            .map(|s| s.timestamp)
            .collect();
        times.sort_unstable();
        Some(times[span / 2])
    }

    pub fn push(&mut self, stamp: BlockStamp) {
        self.window.push_back(stamp);
        if self.window.len() > self.capacity() {
            self.window.pop_front();
        }
        self.height += 1;
    }

    /// Drops the tip. `refill` is the stamp of the block that re-enters the
    /// front of the window, if the chain is long enough to have one.
    pub fn pop(&mut self, refill: Option<BlockStamp>) {
        if self.window.pop_back().is_none() {
            return;
        }
        self.height = self.height.saturating_sub(1);
        if let Some(stamp) = refill {
            self.window.push_front(stamp);
        }
    }
}
