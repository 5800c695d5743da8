pub const HASH_SIZE: usize = 32;
pub const ADDRESS_SIZE: usize = 32;

pub const DIFFICULTY_LOOKBACK: u64 = 100;
pub const DESIRED_BLOCK_TIME_SEC: u64 = 90;
pub const MIN_DIFFICULTY: u32 = 6;
pub const MAX_DIFFICULTY: u32 = 255;
pub const INITIAL_DIFFICULTY: u32 = 16;

pub const MAX_TRANSACTIONS_PER_BLOCK: usize = 25_000;

/// Base units per whole coin.
pub const DECIMAL_SCALE_FACTOR: u64 = 10_000;
pub const INITIAL_SUBSIDY: u64 = 50 * DECIMAL_SCALE_FACTOR;
pub const HALVING_INTERVAL: u64 = 1_000_000;

/// Number of trailing blocks whose median timestamp a new block must exceed.
pub const MEDIAN_TIME_SPAN: usize = 10;
