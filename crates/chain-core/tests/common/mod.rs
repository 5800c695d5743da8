#![allow(dead_code)]

use std::sync::Arc;

use chain_core::{pow, Address, Block, ConsensusParams, KeyPair, Ledger, MemoryStore, Transaction};

pub const BASE_TIME: u64 = 1_650_000_000;

/// Routes ledger logs to the test harness; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn params() -> ConsensusParams {
    ConsensusParams {
        lookback: 4,
        desired_block_time_secs: 90,
        min_difficulty: 1,
        max_difficulty: 12,
        initial_difficulty: 4,
        max_transactions_per_block: 32,
        initial_subsidy: 50,
        median_time_span: 3,
        ..ConsensusParams::default()
    }
}

pub fn keys(seed: u8) -> KeyPair {
    KeyPair::from_secret_bytes(&[seed; 32]).unwrap()
}

pub fn ledger_with(params: ConsensusParams) -> Ledger<MemoryStore> {
    Ledger::open(Arc::new(MemoryStore::new()), params).unwrap()
}

pub fn mine(mut block: Block) -> Block {
    while !pow::meets_difficulty(&block.hash(), block.header.difficulty) {
        block.header.nonce += 1;
    }
    block
}

/// Mined block extending `ledger` at `timestamp` with the correct subsidy.
pub fn block_at(
    ledger: &Ledger<MemoryStore>,
    miner: Address,
    timestamp: u64,
    txs: Vec<Transaction>,
) -> Block {
    let height = ledger.height() + 1;
    let subsidy = ledger.params().block_subsidy(height);
    let mut all = vec![Transaction::reward(miner, subsidy, timestamp)];
    all.extend(txs);
    mine(
        Block::new(
            height,
            ledger.tip_hash(),
            timestamp,
            ledger.required_difficulty(),
            all,
        )
        .unwrap(),
    )
}

/// Like [`block_at`] with blocks spaced at the desired interval.
pub fn next_block(ledger: &Ledger<MemoryStore>, miner: Address, txs: Vec<Transaction>) -> Block {
    let timestamp = BASE_TIME + (ledger.height() + 1) * ledger.params().desired_block_time_secs;
    block_at(ledger, miner, timestamp, txs)
}
