#![allow(dead_code)]

use std::fs;

use chain_core::{pow, Block, ChainStore, ConsensusParams, Ledger, Transaction};
use chain_storage::SledStore;
use tempfile::{tempdir, TempDir};

pub const SUBSIDY: u64 = 50;

pub fn test_params() -> ConsensusParams {
    ConsensusParams {
        lookback: 5,
        min_difficulty: 1,
        max_difficulty: 12,
        initial_difficulty: 4,
        max_transactions_per_block: 64,
        initial_subsidy: SUBSIDY,
        median_time_span: 3,
        ..ConsensusParams::default()
    }
}

pub fn create_temp_store() -> (TempDir, SledStore) {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let store = SledStore::open(temp_dir.path()).expect("Failed to open SledStore");
    (temp_dir, store)
}

pub fn teardown_store(temp_dir: TempDir, store: SledStore) {
    let db_path = temp_dir.path().to_path_buf();
    store.clear().expect("Failed to clear the store");
    drop(store);
    temp_dir.close().expect("Failed to delete temp dir");
    let _ = fs::remove_dir_all(&db_path);
    assert!(!db_path.exists(), "Database directory should be removed");
}

pub fn mine(mut block: Block) -> Block {
    while !pow::meets_difficulty(&block.hash(), block.header.difficulty) {
        block.header.nonce += 1;
    }
    block
}

/// Mined block on top of `ledger`'s tip, rewarding `miner` and carrying `txs`.
pub fn next_block<S: ChainStore>(
    ledger: &Ledger<S>,
    miner: chain_core::Address,
    txs: Vec<Transaction>,
) -> Block {
    let height = ledger.height() + 1;
    let timestamp = 1_700_000_000 + height * ledger.params().desired_block_time_secs;
    let subsidy = ledger.params().block_subsidy(height);
    let mut all = vec![Transaction::reward(miner, subsidy, timestamp)];
    all.extend(txs);
    let block = Block::new(
        height,
        ledger.tip_hash(),
        timestamp,
        ledger.required_difficulty(),
        all,
    )
    .expect("assemble block");
    mine(block)
}
