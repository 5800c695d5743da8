//! The storage gateway contract and an in-memory implementation.

use crate::block::Block;
use crate::config::ConsensusParams;
use crate::crypto::Address;
use crate::Hash;
use anyhow::{bail, Result};
use num_bigint::BigUint;
use num_traits::Zero;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSummary {
    /// Number of applied blocks, which is also the tip's id.
    pub height: u64,
    pub total_work: BigUint,
    /// Difficulty the next block must declare.
    pub difficulty: u32,
}

impl ChainSummary {
    pub fn empty(params: &ConsensusParams) -> Self {
        Self {
            height: 0,
            total_work: BigUint::zero(),
            difficulty: params.initial_difficulty,
        }
    }

    /// Fork choice: strictly more work wins, ties keep the incumbent.
    pub fn outweighs(&self, other: &ChainSummary) -> bool {
        self.total_work > other.total_work
    }
}

/// Every write produced by applying or reverting one block. Backends apply it
/// as a unit so readers never see half of it.
#[derive(Clone, Debug, Default)]
pub struct StoreBatch {
    pub put_block: Option<Block>,
    pub remove_block: Option<u64>,
    pub balances: Vec<(Address, u64)>,
    pub index: Vec<(Hash, u64)>,
    pub unindex: Vec<Hash>,
    pub history_append: Vec<(Address, Hash)>,
    pub history_remove: Vec<(Address, Hash)>,
    pub summary: Option<ChainSummary>,
}

/// Storage backends implement this for the ledger to operate.
/// This lives in `chain-core` to avoid a circular dependency.
pub trait ChainStore: Send + Sync {
    fn put_block(&self, block: &Block) -> Result<()>;
    fn get_block(&self, height: u64) -> Result<Option<Block>>;
    fn remove_block(&self, height: u64) -> Result<()>;

    fn index_transaction(&self, tx_id: &Hash, height: u64) -> Result<()>;
    fn unindex_transaction(&self, tx_id: &Hash) -> Result<()>;
    fn lookup_transaction(&self, tx_id: &Hash) -> Result<Option<u64>>;

    /// Unknown addresses hold 0.
    fn get_balance(&self, address: &Address) -> Result<u64>;
    fn set_balance(&self, address: &Address, amount: u64) -> Result<()>;

    fn append_wallet_history(&self, address: &Address, tx_id: &Hash) -> Result<()>;
    fn remove_wallet_history(&self, address: &Address, tx_id: &Hash) -> Result<()>;
    fn wallet_history(&self, address: &Address) -> Result<Vec<Hash>>;

    fn get_chain_summary(&self) -> Result<Option<ChainSummary>>;
    fn set_chain_summary(&self, summary: &ChainSummary) -> Result<()>;

    /// Applies `batch` with the summary written last. Backends that can make
    /// this atomic should override it.
    fn commit(&self, batch: &StoreBatch) -> Result<()> {
        for (address, tx_id) in &batch.history_remove {
            self.remove_wallet_history(address, tx_id)?;
        }
        for tx_id in &batch.unindex {
            self.unindex_transaction(tx_id)?;
        }
        if let Some(height) = batch.remove_block {
            self.remove_block(height)?;
        }
        if let Some(block) = &batch.put_block {
            self.put_block(block)?;
        }
        for (tx_id, height) in &batch.index {
            self.index_transaction(tx_id, *height)?;
        }
        for (address, amount) in &batch.balances {
            self.set_balance(address, *amount)?;
        }
        for (address, tx_id) in &batch.history_append {
            self.append_wallet_history(address, tx_id)?;
        }
        if let Some(summary) = &batch.summary {
            self.set_chain_summary(summary)?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct Tables {
    blocks: BTreeMap<u64, Block>,
    tx_index: HashMap<Hash, u64>,
    balances: HashMap<Address, u64>,
    history: HashMap<Address, Vec<Hash>>,
    summary: Option<ChainSummary>,
}

impl Tables {
    fn apply(&mut self, batch: &StoreBatch) {
        for (address, tx_id) in &batch.history_remove {
            if let Some(ids) = self.history.get_mut(address) {
                ids.retain(|id| id != tx_id);
            }
        }
        for tx_id in &batch.unindex {
            self.tx_index.remove(tx_id);
        }
        if let Some(height) = batch.remove_block {
            self.blocks.remove(&height);
        }
        if let Some(block) = &batch.put_block {
            self.blocks.insert(block.id(), block.clone());
        }
        for (tx_id, height) in &batch.index {
            self.tx_index.insert(*tx_id, *height);
        }
        for (address, amount) in &batch.balances {
            self.balances.insert(*address, *amount);
        }
        for (address, tx_id) in &batch.history_append {
            self.history.entry(*address).or_default().push(*tx_id);
        }
        if let Some(summary) = &batch.summary {
            self.summary = Some(summary.clone());
        }
    }
}

/// Process-local store; every batch commits under one write lock.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_count(&self) -> usize {
        self.tables.read().blocks.len()
    }
}

impl ChainStore for MemoryStore {
    fn put_block(&self, block: &Block) -> Result<()> {
        if block.id() == 0 {
            bail!("block id 0 is reserved");
        }
        self.tables.write().blocks.insert(block.id(), block.clone());
        Ok(())
    }

    fn get_block(&self, height: u64) -> Result<Option<Block>> {
        Ok(self.tables.read().blocks.get(&height).cloned())
    }

    fn remove_block(&self, height: u64) -> Result<()> {
        self.tables.write().blocks.remove(&height);
        Ok(())
    }

    fn index_transaction(&self, tx_id: &Hash, height: u64) -> Result<()> {
        self.tables.write().tx_index.insert(*tx_id, height);
        Ok(())
    }

    fn unindex_transaction(&self, tx_id: &Hash) -> Result<()> {
        self.tables.write().tx_index.remove(tx_id);
        Ok(())
    }

    fn lookup_transaction(&self, tx_id: &Hash) -> Result<Option<u64>> {
        Ok(self.tables.read().tx_index.get(tx_id).copied())
    }

    fn get_balance(&self, address: &Address) -> Result<u64> {
        Ok(self.tables.read().balances.get(address).copied().unwrap_or(0))
    }

    fn set_balance(&self, address: &Address, amount: u64) -> Result<()> {
        self.tables.write().balances.insert(*address, amount);
        Ok(())
    }

    fn append_wallet_history(&self, address: &Address, tx_id: &Hash) -> Result<()> {
        self.tables
            .write()
            .history
            .entry(*address)
            .or_default()
            .push(*tx_id);
        Ok(())
    }

    fn remove_wallet_history(&self, address: &Address, tx_id: &Hash) -> Result<()> {
        if let Some(ids) = self.tables.write().history.get_mut(address) {
            ids.retain(|id| id != tx_id);
        }
        Ok(())
    }

    fn wallet_history(&self, address: &Address) -> Result<Vec<Hash>> {
        Ok(self
            .tables
            .read()
            .history
            .get(address)
            .cloned()
            .unwrap_or_default())
    }

    fn get_chain_summary(&self) -> Result<Option<ChainSummary>> {
        Ok(self.tables.read().summary.clone())
    }

    fn set_chain_summary(&self, summary: &ChainSummary) -> Result<()> {
        self.tables.write().summary = Some(summary.clone());
        Ok(())
    }

    fn commit(&self, batch: &StoreBatch) -> Result<()> {
        if let Some(block) = &batch.put_block {
            if block.id() == 0 {
                bail!("block id 0 is reserved");
            }
        }
        self.tables.write().apply(batch);
        Ok(())
    }
}
