//! Block application, rollback and the balance table.
//!
//! A single writer gate serializes [`Ledger::apply_block`] and
//! [`Ledger::rollback_tip`]. Validation runs under the gate only; the view
//! lock is taken for writing just long enough to commit the store batch and
//! swap the in-memory tip, and readers hold it for reading while they query
//! the store, so no read ever straddles a commit.

use crate::block::{Block, ValidationContext};
use crate::config::ConsensusParams;
use crate::crypto::{hash_to_hex, Address, NULL_HASH};
use crate::difficulty::{accumulate, remove_work, DifficultyController};
use crate::error::{ChainError, Result};
use crate::store::{ChainStore, ChainSummary, StoreBatch};
use crate::Hash;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Gates a candidate block passes through on its way to the balance table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyStage {
    Received,
    StructurallyValid,
    BalancesChecked,
    Applied,
}

#[derive(Clone, Debug)]
struct ChainView {
    summary: ChainSummary,
    tip_hash: Hash,
    controller: DifficultyController,
}

/// Balance writes and index entries for one block, computed before commit.
struct BalancePlan {
    balances: HashMap<Address, u64>,
    index: Vec<(Hash, u64)>,
    history: Vec<(Address, Hash)>,
}

pub struct Ledger<S: ChainStore> {
    store: Arc<S>,
    params: ConsensusParams,
    writer: Mutex<()>,
    view: RwLock<ChainView>,
}

fn storage(err: anyhow::Error) -> ChainError {
    ChainError::StorageUnavailable(err)
}

impl<S: ChainStore> Ledger<S> {
    pub fn new(store: Arc<S>) -> Result<Self> {
        Self::open(store, ConsensusParams::default())
    }

    /// Loads the chain summary and the trailing difficulty window from `store`.
    pub fn open(store: Arc<S>, params: ConsensusParams) -> Result<Self> {
        params.validate()?;
        let mut summary = store
            .get_chain_summary()
            .map_err(storage)?
            .unwrap_or_else(|| ChainSummary::empty(&params));

        let capacity = DifficultyController::new(params.clone()).capacity() as u64;
        let first = summary.height.saturating_sub(capacity) + 1;
        let mut stamps = Vec::new();
        let mut tip_hash = NULL_HASH;
        for height in first..=summary.height {
            let block = store
                .get_block(height)
                .map_err(storage)?
                .ok_or(ChainError::UnknownBlock(height))?;
            stamps.push(block.header.stamp());
            tip_hash = block.hash();
        }
        let controller = DifficultyController::from_history(params.clone(), summary.height, stamps);
        summary.difficulty = controller.next_difficulty();

        info!(
            height = summary.height,
            difficulty = summary.difficulty,
            "ledger opened"
        );
        Ok(Self {
            store,
            params,
            writer: Mutex::new(()),
            view: RwLock::new(ChainView {
                summary,
                tip_hash,
                controller,
            }),
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn summary(&self) -> ChainSummary {
        self.view.read().summary.clone()
    }

    pub fn height(&self) -> u64 {
        self.view.read().summary.height
    }

    pub fn tip_hash(&self) -> Hash {
        self.view.read().tip_hash
    }

    /// Difficulty the next block must declare.
    pub fn required_difficulty(&self) -> u32 {
        self.view.read().summary.difficulty
    }

    /// Whether a competing chain with `other` should replace this one.
    pub fn prefers(&self, other: &ChainSummary) -> bool {
        other.outweighs(&self.view.read().summary)
    }

    pub fn balance(&self, address: &Address) -> Result<u64> {
        let _view = self.view.read();
        self.store.get_balance(address).map_err(storage)
    }

    /// Balances of several accounts as of the same tip.
    pub fn balances(&self, addresses: &[Address]) -> Result<Vec<u64>> {
        let _view = self.view.read();
        addresses
            .iter()
            .map(|a| self.store.get_balance(a).map_err(storage))
            .collect()
    }

    /// Height of the block containing `tx_id`, if any.
    pub fn transaction_height(&self, tx_id: &Hash) -> Result<Option<u64>> {
        let _view = self.view.read();
        self.store.lookup_transaction(tx_id).map_err(storage)
    }

    pub fn wallet_history(&self, address: &Address) -> Result<Vec<Hash>> {
        let _view = self.view.read();
        self.store.wallet_history(address).map_err(storage)
    }

    pub fn block(&self, height: u64) -> Result<Block> {
        let view = self.view.read();
        let tip = view.summary.height;
        if height == 0 || height > tip {
            return Err(ChainError::InvalidHeight { height, tip });
        }
        self.store
            .get_block(height)
            .map_err(storage)?
            .ok_or(ChainError::UnknownBlock(height))
    }

    /// Seeds balances before the first block. Amounts add to any existing
    /// allocation.
    pub fn allocate_genesis(&self, allocations: &[(Address, u64)]) -> Result<()> {
        let _writer = self.writer.lock();
        let tip = self.view.read().summary.height;
        if tip != 0 {
            return Err(ChainError::InvalidHeight { height: 0, tip });
        }
        let mut balances: HashMap<Address, u64> = HashMap::new();
        for (address, amount) in allocations {
            let current = match balances.get(address) {
                Some(b) => *b,
                None => self.store.get_balance(address).map_err(storage)?,
            };
            let next = current
                .checked_add(*amount)
                .ok_or(ChainError::BalanceOverflow(*address))?;
            balances.insert(*address, next);
        }
        let batch = StoreBatch {
            balances: balances.into_iter().collect(),
            ..StoreBatch::default()
        };
        let _view = self.view.write();
        self.store.commit(&batch).map_err(storage)?;
        info!(accounts = allocations.len(), "genesis allocation committed");
        Ok(())
    }

    /// Runs every check `apply_block` would, without committing.
    pub fn check_block(&self, block: &Block) -> Result<()> {
        let _writer = self.writer.lock();
        let view = self.view.read().clone();
        self.validate(&view, block)?;
        self.plan_balances(block).map(|_| ())
    }

    pub fn apply_block(&self, block: &Block) -> Result<ChainSummary> {
        let _writer = self.writer.lock();
        self.apply_locked(block)
    }

    /// Like [`Ledger::apply_block`], but gives up with
    /// [`ChainError::WriterBusy`] if the writer gate stays taken for `timeout`.
    pub fn apply_block_within(&self, block: &Block, timeout: Duration) -> Result<ChainSummary> {
        let _writer = self
            .writer
            .try_lock_for(timeout)
            .ok_or(ChainError::WriterBusy)?;
        self.apply_locked(block)
    }

    fn validate(&self, view: &ChainView, block: &Block) -> Result<()> {
        let ctx = ValidationContext {
            params: &self.params,
            expected_id: view.summary.height + 1,
            tip_hash: view.tip_hash,
            required_difficulty: view.summary.difficulty,
            median_time_past: view.controller.median_time_past(),
        };
        block.validate_structure(&ctx)
    }

    fn apply_locked(&self, block: &Block) -> Result<ChainSummary> {
        let mut stage = ApplyStage::Received;
        let view = self.view.read().clone();
        let result = self.try_apply(&view, block, &mut stage);
        if let Err(err) = &result {
            warn!(
                id = block.id(),
                ?stage,
                retryable = err.is_retryable(),
                "block rejected: {err}"
            );
        }
        result
    }

    fn try_apply(
        &self,
        view: &ChainView,
        block: &Block,
        stage: &mut ApplyStage,
    ) -> Result<ChainSummary> {
        self.validate(view, block)?;
        *stage = ApplyStage::StructurallyValid;

        let plan = self.plan_balances(block)?;
        *stage = ApplyStage::BalancesChecked;

        let mut controller = view.controller.clone();
        controller.push(block.header.stamp());
        let summary = ChainSummary {
            height: view.summary.height + 1,
            total_work: accumulate(&view.summary.total_work, block.header.difficulty),
            difficulty: controller.next_difficulty(),
        };
        let batch = StoreBatch {
            put_block: Some(block.clone()),
            balances: plan.balances.into_iter().collect(),
            index: plan.index,
            history_append: plan.history,
            summary: Some(summary.clone()),
            ..StoreBatch::default()
        };

        let tip_hash = block.hash();
        {
            let mut guard = self.view.write();
            self.store.commit(&batch).map_err(storage)?;
            *guard = ChainView {
                summary: summary.clone(),
                tip_hash,
                controller,
            };
        }
        *stage = ApplyStage::Applied;

        info!(
            height = summary.height,
            hash = %hash_to_hex(&tip_hash),
            difficulty = block.header.difficulty,
            next_difficulty = summary.difficulty,
            txs = block.transactions.len(),
            "block applied"
        );
        Ok(summary)
    }

    fn load_balance(&self, overlay: &HashMap<Address, u64>, address: &Address) -> Result<u64> {
        match overlay.get(address) {
            Some(b) => Ok(*b),
            None => self.store.get_balance(address).map_err(storage),
        }
    }

    /// Walks the block's transactions in order against a scratch copy of the
    /// touched balances. Nothing reaches the store from here.
    fn plan_balances(&self, block: &Block) -> Result<BalancePlan> {
        let height = block.id();
        let mut balances: HashMap<Address, u64> = HashMap::new();
        let mut index = Vec::with_capacity(block.transactions.len());
        let mut history = Vec::with_capacity(block.transactions.len() * 2);

        for tx in &block.transactions {
            let id = tx.identity_hash()?;
            if let Some(existing) = self.store.lookup_transaction(&id).map_err(storage)? {
                return Err(ChainError::DuplicateTransaction(format!(
                    "{} already in block {existing}",
                    hash_to_hex(&id)
                )));
            }

            if let Some(sender) = tx.sender() {
                let total = tx
                    .total_debit()
                    .ok_or(ChainError::BalanceOverflow(sender))?;
                let available = self.load_balance(&balances, &sender)?;
                if available < total {
                    return Err(ChainError::InsufficientBalance {
                        address: sender,
                        needed: total,
                        available,
                    });
                }
                balances.insert(sender, available - total);
                history.push((sender, id));
            }

            let to = tx.to();
            let credited = self
                .load_balance(&balances, &to)?
                .checked_add(tx.amount())
                .ok_or(ChainError::BalanceOverflow(to))?;
            balances.insert(to, credited);
            if tx.sender() != Some(to) {
                history.push((to, id));
            }
            index.push((id, height));
        }

        debug!(height, accounts = balances.len(), "balances checked");
        Ok(BalancePlan {
            balances,
            index,
            history,
        })
    }

    /// Reverts the tip block and returns the new summary.
    pub fn rollback_tip(&self) -> Result<ChainSummary> {
        let _writer = self.writer.lock();
        let view = self.view.read().clone();
        let height = view.summary.height;
        if height == 0 {
            return Err(ChainError::InvalidHeight { height, tip: 0 });
        }
        let block = self
            .store
            .get_block(height)
            .map_err(storage)?
            .ok_or(ChainError::UnknownBlock(height))?;

        let mut balances: HashMap<Address, u64> = HashMap::new();
        let mut unindex = Vec::with_capacity(block.transactions.len());
        let mut history_remove = Vec::new();
        for tx in block.transactions.iter().rev() {
            let id = tx.identity_hash()?;
            let to = tx.to();
            let held = self.load_balance(&balances, &to)?;
            let debited = held
                .checked_sub(tx.amount())
                .ok_or(ChainError::InsufficientBalance {
                    address: to,
                    needed: tx.amount(),
                    available: held,
                })?;
            balances.insert(to, debited);
            history_remove.push((to, id));

            if let Some(sender) = tx.sender() {
                let total = tx
                    .total_debit()
                    .ok_or(ChainError::BalanceOverflow(sender))?;
                let restored = self
                    .load_balance(&balances, &sender)?
                    .checked_add(total)
                    .ok_or(ChainError::BalanceOverflow(sender))?;
                balances.insert(sender, restored);
                history_remove.push((sender, id));
            }
            unindex.push(id);
        }

        let (tip_hash, refill) = if height > 1 {
            let previous = self
                .store
                .get_block(height - 1)
                .map_err(storage)?
                .ok_or(ChainError::UnknownBlock(height - 1))?;
            let capacity = view.controller.capacity() as u64;
            let refill = if height > capacity {
                let h = height - capacity;
                let b = self
                    .store
                    .get_block(h)
                    .map_err(storage)?
                    .ok_or(ChainError::UnknownBlock(h))?;
                Some(b.header.stamp())
            } else {
                None
            };
            (previous.hash(), refill)
        } else {
            (NULL_HASH, None)
        };

        let mut controller = view.controller.clone();
        controller.pop(refill);
        let summary = ChainSummary {
            height: height - 1,
            total_work: remove_work(&view.summary.total_work, block.header.difficulty),
            difficulty: controller.next_difficulty(),
        };
        let batch = StoreBatch {
            remove_block: Some(height),
            balances: balances.into_iter().collect(),
            unindex,
            history_remove,
            summary: Some(summary.clone()),
            ..StoreBatch::default()
        };
        {
            let mut guard = self.view.write();
            self.store.commit(&batch).map_err(storage)?;
            *guard = ChainView {
                summary: summary.clone(),
                tip_hash,
                controller,
            };
        }
        info!(
            height = summary.height,
            removed = %hash_to_hex(&block.hash()),
            "tip rolled back"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::difficulty::work;
    use crate::store::MemoryStore;
    use crate::test_support::mine;
    use crate::transaction::Transaction;

    const SUBSIDY: u64 = 50;

    fn params() -> ConsensusParams {
        ConsensusParams {
            lookback: 4,
            desired_block_time_secs: 90,
            min_difficulty: 1,
            max_difficulty: 12,
            initial_difficulty: 4,
            max_transactions_per_block: 16,
            initial_subsidy: SUBSIDY,
            median_time_span: 3,
            ..ConsensusParams::default()
        }
    }

    fn keys(seed: u8) -> KeyPair {
        KeyPair::from_secret_bytes(&[seed; 32]).unwrap()
    }

    fn ledger() -> Ledger<MemoryStore> {
        Ledger::open(Arc::new(MemoryStore::new()), params()).unwrap()
    }

    fn next_block(ledger: &Ledger<MemoryStore>, miner: Address, txs: Vec<Transaction>) -> Block {
        let height = ledger.height() + 1;
        let timestamp = 1_600_000_000 + height * 90;
        let mut all = vec![Transaction::reward(miner, SUBSIDY, timestamp)];
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

    #[test]
    fn end_to_end_transfer() {
        let ledger = ledger();
        let (a, b, miner) = (keys(1), keys(2), keys(3));
        ledger.allocate_genesis(&[(a.address(), 100)]).unwrap();

        let before = ledger.summary();
        let tx = Transaction::signed(b.address(), 30, 1, 1_600_000_000, &a);
        let block = next_block(&ledger, miner.address(), vec![tx.clone()]);
        let after = ledger.apply_block(&block).unwrap();

        assert_eq!(ledger.balance(&a.address()).unwrap(), 69);
        assert_eq!(ledger.balance(&b.address()).unwrap(), 30);
        assert_eq!(ledger.balance(&miner.address()).unwrap(), SUBSIDY);
        assert_eq!(after.height, before.height + 1);
        assert_eq!(
            after.total_work,
            &before.total_work + work(block.header.difficulty)
        );
        assert_eq!(ledger.tip_hash(), block.hash());

        let id = tx.identity_hash().unwrap();
        assert_eq!(ledger.transaction_height(&id).unwrap(), Some(1));
        assert_eq!(ledger.wallet_history(&a.address()).unwrap(), vec![id]);
        assert_eq!(ledger.wallet_history(&b.address()).unwrap(), vec![id]);
        assert_eq!(ledger.block(1).unwrap(), block);
    }

    #[test]
    fn overdraft_leaves_balances_untouched() {
        let ledger = ledger();
        let (a, b, c, miner) = (keys(1), keys(2), keys(4), keys(3));
        ledger
            .allocate_genesis(&[(a.address(), 100), (c.address(), 5)])
            .unwrap();

        let ok = Transaction::signed(b.address(), 40, 1, 1, &a);
        let overdraw = Transaction::signed(b.address(), 10, 0, 2, &c);
        let block = next_block(&ledger, miner.address(), vec![ok, overdraw]);

        let err = ledger.apply_block(&block).unwrap_err();
        assert!(matches!(
            err,
            ChainError::InsufficientBalance {
                needed: 10,
                available: 5,
                ..
            }
        ));
        let addrs = [a.address(), b.address(), c.address(), miner.address()];
        assert_eq!(ledger.balances(&addrs).unwrap(), vec![100, 0, 5, 0]);
        assert_eq!(ledger.height(), 0);
        assert_eq!(ledger.store().block_count(), 0);
    }

    #[test]
    fn sequential_debits_see_earlier_ones() {
        let ledger = ledger();
        let (a, b, miner) = (keys(1), keys(2), keys(3));
        ledger.allocate_genesis(&[(a.address(), 50)]).unwrap();
        let first = Transaction::signed(b.address(), 30, 0, 1, &a);
        let second = Transaction::signed(b.address(), 30, 0, 2, &a);
        let block = next_block(&ledger, miner.address(), vec![first, second]);
        assert!(matches!(
            ledger.apply_block(&block),
            Err(ChainError::InsufficientBalance { available: 20, .. })
        ));
        assert_eq!(ledger.balance(&a.address()).unwrap(), 50);
    }

    #[test]
    fn miner_can_spend_reward_in_same_block() {
        let ledger = ledger();
        let (miner, b) = (keys(3), keys(2));
        let spend = Transaction::signed(b.address(), 45, 5, 1, &miner);
        let block = next_block(&ledger, miner.address(), vec![spend]);
        ledger.apply_block(&block).unwrap();
        assert_eq!(ledger.balance(&miner.address()).unwrap(), 0);
        assert_eq!(ledger.balance(&b.address()).unwrap(), 45);
    }

    #[test]
    fn credit_overflow_is_rejected() {
        let ledger = ledger();
        let (a, b, miner) = (keys(1), keys(2), keys(3));
        ledger
            .allocate_genesis(&[(a.address(), u64::MAX), (b.address(), 1)])
            .unwrap();
        let tx = Transaction::signed(a.address(), 1, 0, 1, &b);
        let block = next_block(&ledger, miner.address(), vec![tx]);
        assert!(matches!(
            ledger.apply_block(&block),
            Err(ChainError::BalanceOverflow(addr)) if addr == a.address()
        ));
        assert_eq!(ledger.balance(&b.address()).unwrap(), 1);
        assert!(matches!(
            ledger.allocate_genesis(&[(a.address(), 1)]),
            Err(ChainError::BalanceOverflow(_))
        ));
    }

    #[test]
    fn replayed_transaction_is_rejected() {
        let ledger = ledger();
        let (a, b, miner) = (keys(1), keys(2), keys(3));
        ledger.allocate_genesis(&[(a.address(), 100)]).unwrap();
        let tx = Transaction::signed(b.address(), 10, 0, 1, &a);
        ledger
            .apply_block(&next_block(&ledger, miner.address(), vec![tx.clone()]))
            .unwrap();
        let replay = next_block(&ledger, miner.address(), vec![tx]);
        assert!(matches!(
            ledger.apply_block(&replay),
            Err(ChainError::DuplicateTransaction(_))
        ));
        assert_eq!(ledger.balance(&a.address()).unwrap(), 90);
    }

    #[test]
    fn stale_link_is_rejected() {
        let ledger = ledger();
        let miner = keys(3);
        let first = next_block(&ledger, miner.address(), vec![]);
        ledger.apply_block(&first).unwrap();
        ledger
            .apply_block(&next_block(&ledger, miner.address(), vec![]))
            .unwrap();

        // Points at block 1 but claims height 3.
        let mut stale = next_block(&ledger, miner.address(), vec![]);
        stale.header.previous_hash = first.hash();
        let stale = mine(stale);
        assert!(matches!(
            ledger.apply_block(&stale),
            Err(ChainError::ChainLinkMismatch(_))
        ));

        // Reapplying block 2's slot on top of block 2.
        let mut again = next_block(&ledger, miner.address(), vec![]);
        again.header.id = 2;
        again.header.previous_hash = first.hash();
        let again = mine(again);
        assert!(matches!(
            ledger.apply_block(&again),
            Err(ChainError::ChainLinkMismatch(_))
        ));
    }

    #[test]
    fn lower_declared_difficulty_is_rejected() {
        let ledger = ledger();
        let miner = keys(3);
        let mut block = next_block(&ledger, miner.address(), vec![]);
        block.header.difficulty = ledger.required_difficulty() - 1;
        let block = mine(block);
        assert!(crate::pow::meets_difficulty(&block.hash(), block.header.difficulty));
        assert!(matches!(
            ledger.apply_block(&block),
            Err(ChainError::DifficultyMismatch { .. })
        ));
    }

    #[test]
    fn rollback_restores_previous_state() {
        let ledger = ledger();
        let (a, b, miner) = (keys(1), keys(2), keys(3));
        ledger.allocate_genesis(&[(a.address(), 100)]).unwrap();
        let first = next_block(&ledger, miner.address(), vec![]);
        ledger.apply_block(&first).unwrap();
        let after_first = ledger.summary();

        let tx = Transaction::signed(b.address(), 30, 2, 1, &a);
        let second = next_block(&ledger, miner.address(), vec![tx.clone()]);
        ledger.apply_block(&second).unwrap();

        let summary = ledger.rollback_tip().unwrap();
        assert_eq!(summary, after_first);
        assert_eq!(ledger.tip_hash(), first.hash());
        let addrs = [a.address(), b.address(), miner.address()];
        assert_eq!(ledger.balances(&addrs).unwrap(), vec![100, 0, SUBSIDY]);
        let id = tx.identity_hash().unwrap();
        assert_eq!(ledger.transaction_height(&id).unwrap(), None);
        assert!(ledger.wallet_history(&a.address()).unwrap().is_empty());
        assert!(matches!(
            ledger.block(2),
            Err(ChainError::InvalidHeight { height: 2, tip: 1 })
        ));

        // The same block applies again cleanly.
        ledger.apply_block(&second).unwrap();
        assert_eq!(ledger.balance(&b.address()).unwrap(), 30);

        ledger.rollback_tip().unwrap();
        ledger.rollback_tip().unwrap();
        assert_eq!(ledger.height(), 0);
        assert_eq!(ledger.tip_hash(), NULL_HASH);
        assert!(matches!(
            ledger.rollback_tip(),
            Err(ChainError::InvalidHeight { .. })
        ));
    }

    #[test]
    fn genesis_allocation_only_on_empty_chain() {
        let ledger = ledger();
        let a = keys(1);
        ledger.allocate_genesis(&[(a.address(), 10), (a.address(), 5)]).unwrap();
        assert_eq!(ledger.balance(&a.address()).unwrap(), 15);
        ledger
            .apply_block(&next_block(&ledger, keys(3).address(), vec![]))
            .unwrap();
        assert!(matches!(
            ledger.allocate_genesis(&[(a.address(), 1)]),
            Err(ChainError::InvalidHeight { .. })
        ));
    }

    #[test]
    fn check_block_does_not_commit() {
        let ledger = ledger();
        let block = next_block(&ledger, keys(3).address(), vec![]);
        ledger.check_block(&block).unwrap();
        assert_eq!(ledger.height(), 0);
        ledger.apply_block(&block).unwrap();
        assert_eq!(ledger.height(), 1);
    }

    #[test]
    fn bounded_wait_reports_busy_writer() {
        let ledger = ledger();
        let block = next_block(&ledger, keys(3).address(), vec![]);
        let _held = ledger.writer.lock();
        assert!(matches!(
            ledger.apply_block_within(&block, Duration::from_millis(20)),
            Err(ChainError::WriterBusy)
        ));
    }

    /// Delegates to a [`MemoryStore`] but can be told to fail every commit.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_commit: std::sync::atomic::AtomicBool,
    }

    impl ChainStore for FlakyStore {
        fn put_block(&self, block: &Block) -> anyhow::Result<()> {
            self.inner.put_block(block)
        }
        fn get_block(&self, height: u64) -> anyhow::Result<Option<Block>> {
            self.inner.get_block(height)
        }
        fn remove_block(&self, height: u64) -> anyhow::Result<()> {
            self.inner.remove_block(height)
        }
        fn index_transaction(&self, tx_id: &Hash, height: u64) -> anyhow::Result<()> {
            self.inner.index_transaction(tx_id, height)
        }
        fn unindex_transaction(&self, tx_id: &Hash) -> anyhow::Result<()> {
            self.inner.unindex_transaction(tx_id)
        }
        fn lookup_transaction(&self, tx_id: &Hash) -> anyhow::Result<Option<u64>> {
            self.inner.lookup_transaction(tx_id)
        }
        fn get_balance(&self, address: &Address) -> anyhow::Result<u64> {
            self.inner.get_balance(address)
        }
        fn set_balance(&self, address: &Address, amount: u64) -> anyhow::Result<()> {
            self.inner.set_balance(address, amount)
        }
        fn append_wallet_history(&self, address: &Address, tx_id: &Hash) -> anyhow::Result<()> {
            self.inner.append_wallet_history(address, tx_id)
        }
        fn remove_wallet_history(&self, address: &Address, tx_id: &Hash) -> anyhow::Result<()> {
            self.inner.remove_wallet_history(address, tx_id)
        }
        fn wallet_history(&self, address: &Address) -> anyhow::Result<Vec<Hash>> {
            self.inner.wallet_history(address)
        }
        fn get_chain_summary(&self) -> anyhow::Result<Option<ChainSummary>> {
            self.inner.get_chain_summary()
        }
        fn set_chain_summary(&self, summary: &ChainSummary) -> anyhow::Result<()> {
            self.inner.set_chain_summary(summary)
        }
        fn commit(&self, batch: &StoreBatch) -> anyhow::Result<()> {
            if self.fail_commit.load(std::sync::atomic::Ordering::SeqCst) {
                anyhow::bail!("disk full");
            }
            self.inner.commit(batch)
        }
    }

    #[test]
    fn storage_failure_is_retryable_and_leaves_tip() {
        use std::sync::atomic::Ordering;

        let store = Arc::new(FlakyStore::default());
        let ledger = Ledger::open(store.clone(), params()).unwrap();
        let miner = keys(3);
        let height = ledger.height() + 1;
        let timestamp = 1_600_000_000 + 90;
        let block = mine(
            Block::new(
                height,
                ledger.tip_hash(),
                timestamp,
                ledger.required_difficulty(),
                vec![Transaction::reward(miner.address(), SUBSIDY, timestamp)],
            )
            .unwrap(),
        );

        store.fail_commit.store(true, Ordering::SeqCst);
        let err = ledger.apply_block(&block).unwrap_err();
        assert!(matches!(err, ChainError::StorageUnavailable(_)));
        assert!(err.is_retryable());
        assert_eq!(ledger.height(), 0);
        assert_eq!(ledger.tip_hash(), NULL_HASH);
        assert_eq!(ledger.balance(&miner.address()).unwrap(), 0);

        store.fail_commit.store(false, Ordering::SeqCst);
        ledger.apply_block(&block).unwrap();
        assert_eq!(ledger.balance(&miner.address()).unwrap(), SUBSIDY);
    }

    #[test]
    fn reopen_rebuilds_view_from_store() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::open(store.clone(), params()).unwrap();
        let miner = keys(3);
        for _ in 0..6 {
            ledger
                .apply_block(&next_block(&ledger, miner.address(), vec![]))
                .unwrap();
        }
        let summary = ledger.summary();
        let tip = ledger.tip_hash();
        drop(ledger);

        let reopened = Ledger::open(store, params()).unwrap();
        assert_eq!(reopened.summary(), summary);
        assert_eq!(reopened.tip_hash(), tip);
        assert_eq!(reopened.balance(&miner.address()).unwrap(), 6 * SUBSIDY);
        reopened
            .apply_block(&next_block(&reopened, miner.address(), vec![]))
            .unwrap();
        assert_eq!(reopened.height(), 7);
    }

    #[test]
    fn reopen_with_narrower_bounds_clamps_required_difficulty() {
        let store = Arc::new(MemoryStore::new());
        let wide = ConsensusParams {
            initial_difficulty: 6,
            ..params()
        };
        let ledger = Ledger::open(store.clone(), wide).unwrap();
        let miner = keys(3);
        for _ in 0..5 {
            ledger
                .apply_block(&next_block(&ledger, miner.address(), vec![]))
                .unwrap();
        }
        assert_eq!(ledger.required_difficulty(), 6);
        drop(ledger);

        let narrow = ConsensusParams {
            max_difficulty: 4,
            ..params()
        };
        let reopened = Ledger::open(store, narrow).unwrap();
        assert_eq!(reopened.height(), 5);
        assert_eq!(reopened.required_difficulty(), 4);
        reopened
            .apply_block(&next_block(&reopened, miner.address(), vec![]))
            .unwrap();
    }

    #[test]
    fn lookups_outside_chain_are_invalid_height() {
        let ledger = ledger();
        assert!(matches!(
            ledger.block(0),
            Err(ChainError::InvalidHeight { height: 0, tip: 0 })
        ));
        assert!(matches!(
            ledger.block(1),
            Err(ChainError::InvalidHeight { height: 1, tip: 0 })
        ));
    }
}
