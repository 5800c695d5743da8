use anyhow::{anyhow, Context, Result};
use chain_core::store::{ChainStore, ChainSummary, StoreBatch};
use chain_core::{Address, Block, Hash};
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::{Db, IVec, Transactional, Tree};
use std::path::Path;
use tracing::{debug, info};

const TREE_BLOCKS: &str = "blocks";
const TREE_TX_INDEX: &str = "transaction_to_block";
const TREE_LEDGER: &str = "ledger";
const TREE_HISTORY: &str = "wallet_to_transaction";
const TREE_INFO: &str = "info";
const KEY_SUMMARY: &[u8] = b"summary";

/// Chain state on disk. Every tree is keyed by fixed-width big-endian bytes so
/// iteration order matches height order.
#[derive(Clone)]
pub struct SledStore {
  db: Db,
  blocks: Tree,
  tx_index: Tree,
  ledger: Tree,
  history: Tree,
  info: Tree,
}

fn decode_u64(bytes: &[u8]) -> Result<u64> {
  let arr: [u8; 8] = bytes
    .try_into()
    .map_err(|_| anyhow!("expected 8 bytes, found {}", bytes.len()))?;
  Ok(u64::from_be_bytes(arr))
}

/// Wallet history is stored as concatenated 32-byte transaction ids.
fn decode_history(bytes: &[u8]) -> Vec<Hash> {
  bytes
    .chunks_exact(32)
    .map(|chunk| {
      let mut id = [0u8; 32];
      id.copy_from_slice(chunk);
      id
    })
    .collect()
}

fn encode_history(ids: &[Hash]) -> Vec<u8> {
  ids.iter().flat_map(|id| id.iter().copied()).collect()
}

fn encode_block(block: &Block) -> Result<Vec<u8>> {
  serde_json::to_vec(block).with_context(|| format!("encode block {}", block.id()))
}

fn decode_block(height: u64, bytes: &[u8]) -> Result<Block> {
  serde_json::from_slice(bytes).with_context(|| format!("decode block {height}"))
}

fn tx_append_history(
  tree: &TransactionalTree,
  address: &Address,
  tx_id: &Hash,
) -> std::result::Result<(), ConflictableTransactionError<anyhow::Error>> {
  let mut bytes = tree
    .get(address.as_bytes().as_slice())?
    .map(|v| v.to_vec())
    .unwrap_or_default();
  bytes.extend_from_slice(tx_id);
  tree.insert(address.as_bytes().as_slice(), bytes)?;
  Ok(())
}

fn tx_remove_history(
  tree: &TransactionalTree,
  address: &Address,
  tx_id: &Hash,
) -> std::result::Result<(), ConflictableTransactionError<anyhow::Error>> {
  if let Some(bytes) = tree.get(address.as_bytes().as_slice())? {
    let mut ids = decode_history(&bytes);
    ids.retain(|id| id != tx_id);
    tree.insert(address.as_bytes().as_slice(), encode_history(&ids))?;
  }
  Ok(())
}

impl SledStore {
  /// Opens without sled's background flusher. Writers flush explicitly, and
  /// the database lock is released as soon as the last handle drops.
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
    let db = sled::Config::new()
      .path(path.as_ref())
      .flush_every_ms(None)
      .open()
      .with_context(|| format!("open sled database at {}", path.as_ref().display()))?;
    let store = Self {
      blocks: db.open_tree(TREE_BLOCKS)?,
      tx_index: db.open_tree(TREE_TX_INDEX)?,
      ledger: db.open_tree(TREE_LEDGER)?,
      history: db.open_tree(TREE_HISTORY)?,
      info: db.open_tree(TREE_INFO)?,
      db,
    };
    info!(blocks = store.blocks.len(), "sled store opened");
    Ok(store)
  }

  /// Drops every block, balance, index entry and the chain summary.
  pub fn clear(&self) -> Result<()> {
    for tree in [&self.blocks, &self.tx_index, &self.ledger, &self.history, &self.info] {
      tree.clear()?;
    }
    self.db.flush()?;
    info!("sled store cleared");
    Ok(())
  }

  pub fn flush(&self) -> Result<()> {
    self.db.flush()?;
    Ok(())
  }

  pub fn block_count(&self) -> usize {
    self.blocks.len()
  }
}

impl ChainStore for SledStore {
  fn put_block(&self, block: &Block) -> Result<()> {
    if block.id() == 0 {
      return Err(anyhow!("block id 0 is reserved"));
    }
    self
      .blocks
      .insert(block.id().to_be_bytes(), encode_block(block)?)?;
    Ok(())
  }

  fn get_block(&self, height: u64) -> Result<Option<Block>> {
    self
      .blocks
      .get(height.to_be_bytes())?
      .map(|ivec: IVec| decode_block(height, &ivec))
      .transpose()
  }

  fn remove_block(&self, height: u64) -> Result<()> {
    self.blocks.remove(height.to_be_bytes())?;
    Ok(())
  }

  fn index_transaction(&self, tx_id: &Hash, height: u64) -> Result<()> {
    self.tx_index.insert(tx_id, height.to_be_bytes().to_vec())?;
    Ok(())
  }

  fn unindex_transaction(&self, tx_id: &Hash) -> Result<()> {
    self.tx_index.remove(tx_id)?;
    Ok(())
  }

  fn lookup_transaction(&self, tx_id: &Hash) -> Result<Option<u64>> {
    self
      .tx_index
      .get(tx_id)?
      .map(|v| decode_u64(&v))
      .transpose()
  }

  fn get_balance(&self, address: &Address) -> Result<u64> {
    match self.ledger.get(address.as_bytes())? {
      Some(v) => decode_u64(&v).with_context(|| format!("balance of {address}")),
      None => Ok(0),
    }
  }

  fn set_balance(&self, address: &Address, amount: u64) -> Result<()> {
    self
      .ledger
      .insert(address.as_bytes(), amount.to_be_bytes().to_vec())?;
    Ok(())
  }

  fn append_wallet_history(&self, address: &Address, tx_id: &Hash) -> Result<()> {
    let mut ids = self.wallet_history(address)?;
    ids.push(*tx_id);
    self
      .history
      .insert(address.as_bytes(), encode_history(&ids))?;
    Ok(())
  }

  fn remove_wallet_history(&self, address: &Address, tx_id: &Hash) -> Result<()> {
    let mut ids = self.wallet_history(address)?;
    ids.retain(|id| id != tx_id);
    self
      .history
      .insert(address.as_bytes(), encode_history(&ids))?;
    Ok(())
  }

  fn wallet_history(&self, address: &Address) -> Result<Vec<Hash>> {
    Ok(
      self
        .history
        .get(address.as_bytes())?
        .map(|v| decode_history(&v))
        .unwrap_or_default(),
    )
  }

  fn get_chain_summary(&self) -> Result<Option<ChainSummary>> {
    self
      .info
      .get(KEY_SUMMARY)?
      .map(|v| bincode::deserialize(&v).context("decode chain summary"))
      .transpose()
  }

  fn set_chain_summary(&self, summary: &ChainSummary) -> Result<()> {
    self.info.insert(KEY_SUMMARY, bincode::serialize(summary)?)?;
    self.db.flush()?;
    Ok(())
  }

  /// Applies the whole batch in one sled transaction across all trees, then
  /// flushes.
  fn commit(&self, batch: &StoreBatch) -> Result<()> {
    let put_block = match &batch.put_block {
      Some(block) if block.id() == 0 => return Err(anyhow!("block id 0 is reserved")),
      Some(block) => Some((block.id(), encode_block(block)?)),
      None => None,
    };
    let summary = batch
      .summary
      .as_ref()
      .map(bincode::serialize)
      .transpose()?;

    let trees = (
      &self.blocks,
      &self.tx_index,
      &self.ledger,
      &self.history,
      &self.info,
    );
    let result: std::result::Result<(), TransactionError<anyhow::Error>> =
      trees.transaction(|(blocks, tx_index, ledger, history, meta)| {
        for (address, tx_id) in &batch.history_remove {
          tx_remove_history(history, address, tx_id)?;
        }
        for tx_id in &batch.unindex {
          tx_index.remove(tx_id.as_slice())?;
        }
        if let Some(height) = batch.remove_block {
          blocks.remove(&height.to_be_bytes()[..])?;
        }
        if let Some((height, bytes)) = &put_block {
          blocks.insert(&height.to_be_bytes()[..], bytes.as_slice())?;
        }
        for (tx_id, height) in &batch.index {
          tx_index.insert(tx_id.as_slice(), &height.to_be_bytes()[..])?;
        }
        for (address, amount) in &batch.balances {
          ledger.insert(address.as_bytes().as_slice(), &amount.to_be_bytes()[..])?;
        }
        for (address, tx_id) in &batch.history_append {
          tx_append_history(history, address, tx_id)?;
        }
        if let Some(bytes) = &summary {
          meta.insert(KEY_SUMMARY, bytes.as_slice())?;
        }
        Ok(())
      });
    match result {
      Ok(()) => {}
      Err(TransactionError::Abort(err)) => return Err(err),
      Err(TransactionError::Storage(err)) => return Err(err.into()),
    }
    self.db.flush()?;
    debug!(
      balances = batch.balances.len(),
      indexed = batch.index.len(),
      unindexed = batch.unindex.len(),
      "batch committed"
    );
    Ok(())
  }
}
