//! In-memory LRU cache for recent chain data.
//!
//! Sits in front of SQLite for point lookups. Entries are populated after a
//! successful commit and evicted when a height is deleted or overwritten.

use std::num::NonZeroUsize;
use std::sync::Arc;

use alloy_primitives::B256;
use chainidx_primitives::{StoredBlock, StoredReceipt, StoredTransaction, TxLocation};
use lru::LruCache;
use parking_lot::RwLock;
use serde::Deserialize;

/// Default number of blocks to cache.
const DEFAULT_BLOCK_CACHE_SIZE: usize = 256;
/// Default number of transactions to cache.
const DEFAULT_TX_CACHE_SIZE: usize = 8192;
/// Default number of receipts to cache.
const DEFAULT_RECEIPT_CACHE_SIZE: usize = 8192;

/// Configuration for the chain cache.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Number of blocks to cache.
    #[serde(default = "CacheConfig::default_block_cache_size")]
    pub block_cache_size: usize,
    /// Number of transactions to cache.
    #[serde(default = "CacheConfig::default_tx_cache_size")]
    pub tx_cache_size: usize,
    /// Number of receipts to cache.
    #[serde(default = "CacheConfig::default_receipt_cache_size")]
    pub receipt_cache_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            block_cache_size: DEFAULT_BLOCK_CACHE_SIZE,
            tx_cache_size: DEFAULT_TX_CACHE_SIZE,
            receipt_cache_size: DEFAULT_RECEIPT_CACHE_SIZE,
        }
    }
}

impl CacheConfig {
    const fn default_block_cache_size() -> usize {
        DEFAULT_BLOCK_CACHE_SIZE
    }

    const fn default_tx_cache_size() -> usize {
        DEFAULT_TX_CACHE_SIZE
    }

    const fn default_receipt_cache_size() -> usize {
        DEFAULT_RECEIPT_CACHE_SIZE
    }
}

fn capacity(size: usize) -> NonZeroUsize {
    NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN)
}

/// Cached watermarks; `None` means no block has reached that stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Watermarks {
    /// Highest contiguous height with primary data.
    pub raw: Option<u64>,
    /// Highest contiguous height with primary and secondary data.
    pub indexed: Option<u64>,
}

/// In-memory LRU cache for chain data.
pub struct ChainCache {
    /// Blocks by number.
    blocks_by_number: RwLock<LruCache<u64, Arc<StoredBlock>>>,
    /// Block number by hash.
    block_number_by_hash: RwLock<LruCache<B256, u64>>,
    /// Transactions with their location by hash.
    transactions: RwLock<LruCache<B256, Arc<(StoredTransaction, TxLocation)>>>,
    /// Receipts by transaction hash.
    receipts: RwLock<LruCache<B256, Arc<StoredReceipt>>>,
    watermarks: RwLock<Watermarks>,
}

impl ChainCache {
    /// Create a new cache with the given configuration.
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            blocks_by_number: RwLock::new(LruCache::new(capacity(config.block_cache_size))),
            block_number_by_hash: RwLock::new(LruCache::new(capacity(config.block_cache_size))),
            transactions: RwLock::new(LruCache::new(capacity(config.tx_cache_size))),
            receipts: RwLock::new(LruCache::new(capacity(config.receipt_cache_size))),
            watermarks: RwLock::new(Watermarks::default()),
        }
    }

    /// Create a cache with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(&CacheConfig::default())
    }

    pub fn watermarks(&self) -> Watermarks {
        *self.watermarks.read()
    }

    pub fn set_watermarks(&self, watermarks: Watermarks) {
        *self.watermarks.write() = watermarks;
    }

    /// Insert a block into the cache.
    pub fn insert_block(&self, block: StoredBlock) {
        let number = block.number;
        let hash = block.hash;
        self.blocks_by_number.write().put(number, Arc::new(block));
        self.block_number_by_hash.write().put(hash, number);
    }

    /// Get a block by number.
    pub fn get_block_by_number(&self, number: u64) -> Option<Arc<StoredBlock>> {
        self.blocks_by_number.write().get(&number).cloned()
    }

    /// Get a block by hash.
    pub fn get_block_by_hash(&self, hash: B256) -> Option<Arc<StoredBlock>> {
        let number = self.block_number_by_hash.write().get(&hash).copied()?;
        self.get_block_by_number(number)
    }

    /// Get block number by hash.
    pub fn get_block_number_by_hash(&self, hash: B256) -> Option<u64> {
        self.block_number_by_hash.write().get(&hash).copied()
    }

    pub fn insert_transaction(&self, tx: StoredTransaction, location: TxLocation) {
        let hash = tx.hash;
        self.transactions.write().put(hash, Arc::new((tx, location)));
    }

    pub fn get_transaction(&self, hash: B256) -> Option<Arc<(StoredTransaction, TxLocation)>> {
        self.transactions.write().get(&hash).cloned()
    }

    /// Insert a receipt into the cache.
    pub fn insert_receipt(&self, receipt: StoredReceipt) {
        let hash = receipt.transaction_hash;
        self.receipts.write().put(hash, Arc::new(receipt));
    }

    /// Get a receipt by transaction hash.
    pub fn get_receipt(&self, tx_hash: B256) -> Option<Arc<StoredReceipt>> {
        self.receipts.write().get(&tx_hash).cloned()
    }

    /// Drop everything cached for a height that was deleted or overwritten.
    pub fn evict_height(&self, number: u64, transaction_hashes: &[B256]) {
        if let Some(block) = self.blocks_by_number.write().pop(&number) {
            self.block_number_by_hash.write().pop(&block.hash);
        }
        let mut transactions = self.transactions.write();
        let mut receipts = self.receipts.write();
        for hash in transaction_hashes {
            transactions.pop(hash);
            receipts.pop(hash);
        }
    }

    /// Clear all cached data.
    pub fn clear(&self) {
        self.blocks_by_number.write().clear();
        self.block_number_by_hash.write().clear();
        self.transactions.write().clear();
        self.receipts.write().clear();
        *self.watermarks.write() = Watermarks::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes};

    fn make_test_block(number: u64) -> StoredBlock {
        StoredBlock {
            number,
            hash: B256::from([number as u8; 32]),
            parent_hash: B256::from([(number.saturating_sub(1)) as u8; 32]),
            state_root: B256::ZERO,
            transactions_root: B256::ZERO,
            receipts_root: B256::ZERO,
            timestamp: 1000 + number,
            miner: Address::ZERO,
            gas_limit: 30_000_000,
            gas_used: 21000 * number,
            base_fee_per_gas: None,
            blob_gas_used: None,
            excess_blob_gas: None,
            extra_data: Bytes::new(),
            transaction_hashes: vec![],
            uncles: vec![],
        }
    }

    #[test]
    fn test_block_cache() {
        let cache = ChainCache::with_defaults();

        let block = make_test_block(1);
        let hash = block.hash;
        cache.insert_block(block);

        assert!(cache.get_block_by_number(1).is_some());
        assert!(cache.get_block_by_hash(hash).is_some());
        assert!(cache.get_block_by_number(2).is_none());
    }

    #[test]
    fn test_evict_height_removes_hash_mapping() {
        let cache = ChainCache::with_defaults();
        let block = make_test_block(4);
        let hash = block.hash;
        cache.insert_block(block);

        cache.evict_height(4, &[]);

        assert!(cache.get_block_by_number(4).is_none());
        assert!(cache.get_block_number_by_hash(hash).is_none());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache = ChainCache::new(&CacheConfig {
            block_cache_size: 0,
            tx_cache_size: 0,
            receipt_cache_size: 0,
        });
        cache.insert_block(make_test_block(1));
        assert!(cache.get_block_by_number(1).is_some());
    }
}
