//! SQLite implementation of the chain store.
//!
//! Uses a connection pool (r2d2) for concurrent reads and a dedicated writer
//! connection for serialized writes. SQLite WAL mode lets readers proceed
//! without blocking the writer and vice versa. Each height is written in one
//! SQLite transaction, so a reader never observes a block without the
//! secondary rows committed with it.

mod read;
mod scan;
mod write;


use std::collections::BTreeMap;
use std::path::Path;

use alloy_primitives::B256;
use chainidx_primitives::{
    BlockBundle, StoredBlock, StoredLog, StoredReceipt, StoredTransaction, TxLocation,
};
use parking_lot::Mutex;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};

use crate::batch::IndexBatch;
use crate::cache::{CacheConfig, ChainCache, Watermarks};
use crate::capabilities::{
    AddressIndexReader, AggregateCounters, BalanceHistoryReader, ConsensusReader,
    ContractIndexReader, ContractVerificationWriter, EnabledIndexes, IndexCapabilities,
    InternalTransactionReader, SetCodeReader, SystemEventReader, TokenTransferReader,
};
use crate::codec::{b256_column, json_column};
use crate::error::{StoreError, StoreResult};
use crate::schema::{configure_connection, SCHEMA};
use crate::traits::{ChainStore, IndexWriter};
use write::BlockWrite;

const DEFAULT_READ_POOL_SIZE: u32 = 4;

/// Tuning for [`SqliteChainStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub cache: CacheConfig,
    pub read_pool_size: u32,
    pub indexes: EnabledIndexes,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            read_pool_size: DEFAULT_READ_POOL_SIZE,
            indexes: EnabledIndexes::default(),
        }
    }
}

/// Chain store backed by SQLite.
pub struct SqliteChainStore {
    /// Connection pool for read operations (concurrent).
    read_pool: Pool<SqliteConnectionManager>,
    /// Dedicated connection for write operations (serialized).
    writer: Mutex<Connection>,
    cache: ChainCache,
    indexes: EnabledIndexes,
}

impl SqliteChainStore {
    /// Open (or create) an on-disk store.
    pub fn open(db_path: impl AsRef<Path>, options: StoreOptions) -> StoreResult<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        }

        let writer = Connection::open(db_path)?;
        configure_connection(&writer)?;
        writer.execute_batch(SCHEMA)?;

        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .with_init(|conn| configure_connection(conn));
        let read_pool = Pool::builder()
            .max_size(options.read_pool_size.max(1))
            .build(manager)?;

        let store = Self {
            read_pool,
            writer: Mutex::new(writer),
            cache: ChainCache::new(&options.cache),
            indexes: options.indexes,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Create an in-memory store for testing.
    ///
    /// In-memory SQLite DBs are per-connection, so all connections share one
    /// named database through a shared-cache URI.
    pub fn in_memory() -> StoreResult<Self> {
        Self::in_memory_with(StoreOptions::default())
    }

    pub fn in_memory_with(options: StoreOptions) -> StoreResult<Self> {
        let uri = format!("file:chainidx_{}?mode=memory&cache=shared", unique_id());
        let writer = Connection::open(&uri)?;
        configure_connection(&writer)?;
        writer.execute_batch(SCHEMA)?;

        let manager =
            SqliteConnectionManager::file(&uri).with_init(|conn| configure_connection(conn));
        let read_pool = Pool::builder().max_size(2).build(manager)?;

        Ok(Self {
            read_pool,
            writer: Mutex::new(writer),
            cache: ChainCache::new(&options.cache),
            indexes: options.indexes,
        })
    }

    /// Load watermarks from the metadata table into the cache.
    pub fn initialize(&self) -> StoreResult<()> {
        let watermarks = self.load_watermarks()?;
        self.cache.set_watermarks(watermarks);
        match watermarks.indexed {
            Some(indexed) => tracing::info!(
                indexed,
                raw = ?watermarks.raw,
                "Chain store initialized"
            ),
            None => tracing::info!("Chain store initialized (empty)"),
        }
        Ok(())
    }

    /// Get direct access to the cache.
    pub fn cache(&self) -> &ChainCache {
        &self.cache
    }

    pub fn enabled_indexes(&self) -> EnabledIndexes {
        self.indexes
    }

    fn read_conn(&self) -> StoreResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.read_pool.get()?)
    }

    fn load_watermarks(&self) -> StoreResult<Watermarks> {
        let conn = self.read_conn()?;
        Ok(Watermarks {
            raw: write::read_meta(&conn, write::META_RAW_HEIGHT)?,
            indexed: write::read_meta(&conn, write::META_INDEXED_HEIGHT)?,
        })
    }

    fn watermarks(&self) -> StoreResult<Watermarks> {
        let cached = self.cache.watermarks();
        if cached.raw.is_some() {
            return Ok(cached);
        }
        self.load_watermarks()
    }

    /// Run `f` inside one writer transaction and publish the resulting
    /// watermarks to the cache after commit.
    fn write<T>(
        &self,
        touched: u64,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        self.write_cached(touched, f, |_, _| {})
    }

    /// Like [`Self::write`], with `cached` applied to the cache while the
    /// writer lock is still held. A concurrent delete can then never put a
    /// removed entry back.
    fn write_cached<T>(
        &self,
        touched: u64,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> StoreResult<T>,
        cached: impl FnOnce(&ChainCache, &T),
    ) -> StoreResult<T> {
        let mut conn = self.writer.lock();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        let watermarks = write::refresh_watermarks(&tx, touched)?;
        tx.commit()?;
        self.cache.set_watermarks(watermarks);
        cached(&self.cache, &value);
        Ok(value)
    }

    fn evict(cache: &ChainCache, number: u64, outcome: &BlockWrite) {
        if let BlockWrite::Replaced(hashes) = outcome {
            cache.evict_height(number, hashes);
        }
    }

    fn load_logs_for_tx(conn: &Connection, tx_hash: B256) -> StoreResult<Vec<StoredLog>> {
        let mut stmt =
            conn.prepare("SELECT body FROM logs WHERE transaction_hash = ? ORDER BY log_index")?;
        let logs = stmt
            .query_map(params![tx_hash.as_slice()], |row| json_column(row, 0))?
            .collect::<rusqlite::Result<Vec<StoredLog>>>()?;
        Ok(logs)
    }
}

impl ChainStore for SqliteChainStore {
    fn latest_height(&self) -> StoreResult<u64> {
        self.watermarks()?.indexed.ok_or(StoreError::EmptyChain)
    }

    fn raw_height(&self) -> StoreResult<u64> {
        self.watermarks()?.raw.ok_or(StoreError::EmptyChain)
    }

    fn get_block(&self, number: u64) -> StoreResult<StoredBlock> {
        if let Some(block) = self.cache.get_block_by_number(number) {
            return Ok((*block).clone());
        }

        let conn = self.read_conn()?;
        let block: StoredBlock = conn
            .query_row(
                "SELECT body FROM blocks WHERE number = ?",
                params![number as i64],
                |row| json_column(row, 0),
            )
            .optional()?
            .ok_or(StoreError::BlockNotFound(number))?;

        self.cache.insert_block(block.clone());
        Ok(block)
    }

    fn get_block_by_hash(&self, hash: B256) -> StoreResult<StoredBlock> {
        if let Some(block) = self.cache.get_block_by_hash(hash) {
            return Ok((*block).clone());
        }
        let number = self.get_block_number(hash)?;
        self.get_block(number)
    }

    fn get_block_number(&self, hash: B256) -> StoreResult<u64> {
        if let Some(n) = self.cache.get_block_number_by_hash(hash) {
            return Ok(n);
        }

        let conn = self.read_conn()?;
        let number: i64 = conn
            .query_row(
                "SELECT number FROM blocks WHERE hash = ?",
                params![hash.as_slice()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StoreError::BlockHashNotFound(hash))?;
        Ok(number as u64)
    }

    fn get_blocks(&self, start: u64, end: u64) -> StoreResult<Vec<StoredBlock>> {
        if start > end {
            return Err(StoreError::InvalidInput(format!(
                "block range start {start} is after end {end}"
            )));
        }

        let conn = self.read_conn()?;
        let mut stmt =
            conn.prepare("SELECT body FROM blocks WHERE number BETWEEN ? AND ? ORDER BY number")?;
        let blocks = stmt
            .query_map(params![start as i64, end as i64], |row| json_column(row, 0))?
            .collect::<rusqlite::Result<Vec<StoredBlock>>>()?;
        Ok(blocks)
    }

    fn get_block_transactions(&self, number: u64) -> StoreResult<Vec<StoredTransaction>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(
            "SELECT body FROM transactions WHERE block_number = ? ORDER BY transaction_index",
        )?;
        let transactions = stmt
            .query_map(params![number as i64], |row| json_column(row, 0))?
            .collect::<rusqlite::Result<Vec<StoredTransaction>>>()?;
        Ok(transactions)
    }

    fn get_transaction(&self, hash: B256) -> StoreResult<(StoredTransaction, TxLocation)> {
        if let Some(entry) = self.cache.get_transaction(hash) {
            return Ok((*entry).clone());
        }

        let conn = self.read_conn()?;
        let entry = conn
            .query_row(
                "SELECT body, block_number, block_hash, transaction_index
                 FROM transactions WHERE hash = ?",
                params![hash.as_slice()],
                |row| {
                    let tx: StoredTransaction = json_column(row, 0)?;
                    let block_number: i64 = row.get(1)?;
                    let transaction_index: i64 = row.get(3)?;
                    let location = TxLocation {
                        block_number: block_number as u64,
                        block_hash: b256_column(row, 2)?,
                        transaction_index: transaction_index as u32,
                    };
                    Ok((tx, location))
                },
            )
            .optional()?
            .ok_or(StoreError::TransactionNotFound(hash))?;

        self.cache.insert_transaction(entry.0.clone(), entry.1);
        Ok(entry)
    }

    fn get_receipt(&self, hash: B256) -> StoreResult<StoredReceipt> {
        if let Some(receipt) = self.cache.get_receipt(hash) {
            return Ok((*receipt).clone());
        }

        let conn = self.read_conn()?;
        let mut receipt: StoredReceipt = conn
            .query_row(
                "SELECT body FROM receipts WHERE transaction_hash = ?",
                params![hash.as_slice()],
                |row| json_column(row, 0),
            )
            .optional()?
            .ok_or(StoreError::ReceiptNotFound(hash))?;
        receipt.logs = Self::load_logs_for_tx(&conn, hash)?;

        self.cache.insert_receipt(receipt.clone());
        Ok(receipt)
    }

    fn get_receipts_by_block_number(&self, number: u64) -> StoreResult<Vec<StoredReceipt>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(
            "SELECT body FROM receipts WHERE block_number = ? ORDER BY transaction_index",
        )?;
        let mut receipts = stmt
            .query_map(params![number as i64], |row| json_column(row, 0))?
            .collect::<rusqlite::Result<Vec<StoredReceipt>>>()?;

        let mut logs: BTreeMap<B256, Vec<StoredLog>> = BTreeMap::new();
        for log in self.get_logs_by_block(number)? {
            logs.entry(log.transaction_hash).or_default().push(log);
        }
        for receipt in &mut receipts {
            receipt.logs = logs.remove(&receipt.transaction_hash).unwrap_or_default();
        }
        Ok(receipts)
    }

    fn get_logs_by_block(&self, number: u64) -> StoreResult<Vec<StoredLog>> {
        let conn = self.read_conn()?;
        let mut stmt =
            conn.prepare("SELECT body FROM logs WHERE block_number = ? ORDER BY log_index")?;
        let logs = stmt
            .query_map(params![number as i64], |row| json_column(row, 0))?
            .collect::<rusqlite::Result<Vec<StoredLog>>>()?;
        Ok(logs)
    }

    fn has_block(&self, number: u64) -> StoreResult<bool> {
        if self.cache.get_block_by_number(number).is_some() {
            return Ok(true);
        }
        let conn = self.read_conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM blocks WHERE number = ?",
                params![number as i64],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn has_transaction(&self, hash: B256) -> StoreResult<bool> {
        let conn = self.read_conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM transactions WHERE hash = ?",
                params![hash.as_slice()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn has_receipt(&self, hash: B256) -> StoreResult<bool> {
        let conn = self.read_conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM receipts WHERE transaction_hash = ?",
                params![hash.as_slice()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn set_block(&self, block: &StoredBlock) -> StoreResult<()> {
        self.write_cached(
            block.number,
            |tx| write::upsert_block(tx, block),
            |cache, outcome| {
                Self::evict(cache, block.number, outcome);
                cache.insert_block(block.clone());
            },
        )?;
        tracing::debug!(number = block.number, hash = %block.hash, "Stored block");
        Ok(())
    }

    fn set_transaction(&self, transaction: &StoredTransaction, location: TxLocation) -> StoreResult<()> {
        self.write_cached(
            location.block_number,
            |tx| {
                let block = write::stored_block(tx, location.block_number)?
                    .ok_or(StoreError::BlockNotFound(location.block_number))?;
                let expected = block
                    .transaction_hashes
                    .get(location.transaction_index as usize)
                    .copied();
                if block.hash != location.block_hash || expected != Some(transaction.hash) {
                    return Err(StoreError::InvalidInput(format!(
                        "transaction {} is not at index {} of block {}",
                        transaction.hash, location.transaction_index, location.block_number
                    )));
                }
                write::insert_transaction(tx, transaction, location)
            },
            |cache, _| cache.insert_transaction(transaction.clone(), location),
        )?;
        Ok(())
    }

    fn set_receipt(&self, receipt: &StoredReceipt) -> StoreResult<()> {
        let hash = receipt.transaction_hash;
        let location = {
            let conn = self.writer.lock();
            write::transaction_location(&conn, hash)?
        }
        .ok_or_else(|| {
            StoreError::InvalidInput(format!("receipt for unknown transaction {hash}"))
        })?;

        self.write_cached(
            location.block_number,
            |tx| write::insert_receipt(tx, receipt, location),
            |cache, _| cache.insert_receipt(receipt.clone()),
        )?;
        Ok(())
    }

    fn delete_block(&self, number: u64) -> StoreResult<()> {
        let removed = self.write_cached(
            number,
            |tx| {
                if write::stored_block(tx, number)?.is_none() {
                    return Err(StoreError::BlockNotFound(number));
                }
                write::delete_height(tx, number)
            },
            |cache, removed| cache.evict_height(number, removed),
        )?;
        tracing::info!(number, transactions = removed.len(), "Deleted block");
        Ok(())
    }
}

impl IndexWriter for SqliteChainStore {
    fn commit_height(&self, bundle: &BlockBundle, batch: &IndexBatch) -> StoreResult<()> {
        bundle.validate()?;
        let number = bundle.number();
        if batch.height != number {
            return Err(StoreError::InvalidInput(format!(
                "index batch for height {} committed with block {number}",
                batch.height
            )));
        }
        batch.check_height()?;

        self.write_cached(
            number,
            |tx| {
                let outcome = write::upsert_block(tx, &bundle.block)?;
                for (index, transaction) in bundle.transactions.iter().enumerate() {
                    write::insert_transaction(tx, transaction, bundle.location(index))?;
                }
                for (index, receipt) in bundle.receipts.iter().enumerate() {
                    write::insert_receipt(tx, receipt, bundle.location(index))?;
                }
                write::write_batch(tx, batch)?;
                Ok(outcome)
            },
            |cache, outcome| {
                Self::evict(cache, number, outcome);
                cache.insert_block(bundle.block.clone());
                for (index, transaction) in bundle.transactions.iter().enumerate() {
                    cache.insert_transaction(transaction.clone(), bundle.location(index));
                }
                for receipt in &bundle.receipts {
                    cache.insert_receipt(receipt.clone());
                }
            },
        )?;

        tracing::debug!(
            number,
            hash = %bundle.block.hash,
            records = batch.record_count(),
            "Committed height"
        );
        Ok(())
    }

    fn commit_index(&self, batch: &IndexBatch) -> StoreResult<()> {
        batch.check_height()?;
        let number = batch.height;
        self.write(number, |tx| {
            if write::stored_block(tx, number)?.is_none() {
                return Err(StoreError::BlockNotFound(number));
            }
            write::write_batch(tx, batch)
        })?;
        tracing::debug!(number, records = batch.record_count(), "Committed index batch");
        Ok(())
    }

    fn pending_index_heights(&self, limit: usize) -> StoreResult<Vec<u64>> {
        let conn = self.read_conn()?;
        let mut stmt =
            conn.prepare("SELECT number FROM blocks WHERE indexed = 0 ORDER BY number LIMIT ?")?;
        let heights = stmt
            .query_map(params![limit as i64], |row| row.get::<_, i64>(0))?
            .map(|n| n.map(|n| n as u64))
            .collect::<rusqlite::Result<Vec<u64>>>()?;
        Ok(heights)
    }
}

impl IndexCapabilities for SqliteChainStore {
    fn address_index(&self) -> Option<&dyn AddressIndexReader> {
        Some(self)
    }

    fn token_transfers(&self) -> Option<&dyn TokenTransferReader> {
        Some(self)
    }

    fn contracts(&self) -> Option<&dyn ContractIndexReader> {
        self.indexes
            .contracts
            .then_some(self as &dyn ContractIndexReader)
    }

    fn contract_verification_writer(&self) -> Option<&dyn ContractVerificationWriter> {
        self.indexes
            .contracts
            .then_some(self as &dyn ContractVerificationWriter)
    }

    fn internal_transactions(&self) -> Option<&dyn InternalTransactionReader> {
        self.indexes
            .internal_transactions
            .then_some(self as &dyn InternalTransactionReader)
    }

    fn set_code(&self) -> Option<&dyn SetCodeReader> {
        self.indexes.set_code.then_some(self as &dyn SetCodeReader)
    }

    fn consensus(&self) -> Option<&dyn ConsensusReader> {
        self.indexes
            .consensus
            .then_some(self as &dyn ConsensusReader)
    }

    fn balances(&self) -> Option<&dyn BalanceHistoryReader> {
        self.indexes
            .balances
            .then_some(self as &dyn BalanceHistoryReader)
    }

    fn system_event_index(&self) -> Option<&dyn SystemEventReader> {
        self.indexes
            .system_events
            .then_some(self as &dyn SystemEventReader)
    }

    fn counters(&self) -> Option<&dyn AggregateCounters> {
        Some(self)
    }
}

/// Generate a unique ID for in-memory shared-cache SQLite databases.
fn unique_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}
