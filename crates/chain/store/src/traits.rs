//! Storage contract for primary chain data.

use alloy_primitives::B256;
use chainidx_primitives::{
    derive_receipt_view, BlockBundle, ReceiptView, StoredBlock, StoredLog, StoredReceipt,
    StoredTransaction, TxLocation,
};
use rayon::prelude::*;

use crate::batch::IndexBatch;
use crate::capabilities::IndexCapabilities;
use crate::error::{StoreError, StoreResult};

/// Primary chain data: blocks, transactions, receipts and logs.
///
/// All methods are synchronous. Absent keys are reported as `*NotFound`
/// errors, never as empty values, so callers can tell "not stored" apart from
/// a storage failure.
pub trait ChainStore: Send + Sync {
    /// Highest contiguous fully indexed height.
    ///
    /// Fails with [`StoreError::EmptyChain`] while no height has been indexed;
    /// callers should treat that as an empty chain rather than retry.
    fn latest_height(&self) -> StoreResult<u64>;

    /// Highest contiguous height with primary data stored.
    fn raw_height(&self) -> StoreResult<u64>;

    fn get_block(&self, number: u64) -> StoreResult<StoredBlock>;

    fn get_block_by_hash(&self, hash: B256) -> StoreResult<StoredBlock>;

    fn get_block_number(&self, hash: B256) -> StoreResult<u64>;

    /// Blocks in `[start, end]` in ascending order. Missing heights are skipped.
    fn get_blocks(&self, start: u64, end: u64) -> StoreResult<Vec<StoredBlock>>;

    /// Transactions of a block in transaction-index order.
    fn get_block_transactions(&self, number: u64) -> StoreResult<Vec<StoredTransaction>>;

    fn get_transaction(&self, hash: B256) -> StoreResult<(StoredTransaction, TxLocation)>;

    /// Batched lookup. The output has one slot per input hash, in input order.
    fn get_transactions(
        &self,
        hashes: &[B256],
    ) -> Vec<StoreResult<(StoredTransaction, TxLocation)>> {
        hashes
            .par_iter()
            .map(|hash| self.get_transaction(*hash))
            .collect()
    }

    /// Receipt with its logs.
    fn get_receipt(&self, hash: B256) -> StoreResult<StoredReceipt>;

    /// Receipts of a block in transaction-index order.
    fn get_receipts_by_block_number(&self, number: u64) -> StoreResult<Vec<StoredReceipt>>;

    /// Logs of a block in log-index order.
    fn get_logs_by_block(&self, number: u64) -> StoreResult<Vec<StoredLog>>;

    /// Receipt with gas used, effective gas price and created contract
    /// recomputed from block and transaction context.
    fn get_receipt_view(&self, hash: B256) -> StoreResult<ReceiptView> {
        let receipt = self.get_receipt(hash)?;
        let (tx, location) = self.get_transaction(hash)?;
        let block = self.get_block(location.block_number)?;

        let previous_cumulative = match location.transaction_index.checked_sub(1) {
            Some(previous) => {
                let previous_hash = block
                    .transaction_hashes
                    .get(previous as usize)
                    .copied()
                    .ok_or(StoreError::TransactionNotFound(hash))?;
                self.get_receipt(previous_hash)?.cumulative_gas_used
            }
            None => 0,
        };

        Ok(derive_receipt_view(
            &block,
            &tx,
            location,
            &receipt,
            previous_cumulative,
        ))
    }

    fn has_block(&self, number: u64) -> StoreResult<bool>;

    fn has_transaction(&self, hash: B256) -> StoreResult<bool>;

    fn has_receipt(&self, hash: B256) -> StoreResult<bool>;

    /// Upsert a block.
    ///
    /// Rewriting the same hash keeps the height's index state. A different
    /// hash replaces the height: everything stored for the old block,
    /// primary and secondary, is removed first.
    fn set_block(&self, block: &StoredBlock) -> StoreResult<()>;

    fn set_blocks(&self, blocks: &[StoredBlock]) -> StoreResult<()> {
        for block in blocks {
            self.set_block(block)?;
        }
        Ok(())
    }

    /// Upsert a transaction. The block at `location` must already be stored.
    fn set_transaction(&self, tx: &StoredTransaction, location: TxLocation) -> StoreResult<()>;

    /// Upsert a receipt and replace its logs. The transaction must already be
    /// stored.
    fn set_receipt(&self, receipt: &StoredReceipt) -> StoreResult<()>;

    fn set_receipts(&self, receipts: &[StoredReceipt]) -> StoreResult<()> {
        for receipt in receipts {
            self.set_receipt(receipt)?;
        }
        Ok(())
    }

    /// Remove a height with its hash mapping, transactions, receipts, logs
    /// and every secondary record derived from it.
    fn delete_block(&self, number: u64) -> StoreResult<()>;
}

/// Atomic writes of secondary index data.
pub trait IndexWriter: Send + Sync {
    /// Write a block's primary data and its index batch in one unit and mark
    /// the height indexed.
    fn commit_height(&self, bundle: &BlockBundle, batch: &IndexBatch) -> StoreResult<()>;

    /// Replace the secondary data of an already stored height and mark it
    /// indexed. Used to retry heights whose index phase failed.
    fn commit_index(&self, batch: &IndexBatch) -> StoreResult<()>;

    /// Stored heights whose secondary data has not been committed, ascending.
    fn pending_index_heights(&self, limit: usize) -> StoreResult<Vec<u64>>;
}

/// Everything the index maintainer needs from a store.
pub trait IndexStore: ChainStore + IndexWriter + IndexCapabilities {}

impl<T: ChainStore + IndexWriter + IndexCapabilities> IndexStore for T {}
