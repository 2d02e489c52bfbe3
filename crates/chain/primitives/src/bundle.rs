//! The unit of ingestion: one finalized block with everything derived from it.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

use crate::block::StoredBlock;
use crate::error::BundleError;
use crate::receipt::{StoredLog, StoredReceipt};
use crate::records::BalanceSnapshot;
use crate::transaction::{StoredTransaction, TxLocation};

/// Kind of call frame reported by the tracer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CallType {
    Call,
    CallCode,
    DelegateCall,
    StaticCall,
    Create,
    Create2,
    SelfDestruct,
}

impl CallType {
    pub const fn is_create(self) -> bool {
        matches!(self, Self::Create | Self::Create2)
    }

    /// Whether `value` moves balance between `from` and `to`.
    pub const fn transfers_value(self) -> bool {
        !matches!(self, Self::DelegateCall | Self::StaticCall)
    }
}

/// Flattened call frame from an execution trace. The top-level call is not
/// included; `depth` starts at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalCall {
    pub transaction_hash: B256,
    /// Pre-order position of the frame within the transaction.
    pub call_index: u32,
    pub call_type: CallType,
    pub from: Address,
    /// Callee, or the created address for CREATE frames.
    #[serde(default)]
    pub to: Option<Address>,
    pub value: U256,
    pub gas: u64,
    pub gas_used: u64,
    #[serde(default)]
    pub input: Bytes,
    pub depth: u32,
    #[serde(default)]
    pub error: Option<String>,
}

/// A finalized block as handed over by the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBundle {
    pub block: StoredBlock,
    /// Transactions in block order.
    #[serde(default)]
    pub transactions: Vec<StoredTransaction>,
    /// Receipts in block order.
    #[serde(default)]
    pub receipts: Vec<StoredReceipt>,
    #[serde(default)]
    pub internal_calls: Vec<InternalCall>,
    /// Absolute balances observed at this height.
    #[serde(default)]
    pub balance_snapshots: Vec<BalanceSnapshot>,
}

impl BlockBundle {
    pub fn number(&self) -> u64 {
        self.block.number
    }

    /// Check that transactions, receipts, logs and traces all describe the
    /// same block in the same order.
    pub fn validate(&self) -> Result<(), BundleError> {
        let block = self.block.number;
        let expected = self.block.transaction_hashes.len();

        if self.transactions.len() != expected {
            return Err(BundleError::TransactionCount {
                block,
                expected,
                actual: self.transactions.len(),
            });
        }
        for (index, (tx, hash)) in self
            .transactions
            .iter()
            .zip(&self.block.transaction_hashes)
            .enumerate()
        {
            if tx.hash != *hash {
                return Err(BundleError::TransactionOrder { block, index });
            }
        }

        if self.receipts.len() != self.transactions.len() {
            return Err(BundleError::ReceiptCount {
                block,
                transactions: self.transactions.len(),
                receipts: self.receipts.len(),
            });
        }

        let mut previous_cumulative = 0u64;
        let mut previous_log: Option<u32> = None;
        for (index, (tx, receipt)) in self.transactions.iter().zip(&self.receipts).enumerate() {
            if receipt.transaction_hash != tx.hash {
                return Err(BundleError::ReceiptMismatch {
                    block,
                    index,
                    expected: tx.hash,
                });
            }
            if receipt.cumulative_gas_used < previous_cumulative {
                return Err(BundleError::CumulativeGas { block, index });
            }
            previous_cumulative = receipt.cumulative_gas_used;

            for log in &receipt.logs {
                if log.block_number != block
                    || log.block_hash != self.block.hash
                    || log.transaction_hash != tx.hash
                    || log.transaction_index as usize != index
                {
                    return Err(BundleError::LogContext {
                        block,
                        log_index: log.log_index,
                    });
                }
                if let Some(previous) = previous_log.filter(|previous| log.log_index <= *previous) {
                    return Err(BundleError::LogIndexOrder {
                        block,
                        log_index: log.log_index,
                        previous,
                    });
                }
                previous_log = Some(log.log_index);
            }
        }

        for call in &self.internal_calls {
            if self.block.transaction_index(&call.transaction_hash).is_none() {
                return Err(BundleError::UnknownTraceTransaction {
                    block,
                    tx_hash: call.transaction_hash,
                });
            }
        }

        for snapshot in &self.balance_snapshots {
            if snapshot.block_number != block {
                return Err(BundleError::SnapshotHeight {
                    block,
                    height: snapshot.block_number,
                });
            }
        }

        Ok(())
    }

    /// Location of the transaction at `index`.
    pub fn location(&self, index: usize) -> TxLocation {
        TxLocation {
            block_number: self.block.number,
            block_hash: self.block.hash,
            transaction_index: index as u32,
        }
    }

    /// All logs of the block in log-index order.
    pub fn logs(&self) -> impl Iterator<Item = &StoredLog> {
        self.receipts.iter().flat_map(|receipt| receipt.logs.iter())
    }
}
