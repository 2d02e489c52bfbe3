//! Receipts and logs.

use alloy_primitives::{Address, Bloom, Bytes, B256};
use serde::{Deserialize, Serialize};

/// Stored receipt, keyed by transaction hash.
///
/// `gas_used` and `effective_gas_price` are kept exactly as the upstream node
/// reported them (possibly absent). Readers use [`crate::ReceiptView`], which
/// recomputes both from cumulative gas and fee fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredReceipt {
    /// Transaction hash.
    pub transaction_hash: B256,
    /// Execution status (`true` = success).
    pub status: bool,
    /// Gas used by this and every preceding transaction in the block.
    pub cumulative_gas_used: u64,
    #[serde(default)]
    pub logs_bloom: Bloom,
    /// Logs emitted by the transaction.
    #[serde(default)]
    pub logs: Vec<StoredLog>,
    /// Address of the contract created by this transaction, if any.
    #[serde(default)]
    pub contract_address: Option<Address>,
    /// Upstream-reported gas used. Not trusted.
    #[serde(default)]
    pub gas_used: Option<u64>,
    /// Upstream-reported effective gas price. Not trusted.
    #[serde(default)]
    pub effective_gas_price: Option<u128>,
    #[serde(default)]
    pub blob_gas_used: Option<u64>,
    #[serde(default)]
    pub blob_gas_price: Option<u128>,
}

/// Stored log with its full chain context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLog {
    /// Contract that emitted the log.
    pub address: Address,
    /// Indexed topics.
    pub topics: Vec<B256>,
    /// Non-indexed data.
    pub data: Bytes,
    pub block_number: u64,
    pub block_hash: B256,
    pub transaction_hash: B256,
    pub transaction_index: u32,
    /// Position within the block (not within the receipt).
    pub log_index: u32,
    #[serde(default)]
    pub removed: bool,
}

impl StoredLog {
    pub fn topic0(&self) -> Option<&B256> {
        self.topics.first()
    }
}
