//! Canonical block header as stored by the indexer.

use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

/// Stored block header with the ordered list of its transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlock {
    /// Block number/height.
    pub number: u64,
    /// Block hash.
    pub hash: B256,
    /// Parent block hash.
    pub parent_hash: B256,
    /// State root after this block.
    pub state_root: B256,
    /// Transactions root.
    pub transactions_root: B256,
    /// Receipts root.
    pub receipts_root: B256,
    /// Block timestamp (Unix seconds).
    pub timestamp: u64,
    /// Proposer / fee recipient.
    pub miner: Address,
    /// Gas limit for this block.
    pub gas_limit: u64,
    /// Total gas used in this block.
    pub gas_used: u64,
    /// Base fee, present once the fee market is active.
    #[serde(default)]
    pub base_fee_per_gas: Option<u64>,
    /// Blob gas consumed by this block.
    #[serde(default)]
    pub blob_gas_used: Option<u64>,
    /// Running blob gas excess.
    #[serde(default)]
    pub excess_blob_gas: Option<u64>,
    /// Consensus extra data (WBFT seals and epoch info).
    pub extra_data: Bytes,
    /// Transaction hashes; position is the transaction index.
    pub transaction_hashes: Vec<B256>,
    /// Uncle hashes.
    #[serde(default)]
    pub uncles: Vec<B256>,
}

impl StoredBlock {
    pub fn transaction_count(&self) -> usize {
        self.transaction_hashes.len()
    }

    /// Position of `hash` inside this block.
    pub fn transaction_index(&self, hash: &B256) -> Option<u32> {
        self.transaction_hashes
            .iter()
            .position(|h| h == hash)
            .map(|i| i as u32)
    }

    /// Blob base fee per EIP-4844 given the block's excess blob gas.
    pub fn blob_base_fee(&self) -> Option<u128> {
        self.excess_blob_gas.map(blob_base_fee)
    }
}

const MIN_BLOB_BASE_FEE: u128 = 1;
const BLOB_BASE_FEE_UPDATE_FRACTION: u128 = 3_338_477;

/// `fake_exponential(MIN_BLOB_BASE_FEE, excess, UPDATE_FRACTION)` from EIP-4844.
pub fn blob_base_fee(excess_blob_gas: u64) -> u128 {
    let numerator = excess_blob_gas as u128;
    let denominator = BLOB_BASE_FEE_UPDATE_FRACTION;

    let mut i = 1u128;
    let mut output = 0u128;
    let mut accum = MIN_BLOB_BASE_FEE * denominator;
    while accum > 0 {
        output = output.saturating_add(accum);
        accum = accum.saturating_mul(numerator) / (denominator * i);
        i += 1;
    }
    output / denominator
}
