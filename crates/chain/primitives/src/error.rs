//! Error types for decoding and validating chain data.

use alloy_primitives::B256;
use thiserror::Error;

/// A log, extra-data blob or signature payload could not be decoded against
/// its known schema. Always non-fatal for the containing block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// RLP structure did not match the expected layout.
    #[error("rlp decode failed: {0}")]
    Rlp(String),

    /// Log topics or data did not match the ABI of the event it claims to be.
    #[error("event {event} does not decode: {reason}")]
    Abi { event: &'static str, reason: String },

    /// A sealer index pointed outside the epoch validator set.
    #[error("sealer index {index} outside validator set of {len}")]
    SealerIndex { index: usize, len: usize },
}

impl From<alloy_rlp::Error> for DecodeError {
    fn from(err: alloy_rlp::Error) -> Self {
        DecodeError::Rlp(err.to_string())
    }
}

/// Structural problems with an ingestion bundle. Rejected before any write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BundleError {
    #[error("block {block} lists {expected} transactions, bundle carries {actual}")]
    TransactionCount {
        block: u64,
        expected: usize,
        actual: usize,
    },

    #[error("block {block} transaction {index} hash mismatch")]
    TransactionOrder { block: u64, index: usize },

    #[error("block {block} has {transactions} transactions but {receipts} receipts")]
    ReceiptCount {
        block: u64,
        transactions: usize,
        receipts: usize,
    },

    #[error("block {block} receipt {index} does not belong to transaction {expected}")]
    ReceiptMismatch {
        block: u64,
        index: usize,
        expected: B256,
    },

    #[error("block {block} cumulative gas decreases at receipt {index}")]
    CumulativeGas { block: u64, index: usize },

    #[error("block {block} log {log_index} carries context of another block or transaction")]
    LogContext { block: u64, log_index: u32 },

    /// Log indexes must increase strictly across the block's receipts.
    #[error("block {block} log index {log_index} follows {previous}")]
    LogIndexOrder {
        block: u64,
        log_index: u32,
        previous: u32,
    },

    #[error("block {block} trace references unknown transaction {tx_hash}")]
    UnknownTraceTransaction { block: u64, tx_hash: B256 },

    #[error("block {block} balance snapshot is recorded at height {height}")]
    SnapshotHeight { block: u64, height: u64 },
}
