//! Read-time derivation of receipt fields that upstream sources may omit.
//!
//! Nothing computed here is persisted. Every view is rebuilt from the block
//! (base fee), the transaction (fee fields, recipient) and the receipts of the
//! same block (cumulative gas).

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use crate::block::StoredBlock;
use crate::receipt::StoredReceipt;
use crate::transaction::{StoredTransaction, TxLocation, TxType};

/// Per-transaction gas from a block's cumulative gas column.
///
/// `gas[0] = cumulative[0]`, `gas[i] = cumulative[i] - cumulative[i - 1]`.
/// A decreasing cumulative value yields zero instead of wrapping.
pub fn derive_gas_used(cumulative: &[u64]) -> Vec<u64> {
    let mut previous = 0u64;
    cumulative
        .iter()
        .map(|&current| {
            let used = current.saturating_sub(previous);
            previous = current;
            used
        })
        .collect()
}

/// Receipt enriched with derived gas, price and created contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptView {
    pub receipt: StoredReceipt,
    pub location: TxLocation,
    pub tx_type: TxType,
    pub from: Address,
    pub to: Option<Address>,
    /// Derived from cumulative gas.
    pub gas_used: u64,
    /// Derived from fee fields and the block base fee.
    pub effective_gas_price: u128,
    /// Taken from the receipt for creations; never from the transaction.
    pub contract_address: Option<Address>,
}

impl ReceiptView {
    pub fn transaction_hash(&self) -> B256 {
        self.receipt.transaction_hash
    }

    /// Total execution fee paid (excluding blob gas).
    pub fn fee(&self) -> u128 {
        (self.gas_used as u128).saturating_mul(self.effective_gas_price)
    }

    /// Blob gas fee, when the receipt carries blob accounting.
    pub fn blob_fee(&self) -> u128 {
        match (self.receipt.blob_gas_used, self.receipt.blob_gas_price) {
            (Some(used), Some(price)) => (used as u128).saturating_mul(price),
            _ => 0,
        }
    }
}

/// Build one view given the cumulative gas of the preceding receipt.
pub fn derive_receipt_view(
    block: &StoredBlock,
    tx: &StoredTransaction,
    location: TxLocation,
    receipt: &StoredReceipt,
    previous_cumulative: u64,
) -> ReceiptView {
    let contract_address = if tx.is_contract_creation() {
        receipt.contract_address
    } else {
        None
    };

    ReceiptView {
        receipt: receipt.clone(),
        location,
        tx_type: tx.tx_type,
        from: tx.from,
        to: tx.to,
        gas_used: receipt
            .cumulative_gas_used
            .saturating_sub(previous_cumulative),
        effective_gas_price: tx.effective_gas_price(block.base_fee_per_gas),
        contract_address,
    }
}

/// Views for a whole block. Transactions and receipts must be in block order.
///
/// Pairs are matched positionally; a receipt whose hash does not match its
/// transaction ends the derivation so that gas deltas are never computed
/// across a gap.
pub fn derive_receipt_views(
    block: &StoredBlock,
    transactions: &[StoredTransaction],
    receipts: &[StoredReceipt],
) -> Vec<ReceiptView> {
    let mut views = Vec::with_capacity(receipts.len());
    let mut previous = 0u64;

    for (index, (tx, receipt)) in transactions.iter().zip(receipts).enumerate() {
        if tx.hash != receipt.transaction_hash {
            break;
        }
        let location = TxLocation {
            block_number: block.number,
            block_hash: block.hash,
            transaction_index: index as u32,
        };
        views.push(derive_receipt_view(block, tx, location, receipt, previous));
        previous = receipt.cumulative_gas_used;
    }

    views
}
