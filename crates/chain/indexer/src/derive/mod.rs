//! Per-height derivation of secondary records.
//!
//! Every function here is pure over the bundle apart from validator set
//! look-ups, which go through [`ValidatorSource`] so that a batch of heights
//! can see epochs announced earlier in the same batch before they are
//! committed.

mod activity;
mod balances;
mod consensus;
mod set_code;
mod tokens;

use std::collections::BTreeMap;

use alloy_primitives::{Address, B256};
use chainidx_primitives::{
    derive_receipt_views, BlockBundle, ReceiptView, StoredTransaction, SystemEvent,
};
use chainidx_store::{IndexBatch, IndexCapabilities, StoreResult};

use crate::decoder::EventDecoder;
use crate::maintainer::MaintainerConfig;

pub use consensus::{announced_epoch, EpochOverlay, ValidatorSource};

/// Index families the maintainer derives, taken from the store's capabilities.
///
/// A family the store cannot hold is never derived. Address activity and
/// token transfers are always derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSelection {
    pub contracts: bool,
    pub internal_transactions: bool,
    pub set_code: bool,
    pub consensus: bool,
    pub balances: bool,
    pub system_events: bool,
}

impl IndexSelection {
    pub fn all() -> Self {
        Self {
            contracts: true,
            internal_transactions: true,
            set_code: true,
            consensus: true,
            balances: true,
            system_events: true,
        }
    }

    pub fn from_capabilities<C: IndexCapabilities + ?Sized>(store: &C) -> Self {
        Self {
            contracts: store.contracts().is_some(),
            internal_transactions: store.internal_transactions().is_some(),
            set_code: store.set_code().is_some(),
            consensus: store.consensus().is_some(),
            balances: store.balances().is_some(),
            system_events: store.system_event_index().is_some(),
        }
    }
}

/// A bundle together with its derived receipt views.
pub(crate) struct BlockContext<'a> {
    pub bundle: &'a BlockBundle,
    pub views: Vec<ReceiptView>,
    tx_indices: BTreeMap<B256, u32>,
}

impl<'a> BlockContext<'a> {
    pub fn new(bundle: &'a BlockBundle) -> Self {
        let views = derive_receipt_views(
            &bundle.block,
            &bundle.transactions,
            &bundle.receipts,
        );
        let tx_indices = bundle
            .transactions
            .iter()
            .enumerate()
            .map(|(index, tx)| (tx.hash, index as u32))
            .collect();
        Self {
            bundle,
            views,
            tx_indices,
        }
    }

    pub fn height(&self) -> u64 {
        self.bundle.block.number
    }

    /// Transactions paired with their receipt views.
    pub fn transactions(&self) -> impl Iterator<Item = (&StoredTransaction, &ReceiptView)> {
        self.bundle.transactions.iter().zip(&self.views)
    }

    pub fn transaction_index(&self, hash: &B256) -> Option<u32> {
        self.tx_indices.get(hash).copied()
    }

    /// Whether the transaction with `hash` executed successfully.
    pub fn succeeded(&self, hash: &B256) -> bool {
        self.transaction_index(hash)
            .and_then(|index| self.views.get(index as usize))
            .is_some_and(|view| view.receipt.status)
    }

    /// Recipient of a transaction: the callee, or the created contract.
    pub fn recipient(tx: &StoredTransaction, view: &ReceiptView) -> Option<Address> {
        tx.to.or(view.contract_address)
    }
}

/// A derived batch and the number of items that failed to decode.
#[derive(Debug)]
pub struct Derivation {
    pub batch: IndexBatch,
    pub decode_failures: u64,
}

/// Derive every selected index family for one validated bundle.
pub fn derive_batch(
    bundle: &BlockBundle,
    selection: IndexSelection,
    decoder: &EventDecoder,
    config: &MaintainerConfig,
    validators: &dyn ValidatorSource,
) -> StoreResult<Derivation> {
    let ctx = BlockContext::new(bundle);
    let mut batch = IndexBatch::new(ctx.height());
    let mut failures = 0u64;

    batch.address_transactions = activity::address_transactions(&ctx);
    let transfers = tokens::token_transfers(&ctx, &mut failures);
    batch.erc20_transfers = transfers.erc20;
    batch.erc721_transfers = transfers.erc721;

    if selection.contracts {
        batch.contract_creations = activity::contract_creations(&ctx);
    }
    if selection.internal_transactions {
        batch.internal_transactions = activity::internal_transactions(&ctx);
    }
    if selection.set_code {
        batch.set_code_authorizations =
            set_code::authorizations(&ctx, config.chain_id, &mut failures);
    }
    if selection.consensus {
        let records = consensus::consensus_records(
            &bundle.block,
            config.epoch_length,
            validators,
            &mut failures,
        )?;
        batch.wbft_block = records.wbft_block;
        batch.epoch = records.epoch;
        batch.validator_activity = records.activity;
    }
    if selection.balances {
        batch.balance_deltas = balances::balance_deltas(&ctx);
        batch.balance_snapshots = bundle.balance_snapshots.clone();
    }
    if selection.system_events {
        batch.system_events = system_events(&ctx, decoder, &mut failures);
    }

    Ok(Derivation {
        batch,
        decode_failures: failures,
    })
}

fn system_events(ctx: &BlockContext<'_>, decoder: &EventDecoder, failures: &mut u64) -> Vec<SystemEvent> {
    let mut events = Vec::new();
    for log in ctx.bundle.logs().filter(|log| !log.removed) {
        match decoder.decode(log) {
            None => {}
            Some(Ok(kind)) => events.push(SystemEvent {
                block_number: log.block_number,
                log_index: log.log_index,
                transaction_hash: log.transaction_hash,
                contract: log.address,
                kind,
            }),
            Some(Err(err)) => {
                tracing::warn!(
                    block = log.block_number,
                    log_index = log.log_index,
                    contract = %log.address,
                    %err,
                    "Skipping undecodable system event"
                );
                *failures += 1;
            }
        }
    }
    events
}
