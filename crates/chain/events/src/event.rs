//! Events published after a height is committed.

use std::sync::Arc;

use alloy_primitives::{Address, B256};
use chainidx_primitives::{BlockBundle, StoredBlock, StoredLog, StoredTransaction, TxLocation};
use serde::{Deserialize, Serialize};

/// Event type used for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Block,
    Transaction,
    Log,
}

/// A transaction together with where it was included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionEvent {
    pub transaction: StoredTransaction,
    pub location: TxLocation,
}

/// A newly indexed entity.
///
/// Payloads are reference counted so fan-out to many subscribers clones a
/// pointer, not the entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexedEvent {
    Block(Arc<StoredBlock>),
    Transaction(Arc<TransactionEvent>),
    Log(Arc<StoredLog>),
}

impl IndexedEvent {
    pub fn block(block: StoredBlock) -> Self {
        Self::Block(Arc::new(block))
    }

    pub fn transaction(transaction: StoredTransaction, location: TxLocation) -> Self {
        Self::Transaction(Arc::new(TransactionEvent {
            transaction,
            location,
        }))
    }

    pub fn log(log: StoredLog) -> Self {
        Self::Log(Arc::new(log))
    }

    /// Events for a committed height: the block, then its transactions in
    /// index order, then its logs in log-index order.
    pub fn from_bundle(bundle: &BlockBundle) -> Vec<Self> {
        let mut events =
            Vec::with_capacity(1 + bundle.transactions.len() + bundle.logs().count());
        events.push(Self::block(bundle.block.clone()));
        events.extend(
            bundle
                .transactions
                .iter()
                .enumerate()
                .map(|(index, tx)| Self::transaction(tx.clone(), bundle.location(index))),
        );
        events.extend(bundle.logs().cloned().map(Self::log));
        events
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Block(_) => EventKind::Block,
            Self::Transaction(_) => EventKind::Transaction,
            Self::Log(_) => EventKind::Log,
        }
    }

    pub fn block_number(&self) -> u64 {
        match self {
            Self::Block(block) => block.number,
            Self::Transaction(tx) => tx.location.block_number,
            Self::Log(log) => log.block_number,
        }
    }

    /// Whether `address` is one of the accounts the event is about: the
    /// miner of a block, either side of a transaction, or the emitter of a log.
    pub fn involves(&self, address: &Address) -> bool {
        match self {
            Self::Block(block) => block.miner == *address,
            Self::Transaction(tx) => {
                tx.transaction.from == *address || tx.transaction.to.as_ref() == Some(address)
            }
            Self::Log(log) => log.address == *address,
        }
    }

    /// Topics of a log event; empty for other kinds.
    pub fn topics(&self) -> &[B256] {
        match self {
            Self::Log(log) => &log.topics,
            _ => &[],
        }
    }
}
