//! Durable storage of canonical chain data and the secondary indexes derived
//! from it.
//!
//! [`ChainStore`] is the primary contract: blocks, transactions, receipts and
//! logs addressable by height, hash and transaction hash. [`IndexWriter`]
//! commits a height's primary data together with its [`IndexBatch`] so that no
//! reader can observe one without the other. Optional index families are
//! exposed through the reader traits in [`capabilities`] and discovered with
//! [`IndexCapabilities`].
//!
//! # Watermarks
//!
//! Two heights are tracked separately:
//!
//! - `raw_height`: highest contiguous height whose primary data is stored
//! - `latest_height`: highest contiguous height whose secondary indexes are
//!   committed as well
//!
//! A height stored through `set_block` without an index batch advances only
//! the raw mark; it shows up in [`IndexWriter::pending_index_heights`] until
//! `commit_index` succeeds for it.

pub mod batch;
pub mod cache;
pub mod capabilities;
mod codec;
pub mod error;
mod schema;
mod sqlite;
pub mod traits;

pub use batch::IndexBatch;
pub use cache::{CacheConfig, ChainCache, Watermarks};
pub use capabilities::{
    AddressIndexReader, AggregateCounters, BalanceHistoryReader, ConsensusReader,
    ContractIndexReader, ContractVerificationWriter, EnabledIndexes, IndexCapabilities,
    InternalTransactionReader, Page, RangeQuery, SetCodeReader, SystemEventFilter,
    SystemEventReader, TokenTransferFilter, TokenTransferReader,
};
pub use error::{StoreError, StoreResult, StoreResultExt};
pub use sqlite::{SqliteChainStore, StoreOptions};
pub use traits::{ChainStore, IndexStore, IndexWriter};
