//! Query & pagination over the chain store.
//!
//! Every list query returns a [`Connection`]: the page of nodes, a
//! [`TotalCount`] and [`PageInfo`] with cursors. Block lists page by height
//! window ([`reverse_window`], [`forward_window`]). Transaction and log
//! queries scan a bounded block span newest first. Index families page
//! directly through the store's range indexes.
//!
//! A total is flagged inexact when it only counts what a clamped scan saw.

pub mod connection;
pub mod context;
pub mod engine;
pub mod error;
pub mod pagination;

pub use connection::{Connection, Cursor, PageInfo, TotalCount};
pub use context::QueryContext;
pub use engine::{
    ChainStatus, ContractInfo, LogFilter, QueryConfig, QueryEngine, TransactionFilter,
    TransactionNode, DEFAULT_MAX_BLOCK_SPAN,
};
pub use error::{QueryError, QueryResult};
pub use pagination::{
    forward_window, reverse_window, BlockRangeFilter, BlockWindow, PageRequest, Regime,
};
