//! Secondary index maintenance for the chain indexer.
//!
//! [`IndexMaintainer`] turns a validated [`BlockBundle`](chainidx_primitives::BlockBundle)
//! into an [`IndexBatch`](chainidx_store::IndexBatch) and commits both in one
//! store transaction:
//!
//! ```text
//!   BlockBundle ──validate──► derive (address buckets, contracts, traces,
//!        │                           token transfers, authorizations, WBFT,
//!        │                           balance deltas, system events)
//!        │                                   │
//!        └────────────── commit_height ◄─────┘
//!                              │
//!                              ▼
//!                     EventBus::publish (best effort)
//! ```
//!
//! Token and system-contract logs are decoded against the `sol!` declarations
//! in [`abi`]; the [`EventDecoder`] registry is shared by `Arc`, and
//! logs, extra data and authorizations that fail to decode are logged,
//! counted and skipped without failing the height.

pub mod abi;
pub mod decoder;
pub mod derive;
pub mod error;
pub mod maintainer;

pub use decoder::{EventDecoder, SystemContracts};
pub use derive::{IndexSelection, ValidatorSource};
pub use error::{IndexerError, IndexerResult};
pub use maintainer::{CommitSummary, IndexMaintainer, MaintainerConfig};
