//! Data model shared by every chain indexer crate.
//!
//! Primary entities (`StoredBlock`, `StoredTransaction`, `StoredReceipt`,
//! `StoredLog`) are written once per height and never trusted for fields that
//! upstream nodes may omit: gas used, effective gas price and the created
//! contract address are recomputed from block, transaction and receipt context
//! by the functions in [`derive`].
//!
//! Secondary records ([`records`], [`system`]) are produced by the index
//! maintainer from a [`BlockBundle`] and always reference data written in the
//! same unit of work.
//!
//! # Layout
//!
//! ```text
//!   BlockBundle ──validate──► StoredBlock + StoredTransaction[] + StoredReceipt[]
//!        │                                  │
//!        │ traces, snapshots                │ derive::derive_receipt_views
//!        ▼                                  ▼
//!   InternalCall[], BalanceSnapshot[]    ReceiptView (gas used, effective price)
//!
//!   StoredBlock.extra_data ──wbft::WbftExtra::decode──► seals, round, EpochInfo
//!   StoredTransaction.authorization_list ──recover_authority──► authority
//! ```

pub mod block;
pub mod bundle;
pub mod derive;
pub mod error;
pub mod receipt;
pub mod records;
pub mod system;
pub mod transaction;
pub mod wbft;

pub use block::StoredBlock;
pub use bundle::{BlockBundle, CallType, InternalCall};
pub use derive::{derive_gas_used, derive_receipt_view, derive_receipt_views, ReceiptView};
pub use error::{BundleError, DecodeError};
pub use receipt::{StoredLog, StoredReceipt};
pub use records::*;
pub use system::{
    MinterState, Proposal, ProposalStatus, ProposalVote, SystemEvent, SystemEventKind,
};
pub use transaction::{
    AccessList, AccessListItem, Authorization, SignedAuthorization, StoredTransaction, TxLocation,
    TxSignature, TxType,
};
pub use wbft::{AggregatedSeal, Candidate, EpochInfo, WbftExtra};

/// `keccak256("Transfer(address,address,uint256)")`, shared by ERC20 and ERC721.
pub const TRANSFER_EVENT_SIGNATURE: alloy_primitives::B256 = alloy_primitives::b256!(
    "ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
);
