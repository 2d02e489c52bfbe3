//! Test fixtures for the chain indexer crates.
//!
//! - [`builders`]: deterministic [`BlockBundle`](chainidx_primitives::BlockBundle)
//!   construction with consistent hashes, cumulative gas and log indices
//! - [`generators`]: proptest strategies for whole chains
//! - [`keys`]: secp256k1 keys and signed EIP-7702 authorizations
//!
//! ```ignore
//! use chainidx_testing::{address, BundleBuilder};
//!
//! let bundle = BundleBuilder::new(1)
//!     .transfer(address(1), address(2), U256::from(10))
//!     .build();
//! ```

pub mod builders;
pub mod generators;
pub mod keys;

pub use builders::{
    address, address_topic, block_hash, chain, contract_address, transaction, tx_hash,
    wbft_extra, BundleBuilder, GWEI, TRANSFER_GAS,
};
pub use generators::{arb_activity, arb_chain, bundle_from_activity, TestActivity};
pub use keys::{address_of, corrupt_parity, random_key, sign_authorization};
