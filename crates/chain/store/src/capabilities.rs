//! Optional secondary index families.
//!
//! A store implements the reader traits for the families it maintains and
//! advertises them through [`IndexCapabilities`]. Callers probe before use:
//!
//! ```ignore
//! match store.token_transfers() {
//!     Some(reader) => reader.erc20_transfers(&filter, &range)?,
//!     None => return Err(QueryError::Unsupported("token transfers")),
//! }
//! ```

use alloy_primitives::{Address, B256, U256};
use chainidx_primitives::{
    AddressTransaction, BalanceAt, BalanceDelta, BalanceSnapshot, ContractCreation, ContractVerification,
    EpochRecord, Erc20Transfer, Erc721Transfer, InternalTransaction, NftOwnership,
    SetCodeAuthorizationRecord, SystemEvent, ValidatorActivity, ValidatorSigningStats,
    WbftBlockRecord,
};
use serde::Deserialize;

use crate::error::StoreResult;

/// Block-bounded slice of a range index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeQuery {
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub offset: u64,
    pub limit: u64,
    /// Newest first when set.
    pub descending: bool,
}

impl RangeQuery {
    /// Newest-first page over all heights.
    pub const fn latest(offset: u64, limit: u64) -> Self {
        Self {
            from_block: None,
            to_block: None,
            offset,
            limit,
            descending: true,
        }
    }

    pub const fn with_blocks(mut self, from_block: Option<u64>, to_block: Option<u64>) -> Self {
        self.from_block = from_block;
        self.to_block = to_block;
        self
    }
}

impl Default for RangeQuery {
    fn default() -> Self {
        Self::latest(0, 100)
    }
}

/// A slice of an index plus the number of rows matching the whole range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
        }
    }
}

/// Restricts token transfer scans to a contract and/or a participant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenTransferFilter {
    pub contract: Option<Address>,
    /// Matches either side of the transfer.
    pub account: Option<Address>,
}

/// Restricts governance event scans.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemEventFilter {
    /// Event type names as returned by `SystemEventKind::name`.
    pub event_types: Vec<&'static str>,
    pub contract: Option<Address>,
    pub subject: Option<Address>,
}

pub trait AddressIndexReader: Send + Sync {
    /// Transactions sent or received by `address`.
    fn address_transactions(
        &self,
        address: Address,
        range: &RangeQuery,
    ) -> StoreResult<Page<AddressTransaction>>;
}

pub trait TokenTransferReader: Send + Sync {
    fn erc20_transfers(
        &self,
        filter: &TokenTransferFilter,
        range: &RangeQuery,
    ) -> StoreResult<Page<Erc20Transfer>>;

    fn erc721_transfers(
        &self,
        filter: &TokenTransferFilter,
        range: &RangeQuery,
    ) -> StoreResult<Page<Erc721Transfer>>;

    /// Transfers emitted by one transaction, in log order.
    fn token_transfers_by_transaction(
        &self,
        tx_hash: B256,
    ) -> StoreResult<(Vec<Erc20Transfer>, Vec<Erc721Transfer>)>;

    fn nft_owner(&self, contract: Address, token_id: U256) -> StoreResult<NftOwnership>;

    fn nfts_owned_by(&self, owner: Address, range: &RangeQuery) -> StoreResult<Page<NftOwnership>>;
}

pub trait ContractIndexReader: Send + Sync {
    fn contract_creation(&self, address: Address) -> StoreResult<ContractCreation>;

    fn contracts_created_by(
        &self,
        creator: Address,
        range: &RangeQuery,
    ) -> StoreResult<Page<ContractCreation>>;

    /// Fails with `RecordNotFound` when the contract is not verified.
    fn contract_verification(&self, address: Address) -> StoreResult<ContractVerification>;
}

/// Verification metadata is the one mutable record family.
pub trait ContractVerificationWriter: Send + Sync {
    /// Last write wins.
    fn set_contract_verification(&self, verification: &ContractVerification) -> StoreResult<()>;
}

pub trait InternalTransactionReader: Send + Sync {
    /// Call frames of one transaction in call-index order.
    fn internal_transactions_by_transaction(
        &self,
        tx_hash: B256,
    ) -> StoreResult<Vec<InternalTransaction>>;

    fn internal_transactions_by_address(
        &self,
        address: Address,
        range: &RangeQuery,
    ) -> StoreResult<Page<InternalTransaction>>;

    /// Counted at read time; no counter is maintained.
    fn internal_transaction_count(&self, address: Address) -> StoreResult<u64>;
}

pub trait SetCodeReader: Send + Sync {
    fn set_code_authorizations_by_transaction(
        &self,
        tx_hash: B256,
    ) -> StoreResult<Vec<SetCodeAuthorizationRecord>>;

    /// Authorizations where `address` is the authority or the delegation target.
    fn set_code_authorizations_by_address(
        &self,
        address: Address,
        range: &RangeQuery,
    ) -> StoreResult<Page<SetCodeAuthorizationRecord>>;
}

pub trait ConsensusReader: Send + Sync {
    fn wbft_block(&self, number: u64) -> StoreResult<WbftBlockRecord>;

    fn epoch(&self, epoch: u64) -> StoreResult<EpochRecord>;

    /// The most recent epoch record at or before `epoch`, i.e. the validator
    /// set in force for that epoch.
    fn epoch_in_force(&self, epoch: u64) -> StoreResult<EpochRecord>;

    fn validator_stats(&self, validator: Address) -> StoreResult<ValidatorSigningStats>;

    fn all_validator_stats(&self) -> StoreResult<Vec<ValidatorSigningStats>>;

    fn validator_activity(
        &self,
        validator: Address,
        range: &RangeQuery,
    ) -> StoreResult<Page<ValidatorActivity>>;
}

pub trait BalanceHistoryReader: Send + Sync {
    fn balance_deltas(
        &self,
        address: Address,
        range: &RangeQuery,
    ) -> StoreResult<Page<BalanceDelta>>;

    /// Nearest snapshot at or below `block_number` plus every later delta up
    /// to and including `block_number`; all deltas when no snapshot exists.
    fn balance_at(&self, address: Address, block_number: u64) -> StoreResult<BalanceAt>;

    /// Snapshots recorded at exactly `block_number`, ordered by address.
    fn balance_snapshots_at(&self, block_number: u64) -> StoreResult<Vec<BalanceSnapshot>>;
}

pub trait SystemEventReader: Send + Sync {
    fn system_events(
        &self,
        filter: &SystemEventFilter,
        range: &RangeQuery,
    ) -> StoreResult<Page<SystemEvent>>;

    /// Every matching event in chain order, for folding read models.
    fn all_system_events(&self, filter: &SystemEventFilter) -> StoreResult<Vec<SystemEvent>>;
}

/// Exact aggregate counters.
pub trait AggregateCounters: Send + Sync {
    fn block_count(&self) -> StoreResult<u64>;

    fn transaction_count(&self) -> StoreResult<u64>;
}

/// Capability probing. Every family defaults to unsupported.
pub trait IndexCapabilities {
    fn address_index(&self) -> Option<&dyn AddressIndexReader> {
        None
    }

    fn token_transfers(&self) -> Option<&dyn TokenTransferReader> {
        None
    }

    fn contracts(&self) -> Option<&dyn ContractIndexReader> {
        None
    }

    fn contract_verification_writer(&self) -> Option<&dyn ContractVerificationWriter> {
        None
    }

    fn internal_transactions(&self) -> Option<&dyn InternalTransactionReader> {
        None
    }

    fn set_code(&self) -> Option<&dyn SetCodeReader> {
        None
    }

    fn consensus(&self) -> Option<&dyn ConsensusReader> {
        None
    }

    fn balances(&self) -> Option<&dyn BalanceHistoryReader> {
        None
    }

    fn system_event_index(&self) -> Option<&dyn SystemEventReader> {
        None
    }

    fn counters(&self) -> Option<&dyn AggregateCounters> {
        None
    }
}

/// Which optional index families a store maintains.
///
/// Address activity and token transfers are not listed: every indexed height
/// carries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnabledIndexes {
    #[serde(default = "EnabledIndexes::enabled")]
    pub contracts: bool,
    #[serde(default = "EnabledIndexes::enabled")]
    pub internal_transactions: bool,
    #[serde(default = "EnabledIndexes::enabled")]
    pub set_code: bool,
    #[serde(default = "EnabledIndexes::enabled")]
    pub consensus: bool,
    #[serde(default = "EnabledIndexes::enabled")]
    pub balances: bool,
    #[serde(default = "EnabledIndexes::enabled")]
    pub system_events: bool,
}

impl EnabledIndexes {
    const fn enabled() -> bool {
        true
    }

    pub const fn all() -> Self {
        Self {
            contracts: true,
            internal_transactions: true,
            set_code: true,
            consensus: true,
            balances: true,
            system_events: true,
        }
    }
}

impl Default for EnabledIndexes {
    fn default() -> Self {
        Self::all()
    }
}
