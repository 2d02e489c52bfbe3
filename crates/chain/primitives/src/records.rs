//! Secondary index records derived from primary chain data.

use alloy_primitives::{Address, Bytes, B256, I256, U256};
use serde::{Deserialize, Serialize};

use crate::bundle::CallType;
use crate::wbft::EpochInfo;

/// One transaction in an address's activity bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressTransaction {
    pub address: Address,
    pub block_number: u64,
    pub transaction_index: u32,
    pub transaction_hash: B256,
    /// Address sent the transaction.
    pub is_sender: bool,
    /// Address received the transaction (or is the created contract).
    pub is_recipient: bool,
}

/// Contract deployment, either top-level or from an internal CREATE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCreation {
    pub address: Address,
    pub creator: Address,
    pub transaction_hash: B256,
    pub block_number: u64,
    /// Length of the creation input (init code).
    pub init_code_size: u64,
    /// Trace call index when deployed by another contract.
    pub call_index: Option<u32>,
}

/// Verified source metadata. Mutable, last write wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractVerification {
    pub address: Address,
    pub contract_name: String,
    pub source_code: String,
    pub compiler_version: String,
    pub abi: String,
    pub optimization_runs: Option<u32>,
    pub verified: bool,
    /// Unix seconds of the last update.
    pub updated_at: u64,
}

/// A call frame below the top-level transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalTransaction {
    pub transaction_hash: B256,
    pub call_index: u32,
    pub block_number: u64,
    pub transaction_index: u32,
    pub call_type: CallType,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub gas: u64,
    pub gas_used: u64,
    pub input: Bytes,
    pub depth: u32,
    pub error: Option<String>,
}

/// ERC20 `Transfer` (two indexed addresses, value in data).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Erc20Transfer {
    pub contract: Address,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub transaction_hash: B256,
    pub log_index: u32,
    pub block_number: u64,
    pub transaction_index: u32,
}

/// ERC721 `Transfer` (addresses and token id all indexed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Erc721Transfer {
    pub contract: Address,
    pub from: Address,
    pub to: Address,
    pub token_id: U256,
    pub transaction_hash: B256,
    pub log_index: u32,
    pub block_number: u64,
    pub transaction_index: u32,
}

impl Erc721Transfer {
    /// Position used to order ownership updates.
    pub fn position(&self) -> (u64, u32) {
        (self.block_number, self.log_index)
    }
}

/// Current owner of a token, as of the latest transfer applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftOwnership {
    pub contract: Address,
    pub token_id: U256,
    pub owner: Address,
    pub block_number: u64,
    pub log_index: u32,
    pub transaction_hash: B256,
}

impl From<&Erc721Transfer> for NftOwnership {
    fn from(transfer: &Erc721Transfer) -> Self {
        Self {
            contract: transfer.contract,
            token_id: transfer.token_id,
            owner: transfer.to,
            block_number: transfer.block_number,
            log_index: transfer.log_index,
            transaction_hash: transfer.transaction_hash,
        }
    }
}

/// One EIP-7702 authorization entry and its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetCodeAuthorizationRecord {
    pub transaction_hash: B256,
    pub authorization_index: u32,
    pub block_number: u64,
    pub transaction_index: u32,
    pub chain_id: U256,
    /// Delegation target.
    pub target: Address,
    pub nonce: u64,
    /// Signer; unset when recovery failed.
    pub authority: Option<Address>,
    /// Whether the delegation took effect.
    pub applied: bool,
    pub error: Option<String>,
}

/// Per-block WBFT consensus data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WbftBlockRecord {
    pub block_number: u64,
    pub block_hash: B256,
    pub epoch: u64,
    pub proposer: Address,
    pub round: u32,
    pub prev_round: u32,
    pub prepared_sealers: Vec<Address>,
    pub committed_sealers: Vec<Address>,
    pub prev_prepared_sealers: Vec<Address>,
    pub prev_committed_sealers: Vec<Address>,
    pub gas_tip: U256,
}

/// Validator set snapshot keyed by epoch number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: u64,
    /// Block whose extra data announced this epoch.
    pub announced_at: u64,
    pub info: EpochInfo,
    /// Resolved validator addresses, in sealing order.
    pub validators: Vec<Address>,
}

/// Participation of one validator in one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorActivity {
    pub validator: Address,
    pub block_number: u64,
    pub prepared: bool,
    pub committed: bool,
}

/// Aggregate signing counters for a validator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSigningStats {
    pub validator: Address,
    pub prepare_signed: u64,
    pub prepare_missed: u64,
    pub commit_signed: u64,
    pub commit_missed: u64,
    pub last_signed_block: Option<u64>,
}

/// Signed balance change of an address at one height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDelta {
    pub address: Address,
    pub block_number: u64,
    pub delta: I256,
}

/// Absolute balance observed at a height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub address: Address,
    pub block_number: u64,
    pub balance: U256,
}

/// Balance reconstructed from the nearest snapshot plus later deltas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceAt {
    pub address: Address,
    pub block_number: u64,
    /// Negative only when history before the first snapshot is incomplete.
    pub balance: I256,
    /// Height of the snapshot used as base, `None` when summed from genesis.
    pub snapshot_block: Option<u64>,
}
