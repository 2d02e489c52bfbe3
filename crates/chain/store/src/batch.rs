//! Secondary records derived for one height.

use chainidx_primitives::{
    AddressTransaction, BalanceDelta, BalanceSnapshot, ContractCreation, EpochRecord,
    Erc20Transfer, Erc721Transfer, InternalTransaction, SetCodeAuthorizationRecord, SystemEvent,
    ValidatorActivity, WbftBlockRecord,
};

use crate::error::{StoreError, StoreResult};

/// Everything the index maintainer derived from one block.
///
/// Written atomically with (or after) the block's primary data. NFT ownership
/// and validator signing counters are not part of the batch: the store
/// recomputes them from `erc721_transfers` and `validator_activity`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexBatch {
    pub height: u64,
    pub address_transactions: Vec<AddressTransaction>,
    pub erc20_transfers: Vec<Erc20Transfer>,
    pub erc721_transfers: Vec<Erc721Transfer>,
    pub contract_creations: Vec<ContractCreation>,
    pub internal_transactions: Vec<InternalTransaction>,
    pub set_code_authorizations: Vec<SetCodeAuthorizationRecord>,
    pub wbft_block: Option<WbftBlockRecord>,
    /// Epoch announced in this block's extra data.
    pub epoch: Option<EpochRecord>,
    pub validator_activity: Vec<ValidatorActivity>,
    pub balance_deltas: Vec<BalanceDelta>,
    pub balance_snapshots: Vec<BalanceSnapshot>,
    pub system_events: Vec<SystemEvent>,
}

impl IndexBatch {
    pub fn new(height: u64) -> Self {
        Self {
            height,
            ..Self::default()
        }
    }

    /// Number of rows the batch will write.
    pub fn record_count(&self) -> usize {
        self.address_transactions.len()
            + self.erc20_transfers.len()
            + self.erc721_transfers.len()
            + self.contract_creations.len()
            + self.internal_transactions.len()
            + self.set_code_authorizations.len()
            + usize::from(self.wbft_block.is_some())
            + usize::from(self.epoch.is_some())
            + self.validator_activity.len()
            + self.balance_deltas.len()
            + self.balance_snapshots.len()
            + self.system_events.len()
    }

    /// Every record must belong to the batch height.
    pub fn check_height(&self) -> StoreResult<()> {
        let height = self.height;
        let heights = self
            .address_transactions
            .iter()
            .map(|r| r.block_number)
            .chain(self.erc20_transfers.iter().map(|r| r.block_number))
            .chain(self.erc721_transfers.iter().map(|r| r.block_number))
            .chain(self.contract_creations.iter().map(|r| r.block_number))
            .chain(self.internal_transactions.iter().map(|r| r.block_number))
            .chain(self.set_code_authorizations.iter().map(|r| r.block_number))
            .chain(self.wbft_block.iter().map(|r| r.block_number))
            .chain(self.epoch.iter().map(|r| r.announced_at))
            .chain(self.validator_activity.iter().map(|r| r.block_number))
            .chain(self.balance_deltas.iter().map(|r| r.block_number))
            .chain(self.balance_snapshots.iter().map(|r| r.block_number))
            .chain(self.system_events.iter().map(|r| r.block_number));

        for other in heights {
            if other != height {
                return Err(StoreError::InvalidInput(format!(
                    "index batch for height {height} contains a record for height {other}"
                )));
            }
        }
        Ok(())
    }
}
