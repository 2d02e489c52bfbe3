//! Paginated reads over the chain store and its index families.

use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use chainidx_primitives::system::{
    fold_blacklist, fold_members, fold_minters, fold_proposals, fold_validators,
};
use chainidx_primitives::{
    AddressTransaction, BalanceAt, BalanceDelta, ContractCreation, ContractVerification,
    EpochRecord, Erc20Transfer, Erc721Transfer, InternalTransaction, MinterState, NftOwnership,
    Proposal, ReceiptView, SetCodeAuthorizationRecord, StoredBlock, StoredLog, StoredTransaction,
    SystemEvent, TxLocation, ValidatorActivity, ValidatorSigningStats, WbftBlockRecord,
};
use chainidx_store::{
    ChainStore, IndexCapabilities, Page, RangeQuery, StoreResult, StoreResultExt,
    SystemEventFilter, TokenTransferFilter,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::connection::{Connection, Cursor, TotalCount};
use crate::context::QueryContext;
use crate::error::{QueryError, QueryResult};
use crate::pagination::{forward_window, reverse_window, BlockRangeFilter, PageRequest, Regime};

/// Largest block span a transaction or log scan covers, as in `eth_getLogs`.
pub const DEFAULT_MAX_BLOCK_SPAN: u64 = 1000;

fn default_max_block_span() -> u64 {
    DEFAULT_MAX_BLOCK_SPAN
}

fn default_page_size() -> u64 {
    20
}

fn default_max_page_size() -> u64 {
    100
}

/// Query limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryConfig {
    #[serde(default = "default_max_block_span")]
    pub max_block_span: u64,
    #[serde(default = "default_page_size")]
    pub default_page_size: u64,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_block_span: default_max_block_span(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

/// A transaction with its position in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionNode {
    pub transaction: StoredTransaction,
    pub location: TxLocation,
}

impl TransactionNode {
    fn cursor(&self) -> Cursor {
        Cursor::new(self.location.block_number, self.location.transaction_index)
    }
}

/// Optional address restriction on a transaction scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransactionFilter {
    #[serde(default)]
    pub range: BlockRangeFilter,
    /// Sender or recipient.
    #[serde(default)]
    pub address: Option<Address>,
}

/// Log scan restrictions. Empty `addresses` accepts any emitter; each
/// `topics` position is a set of alternatives, `None` a wildcard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogFilter {
    #[serde(default)]
    pub range: BlockRangeFilter,
    #[serde(default)]
    pub addresses: Vec<Address>,
    #[serde(default)]
    pub topics: Vec<Option<Vec<B256>>>,
}

impl LogFilter {
    pub fn matches(&self, log: &StoredLog) -> bool {
        if !self.addresses.is_empty() && !self.addresses.contains(&log.address) {
            return false;
        }
        self.topics
            .iter()
            .enumerate()
            .all(|(position, alternatives)| match alternatives {
                None => true,
                Some(alternatives) => log
                    .topics
                    .get(position)
                    .is_some_and(|topic| alternatives.contains(topic)),
            })
    }
}

/// Creation and verification state of a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractInfo {
    pub address: Address,
    pub creation: Option<ContractCreation>,
    /// `None` while the contract is not verified.
    pub verification: Option<ContractVerification>,
}

/// Watermarks and aggregate counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChainStatus {
    pub latest_height: Option<u64>,
    pub raw_height: Option<u64>,
    pub block_count: Option<u64>,
    pub transaction_count: Option<u64>,
}

/// Block span actually scanned for a transaction or log query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScanRange {
    from: u64,
    to: u64,
    clamped: bool,
}

/// Read side of the indexer.
///
/// Each call captures the latest indexed height once and derives all of its
/// range arithmetic from that value.
pub struct QueryEngine<S> {
    store: Arc<S>,
    config: QueryConfig,
}

impl<S> Clone for QueryEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

fn capability<'a, T: ?Sized>(reader: Option<&'a T>, name: &'static str) -> QueryResult<&'a T> {
    reader.ok_or(QueryError::Unsupported(name))
}

impl<S: ChainStore + IndexCapabilities> QueryEngine<S> {
    pub fn new(store: Arc<S>, config: QueryConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    fn latest(&self) -> QueryResult<Option<u64>> {
        Ok(self.store.latest_height().optional()?)
    }

    fn resolve_page(&self, page: PageRequest) -> QueryResult<(u64, u64)> {
        page.resolve(self.config.default_page_size, self.config.max_page_size)
    }

    pub fn status(&self) -> QueryResult<ChainStatus> {
        let (block_count, transaction_count) = match self.store.counters() {
            Some(counters) => (
                Some(counters.block_count()?),
                Some(counters.transaction_count()?),
            ),
            None => (None, None),
        };
        Ok(ChainStatus {
            latest_height: self.latest()?,
            raw_height: self.store.raw_height().optional()?,
            block_count,
            transaction_count,
        })
    }

    // ---- blocks ----

    /// Blocks newest first, or oldest first within an explicit range.
    pub fn blocks(
        &self,
        ctx: &QueryContext,
        filter: BlockRangeFilter,
        page: PageRequest,
    ) -> QueryResult<Connection<StoredBlock>> {
        filter.validate()?;
        let (offset, limit) = self.resolve_page(page)?;
        let regime = filter.regime();

        let Some(latest) = self.latest()? else {
            return Ok(Connection::empty(TotalCount::exact(0), offset > 0));
        };
        ctx.check()?;

        let (window, total) = match regime {
            Regime::Reverse => {
                let total = match self.store.counters() {
                    Some(counters) => TotalCount::exact(counters.block_count()?),
                    None => TotalCount::lower_bound(latest + 1),
                };
                (reverse_window(latest, offset, limit), total)
            }
            Regime::Forward => {
                let (from, to) = filter.with_defaults(latest).bounds(latest);
                let to = to.min(latest);
                if from > to {
                    return Ok(Connection::empty(TotalCount::exact(0), offset > 0));
                }
                let total = TotalCount::exact(to - from + 1);
                (forward_window(from, to, offset, limit), total)
            }
        };

        let Some(window) = window else {
            return Ok(Connection::empty(total, offset > 0));
        };

        let mut blocks = self.store.get_blocks(window.start_block, window.end_block)?;
        if regime == Regime::Reverse {
            blocks.reverse();
        }
        debug!(
            start = window.start_block,
            end = window.end_block,
            returned = blocks.len(),
            "Block page"
        );

        Ok(Connection::new(
            blocks,
            total,
            window.has_next_page,
            window.has_previous_page,
            |block| Cursor::block(block.number),
        ))
    }

    pub fn block(&self, number: u64) -> QueryResult<Option<StoredBlock>> {
        Ok(self.store.get_block(number).optional()?)
    }

    pub fn block_by_hash(&self, hash: B256) -> QueryResult<Option<StoredBlock>> {
        Ok(self.store.get_block_by_hash(hash).optional()?)
    }

    // ---- transactions and logs ----

    /// Span covered by a transaction or log scan: `[0, latest]` by default,
    /// cut to the newest `max_block_span` heights.
    fn scan_range(&self, filter: &BlockRangeFilter, latest: u64) -> Option<ScanRange> {
        let (from, to) = filter.bounds(latest);
        let to = to.min(latest);
        if from > to {
            return None;
        }
        let span = self.config.max_block_span.max(1);
        let min_from = to.saturating_sub(span - 1);
        Some(ScanRange {
            from: from.max(min_from),
            to,
            clamped: from < min_from,
        })
    }

    pub fn transaction(&self, hash: B256) -> QueryResult<Option<TransactionNode>> {
        Ok(self
            .store
            .get_transaction(hash)
            .optional()?
            .map(|(transaction, location)| TransactionNode {
                transaction,
                location,
            }))
    }

    /// Transactions newest first.
    ///
    /// With an address and an address index the page comes straight from the
    /// index with an exact total. Otherwise blocks are scanned; the total then
    /// counts what the scan saw and is exact only when the span was not
    /// clamped, except for the unfiltered case, which uses the transaction
    /// counter.
    pub fn transactions(
        &self,
        ctx: &QueryContext,
        filter: TransactionFilter,
        page: PageRequest,
    ) -> QueryResult<Connection<TransactionNode>> {
        filter.range.validate()?;
        let (offset, limit) = self.resolve_page(page)?;

        let Some(latest) = self.latest()? else {
            return Ok(Connection::empty(TotalCount::exact(0), offset > 0));
        };

        if let (Some(address), Some(index)) = (filter.address, self.store.address_index()) {
            ctx.check()?;
            let (from, to) = filter.range.bounds(latest);
            let range = RangeQuery {
                from_block: Some(from),
                to_block: Some(to.min(latest)),
                offset,
                limit,
                descending: true,
            };
            let page = index.address_transactions(address, &range)?;
            return self.resolve_address_page(page, offset);
        }

        let Some(scan) = self.scan_range(&filter.range, latest) else {
            return Ok(Connection::empty(TotalCount::exact(0), offset > 0));
        };

        let mut collected = Vec::new();
        for number in scan.from..=scan.to {
            ctx.check()?;
            let Some(block) = self.store.get_block(number).optional()? else {
                continue;
            };
            let transactions = self.store.get_block_transactions(number)?;
            for (index, transaction) in transactions.into_iter().enumerate() {
                if let Some(address) = filter.address {
                    if transaction.from != address && transaction.to != Some(address) {
                        continue;
                    }
                }
                collected.push(TransactionNode {
                    transaction,
                    location: TxLocation {
                        block_number: number,
                        block_hash: block.hash,
                        transaction_index: index as u32,
                    },
                });
            }
        }
        collected.reverse();

        let unfiltered = filter.address.is_none() && !filter.range.is_explicit();
        let total = match (unfiltered, self.store.counters()) {
            (true, Some(counters)) => TotalCount::exact(counters.transaction_count()?),
            _ if scan.clamped => TotalCount::lower_bound(collected.len() as u64),
            _ => TotalCount::exact(collected.len() as u64),
        };

        Ok(Connection::from_collected(
            collected,
            total,
            offset,
            limit,
            TransactionNode::cursor,
        ))
    }

    fn resolve_address_page(
        &self,
        page: Page<AddressTransaction>,
        offset: u64,
    ) -> QueryResult<Connection<TransactionNode>> {
        let hashes: Vec<B256> = page
            .items
            .iter()
            .map(|entry| entry.transaction_hash)
            .collect();
        let nodes = self
            .store
            .get_transactions(&hashes)
            .into_iter()
            .map(|result| {
                result.map(|(transaction, location)| TransactionNode {
                    transaction,
                    location,
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;

        let has_next_page = offset + (nodes.len() as u64) < page.total;
        Ok(Connection::new(
            nodes,
            TotalCount::exact(page.total),
            has_next_page,
            offset > 0,
            TransactionNode::cursor,
        ))
    }

    /// Logs newest first. The total counts the scanned span.
    pub fn logs(
        &self,
        ctx: &QueryContext,
        filter: &LogFilter,
        page: PageRequest,
    ) -> QueryResult<Connection<StoredLog>> {
        filter.range.validate()?;
        let (offset, limit) = self.resolve_page(page)?;

        let Some(latest) = self.latest()? else {
            return Ok(Connection::empty(TotalCount::exact(0), offset > 0));
        };
        let Some(scan) = self.scan_range(&filter.range, latest) else {
            return Ok(Connection::empty(TotalCount::exact(0), offset > 0));
        };

        let mut collected = Vec::new();
        for number in scan.from..=scan.to {
            ctx.check()?;
            collected.extend(
                self.store
                    .get_logs_by_block(number)?
                    .into_iter()
                    .filter(|log| filter.matches(log)),
            );
        }
        collected.reverse();

        let total = if scan.clamped {
            TotalCount::lower_bound(collected.len() as u64)
        } else {
            TotalCount::exact(collected.len() as u64)
        };
        Ok(Connection::from_collected(
            collected,
            total,
            offset,
            limit,
            |log| Cursor::new(log.block_number, log.log_index),
        ))
    }

    pub fn receipt(&self, hash: B256) -> QueryResult<Option<ReceiptView>> {
        Ok(self.store.get_receipt_view(hash).optional()?)
    }

    // ---- index families ----

    /// One page of an index family. Newest first unless the caller supplied
    /// an explicit range; totals come from the index and are exact.
    fn index_page<T>(
        &self,
        ctx: &QueryContext,
        range: &BlockRangeFilter,
        page: PageRequest,
        read: impl FnOnce(&RangeQuery) -> StoreResult<Page<T>>,
        cursor_of: impl Fn(&T) -> Cursor,
    ) -> QueryResult<Connection<T>> {
        range.validate()?;
        let (offset, limit) = self.resolve_page(page)?;

        let Some(latest) = self.latest()? else {
            return Ok(Connection::empty(TotalCount::exact(0), offset > 0));
        };
        ctx.check()?;

        let (from, to) = range.bounds(latest);
        let query = RangeQuery {
            from_block: Some(from),
            to_block: Some(to.min(latest)),
            offset,
            limit,
            descending: range.regime() == Regime::Reverse,
        };
        let page = read(&query)?;
        let has_next_page = offset + (page.items.len() as u64) < page.total;
        Ok(Connection::new(
            page.items,
            TotalCount::exact(page.total),
            has_next_page,
            offset > 0,
            cursor_of,
        ))
    }

    /// Address activity entries (sender/recipient flags per transaction).
    pub fn address_activity(
        &self,
        ctx: &QueryContext,
        address: Address,
        range: BlockRangeFilter,
        page: PageRequest,
    ) -> QueryResult<Connection<AddressTransaction>> {
        let index = capability(self.store.address_index(), "address activity")?;
        self.index_page(
            ctx,
            &range,
            page,
            |query| index.address_transactions(address, query),
            |entry| Cursor::new(entry.block_number, entry.transaction_index),
        )
    }

    pub fn erc20_transfers(
        &self,
        ctx: &QueryContext,
        filter: TokenTransferFilter,
        range: BlockRangeFilter,
        page: PageRequest,
    ) -> QueryResult<Connection<Erc20Transfer>> {
        let reader = capability(self.store.token_transfers(), "token transfers")?;
        self.index_page(
            ctx,
            &range,
            page,
            |query| reader.erc20_transfers(&filter, query),
            |transfer| Cursor::new(transfer.block_number, transfer.log_index),
        )
    }

    pub fn erc721_transfers(
        &self,
        ctx: &QueryContext,
        filter: TokenTransferFilter,
        range: BlockRangeFilter,
        page: PageRequest,
    ) -> QueryResult<Connection<Erc721Transfer>> {
        let reader = capability(self.store.token_transfers(), "token transfers")?;
        self.index_page(
            ctx,
            &range,
            page,
            |query| reader.erc721_transfers(&filter, query),
            |transfer| Cursor::new(transfer.block_number, transfer.log_index),
        )
    }

    pub fn transaction_token_transfers(
        &self,
        hash: B256,
    ) -> QueryResult<(Vec<Erc20Transfer>, Vec<Erc721Transfer>)> {
        let reader = capability(self.store.token_transfers(), "token transfers")?;
        Ok(reader.token_transfers_by_transaction(hash)?)
    }

    /// Current owner of an NFT; `None` if no transfer was indexed.
    pub fn nft_owner(&self, contract: Address, token_id: U256) -> QueryResult<Option<NftOwnership>> {
        let reader = capability(self.store.token_transfers(), "token transfers")?;
        Ok(reader.nft_owner(contract, token_id).optional()?)
    }

    pub fn nfts_owned_by(
        &self,
        ctx: &QueryContext,
        owner: Address,
        page: PageRequest,
    ) -> QueryResult<Connection<NftOwnership>> {
        let reader = capability(self.store.token_transfers(), "token transfers")?;
        self.index_page(
            ctx,
            &BlockRangeFilter::unbounded(),
            page,
            |query| reader.nfts_owned_by(owner, query),
            |nft| Cursor::new(nft.block_number, nft.log_index),
        )
    }

    pub fn contract_info(&self, address: Address) -> QueryResult<ContractInfo> {
        let reader = capability(self.store.contracts(), "contracts")?;
        Ok(ContractInfo {
            address,
            creation: reader.contract_creation(address).optional()?,
            verification: reader.contract_verification(address).optional()?,
        })
    }

    pub fn contracts_created_by(
        &self,
        ctx: &QueryContext,
        creator: Address,
        page: PageRequest,
    ) -> QueryResult<Connection<ContractCreation>> {
        let reader = capability(self.store.contracts(), "contracts")?;
        self.index_page(
            ctx,
            &BlockRangeFilter::unbounded(),
            page,
            |query| reader.contracts_created_by(creator, query),
            |creation| Cursor::block(creation.block_number),
        )
    }

    pub fn internal_transactions(&self, hash: B256) -> QueryResult<Vec<InternalTransaction>> {
        let reader = capability(self.store.internal_transactions(), "internal transactions")?;
        Ok(reader.internal_transactions_by_transaction(hash)?)
    }

    pub fn internal_transactions_by_address(
        &self,
        ctx: &QueryContext,
        address: Address,
        range: BlockRangeFilter,
        page: PageRequest,
    ) -> QueryResult<Connection<InternalTransaction>> {
        let reader = capability(self.store.internal_transactions(), "internal transactions")?;
        self.index_page(
            ctx,
            &range,
            page,
            |query| reader.internal_transactions_by_address(address, query),
            |call| Cursor::new(call.block_number, call.transaction_index),
        )
    }

    /// Computed from the call frames on every request.
    pub fn internal_transaction_count(&self, address: Address) -> QueryResult<u64> {
        let reader = capability(self.store.internal_transactions(), "internal transactions")?;
        Ok(reader.internal_transaction_count(address)?)
    }

    pub fn set_code_authorizations(
        &self,
        hash: B256,
    ) -> QueryResult<Vec<SetCodeAuthorizationRecord>> {
        let reader = capability(self.store.set_code(), "set-code authorizations")?;
        Ok(reader.set_code_authorizations_by_transaction(hash)?)
    }

    pub fn set_code_authorizations_by_address(
        &self,
        ctx: &QueryContext,
        address: Address,
        range: BlockRangeFilter,
        page: PageRequest,
    ) -> QueryResult<Connection<SetCodeAuthorizationRecord>> {
        let reader = capability(self.store.set_code(), "set-code authorizations")?;
        self.index_page(
            ctx,
            &range,
            page,
            |query| reader.set_code_authorizations_by_address(address, query),
            |record| Cursor::new(record.block_number, record.transaction_index),
        )
    }

    // ---- consensus ----

    pub fn wbft_block(&self, number: u64) -> QueryResult<Option<WbftBlockRecord>> {
        let reader = capability(self.store.consensus(), "consensus")?;
        Ok(reader.wbft_block(number).optional()?)
    }

    /// Validator set in force during `epoch`.
    pub fn epoch_info(&self, epoch: u64) -> QueryResult<Option<EpochRecord>> {
        let reader = capability(self.store.consensus(), "consensus")?;
        Ok(reader.epoch_in_force(epoch).optional()?)
    }

    pub fn validator_stats(&self, validator: Address) -> QueryResult<Option<ValidatorSigningStats>> {
        let reader = capability(self.store.consensus(), "consensus")?;
        Ok(reader.validator_stats(validator).optional()?)
    }

    pub fn all_validator_stats(&self) -> QueryResult<Vec<ValidatorSigningStats>> {
        let reader = capability(self.store.consensus(), "consensus")?;
        Ok(reader.all_validator_stats()?)
    }

    pub fn validator_activity(
        &self,
        ctx: &QueryContext,
        validator: Address,
        range: BlockRangeFilter,
        page: PageRequest,
    ) -> QueryResult<Connection<ValidatorActivity>> {
        let reader = capability(self.store.consensus(), "consensus")?;
        self.index_page(
            ctx,
            &range,
            page,
            |query| reader.validator_activity(validator, query),
            |activity| Cursor::block(activity.block_number),
        )
    }

    // ---- balances ----

    /// Balance at `height`, or at the latest indexed height.
    pub fn balance_at(&self, address: Address, height: Option<u64>) -> QueryResult<BalanceAt> {
        let reader = capability(self.store.balances(), "balance history")?;
        let height = match height {
            Some(height) => height,
            None => self.latest()?.unwrap_or(0),
        };
        Ok(reader.balance_at(address, height)?)
    }

    pub fn balance_history(
        &self,
        ctx: &QueryContext,
        address: Address,
        range: BlockRangeFilter,
        page: PageRequest,
    ) -> QueryResult<Connection<BalanceDelta>> {
        let reader = capability(self.store.balances(), "balance history")?;
        self.index_page(
            ctx,
            &range,
            page,
            |query| reader.balance_deltas(address, query),
            |delta| Cursor::block(delta.block_number),
        )
    }

    // ---- governance read models ----

    pub fn system_events(
        &self,
        ctx: &QueryContext,
        filter: &SystemEventFilter,
        range: BlockRangeFilter,
        page: PageRequest,
    ) -> QueryResult<Connection<SystemEvent>> {
        let reader = capability(self.store.system_event_index(), "system events")?;
        self.index_page(
            ctx,
            &range,
            page,
            |query| reader.system_events(filter, query),
            |event| Cursor::new(event.block_number, event.log_index),
        )
    }

    fn fold_events<T>(
        &self,
        event_types: &[&'static str],
        contract: Option<Address>,
        fold: impl FnOnce(&[SystemEvent]) -> T,
    ) -> QueryResult<T> {
        let reader = capability(self.store.system_event_index(), "system events")?;
        let filter = SystemEventFilter {
            event_types: event_types.to_vec(),
            contract,
            subject: None,
        };
        let events = reader.all_system_events(&filter)?;
        Ok(fold(&events))
    }

    pub fn proposals(&self, contract: Option<Address>) -> QueryResult<Vec<Proposal>> {
        self.fold_events(
            &["proposal_created", "proposal_voted", "proposal_executed"],
            contract,
            |events| fold_proposals(events),
        )
    }

    pub fn proposal(&self, contract: Address, proposal_id: U256) -> QueryResult<Option<Proposal>> {
        Ok(self
            .proposals(Some(contract))?
            .into_iter()
            .find(|proposal| proposal.proposal_id == proposal_id))
    }

    pub fn active_minters(&self, contract: Option<Address>) -> QueryResult<Vec<MinterState>> {
        self.fold_events(
            &["minter_configured", "minter_removed", "mint", "burn"],
            contract,
            |events| fold_minters(events),
        )
    }

    pub fn blacklist(&self, contract: Option<Address>) -> QueryResult<Vec<Address>> {
        self.fold_events(&["blacklisted", "un_blacklisted"], contract, |events| {
            fold_blacklist(events)
        })
    }

    pub fn members(&self, contract: Option<Address>) -> QueryResult<Vec<Address>> {
        self.fold_events(&["member_added", "member_removed"], contract, |events| {
            fold_members(events)
        })
    }

    pub fn governance_validators(&self, contract: Option<Address>) -> QueryResult<Vec<Address>> {
        self.fold_events(&["validator_added", "validator_removed"], contract, |events| {
            fold_validators(events)
        })
    }
}

#[cfg(test)]
mod tests;
