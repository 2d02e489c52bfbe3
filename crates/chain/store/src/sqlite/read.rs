//! Secondary index readers for [`SqliteChainStore`].

use alloy_primitives::{Address, B256, I256, U256};
use chainidx_primitives::{
    AddressTransaction, BalanceAt, BalanceDelta, BalanceSnapshot, ContractCreation,
    ContractVerification, EpochRecord, Erc20Transfer, Erc721Transfer, InternalTransaction,
    NftOwnership, SetCodeAuthorizationRecord, SystemEvent, ValidatorActivity,
    ValidatorSigningStats, WbftBlockRecord,
};
use rusqlite::{params, OptionalExtension, Row};

use super::scan::{blob, int, Scan};
use super::write::{read_meta, META_BLOCK_COUNT, META_TRANSACTION_COUNT};
use super::SqliteChainStore;
use crate::capabilities::{
    AddressIndexReader, AggregateCounters, BalanceHistoryReader, ConsensusReader,
    ContractIndexReader, ContractVerificationWriter, InternalTransactionReader, Page,
    RangeQuery, SetCodeReader, SystemEventFilter, SystemEventReader, TokenTransferFilter,
    TokenTransferReader,
};
use crate::codec::{
    address_column, b256_column, i256_column, json_column, to_json,
    u256_bytes, u256_column, u32_column, u64_column,
};
use crate::error::{StoreError, StoreResult};

const ADDRESS_TX_COLUMNS: &str =
    "address, block_number, transaction_index, transaction_hash, is_sender, is_recipient";

fn address_transaction_row(row: &Row<'_>) -> rusqlite::Result<AddressTransaction> {
    Ok(AddressTransaction {
        address: address_column(row, 0)?,
        block_number: u64_column(row, 1)?,
        transaction_index: u32_column(row, 2)?,
        transaction_hash: b256_column(row, 3)?,
        is_sender: row.get(4)?,
        is_recipient: row.get(5)?,
    })
}

const TRANSFER_COLUMNS: &str =
    "contract, from_addr, to_addr, value, transaction_hash, log_index, block_number, transaction_index";

const NFT_TRANSFER_COLUMNS: &str =
    "contract, from_addr, to_addr, token_id, transaction_hash, log_index, block_number, transaction_index";

fn erc20_row(row: &Row<'_>) -> rusqlite::Result<Erc20Transfer> {
    Ok(Erc20Transfer {
        contract: address_column(row, 0)?,
        from: address_column(row, 1)?,
        to: address_column(row, 2)?,
        value: u256_column(row, 3)?,
        transaction_hash: b256_column(row, 4)?,
        log_index: u32_column(row, 5)?,
        block_number: u64_column(row, 6)?,
        transaction_index: u32_column(row, 7)?,
    })
}

fn erc721_row(row: &Row<'_>) -> rusqlite::Result<Erc721Transfer> {
    Ok(Erc721Transfer {
        contract: address_column(row, 0)?,
        from: address_column(row, 1)?,
        to: address_column(row, 2)?,
        token_id: u256_column(row, 3)?,
        transaction_hash: b256_column(row, 4)?,
        log_index: u32_column(row, 5)?,
        block_number: u64_column(row, 6)?,
        transaction_index: u32_column(row, 7)?,
    })
}

const NFT_OWNER_COLUMNS: &str =
    "contract, token_id, owner, block_number, log_index, transaction_hash";

fn nft_owner_row(row: &Row<'_>) -> rusqlite::Result<NftOwnership> {
    Ok(NftOwnership {
        contract: address_column(row, 0)?,
        token_id: u256_column(row, 1)?,
        owner: address_column(row, 2)?,
        block_number: u64_column(row, 3)?,
        log_index: u32_column(row, 4)?,
        transaction_hash: b256_column(row, 5)?,
    })
}

const CONTRACT_COLUMNS: &str =
    "address, creator, transaction_hash, block_number, init_code_size, call_index";

fn contract_creation_row(row: &Row<'_>) -> rusqlite::Result<ContractCreation> {
    let call_index: Option<i64> = row.get(5)?;
    Ok(ContractCreation {
        address: address_column(row, 0)?,
        creator: address_column(row, 1)?,
        transaction_hash: b256_column(row, 2)?,
        block_number: u64_column(row, 3)?,
        init_code_size: u64_column(row, 4)?,
        call_index: call_index.map(|i| i as u32),
    })
}

const STATS_COLUMNS: &str =
    "validator, prepare_signed, prepare_missed, commit_signed, commit_missed, last_signed_block";

fn stats_row(row: &Row<'_>) -> rusqlite::Result<ValidatorSigningStats> {
    let last_signed_block: Option<i64> = row.get(5)?;
    Ok(ValidatorSigningStats {
        validator: address_column(row, 0)?,
        prepare_signed: u64_column(row, 1)?,
        prepare_missed: u64_column(row, 2)?,
        commit_signed: u64_column(row, 3)?,
        commit_missed: u64_column(row, 4)?,
        last_signed_block: last_signed_block.map(|b| b as u64),
    })
}

fn activity_row(row: &Row<'_>) -> rusqlite::Result<ValidatorActivity> {
    Ok(ValidatorActivity {
        validator: address_column(row, 0)?,
        block_number: u64_column(row, 1)?,
        prepared: row.get(2)?,
        committed: row.get(3)?,
    })
}

fn delta_row(row: &Row<'_>) -> rusqlite::Result<BalanceDelta> {
    Ok(BalanceDelta {
        address: address_column(row, 0)?,
        block_number: u64_column(row, 1)?,
        delta: i256_column(row, 2)?,
    })
}

fn snapshot_row(row: &Row<'_>) -> rusqlite::Result<BalanceSnapshot> {
    Ok(BalanceSnapshot {
        address: address_column(row, 0)?,
        block_number: u64_column(row, 1)?,
        balance: u256_column(row, 2)?,
    })
}

fn body_row<T: serde::de::DeserializeOwned>(row: &Row<'_>) -> rusqlite::Result<T> {
    json_column(row, 0)
}

fn token_scan(
    table: &'static str,
    columns: &'static str,
    filter: &TokenTransferFilter,
    range: &RangeQuery,
) -> Scan {
    Scan::new(table, columns)
        .filter_if(filter.contract.map(|c| blob(c.as_slice())), "contract = ?", 1)
        .filter_if(
            filter.account.map(|a| blob(a.as_slice())),
            "(from_addr = ? OR to_addr = ?)",
            2,
        )
        .blocks("block_number", range)
}

fn system_event_scan(filter: &SystemEventFilter) -> Scan {
    let mut scan = Scan::new("system_events", "body");
    if !filter.event_types.is_empty() {
        let placeholders = vec!["?"; filter.event_types.len()].join(", ");
        scan = scan.filter(
            format!("event_type IN ({placeholders})"),
            filter
                .event_types
                .iter()
                .map(|name| rusqlite::types::Value::Text((*name).to_string())),
        );
    }
    scan.filter_if(filter.contract.map(|c| blob(c.as_slice())), "contract = ?", 1)
        .filter_if(filter.subject.map(|s| blob(s.as_slice())), "subject = ?", 1)
}

impl AddressIndexReader for SqliteChainStore {
    fn address_transactions(
        &self,
        address: Address,
        range: &RangeQuery,
    ) -> StoreResult<Page<AddressTransaction>> {
        let conn = self.read_conn()?;
        Scan::new("address_transactions", ADDRESS_TX_COLUMNS)
            .filter("address = ?", [blob(address.as_slice())])
            .blocks("block_number", range)
            .page(
                &conn,
                &["block_number", "transaction_index"],
                range,
                address_transaction_row,
            )
    }
}

impl TokenTransferReader for SqliteChainStore {
    fn erc20_transfers(
        &self,
        filter: &TokenTransferFilter,
        range: &RangeQuery,
    ) -> StoreResult<Page<Erc20Transfer>> {
        let conn = self.read_conn()?;
        token_scan("erc20_transfers", TRANSFER_COLUMNS, filter, range).page(
            &conn,
            &["block_number", "log_index"],
            range,
            erc20_row,
        )
    }

    fn erc721_transfers(
        &self,
        filter: &TokenTransferFilter,
        range: &RangeQuery,
    ) -> StoreResult<Page<Erc721Transfer>> {
        let conn = self.read_conn()?;
        token_scan("erc721_transfers", NFT_TRANSFER_COLUMNS, filter, range).page(
            &conn,
            &["block_number", "log_index"],
            range,
            erc721_row,
        )
    }

    fn token_transfers_by_transaction(
        &self,
        tx_hash: B256,
    ) -> StoreResult<(Vec<Erc20Transfer>, Vec<Erc721Transfer>)> {
        let conn = self.read_conn()?;
        let erc20 = Scan::new("erc20_transfers", TRANSFER_COLUMNS)
            .filter("transaction_hash = ?", [blob(tx_hash.as_slice())])
            .all(&conn, &["log_index"], erc20_row)?;
        let erc721 = Scan::new("erc721_transfers", NFT_TRANSFER_COLUMNS)
            .filter("transaction_hash = ?", [blob(tx_hash.as_slice())])
            .all(&conn, &["log_index"], erc721_row)?;
        Ok((erc20, erc721))
    }

    fn nft_owner(&self, contract: Address, token_id: U256) -> StoreResult<NftOwnership> {
        let conn = self.read_conn()?;
        conn.query_row(
            &format!("SELECT {NFT_OWNER_COLUMNS} FROM nft_owners WHERE contract = ? AND token_id = ?"),
            params![contract.as_slice(), u256_bytes(token_id).as_slice()],
            nft_owner_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::record("nft owner", format!("{contract}/{token_id}")))
    }

    fn nfts_owned_by(&self, owner: Address, range: &RangeQuery) -> StoreResult<Page<NftOwnership>> {
        let conn = self.read_conn()?;
        Scan::new("nft_owners", NFT_OWNER_COLUMNS)
            .filter("owner = ?", [blob(owner.as_slice())])
            .blocks("block_number", range)
            .page(&conn, &["block_number", "log_index"], range, nft_owner_row)
    }
}

impl ContractIndexReader for SqliteChainStore {
    fn contract_creation(&self, address: Address) -> StoreResult<ContractCreation> {
        let conn = self.read_conn()?;
        conn.query_row(
            &format!("SELECT {CONTRACT_COLUMNS} FROM contract_creations WHERE address = ?"),
            params![address.as_slice()],
            contract_creation_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::record("contract", address))
    }

    fn contracts_created_by(
        &self,
        creator: Address,
        range: &RangeQuery,
    ) -> StoreResult<Page<ContractCreation>> {
        let conn = self.read_conn()?;
        Scan::new("contract_creations", CONTRACT_COLUMNS)
            .filter("creator = ?", [blob(creator.as_slice())])
            .blocks("block_number", range)
            .page(&conn, &["block_number", "address"], range, contract_creation_row)
    }

    fn contract_verification(&self, address: Address) -> StoreResult<ContractVerification> {
        let conn = self.read_conn()?;
        conn.query_row(
            "SELECT body FROM contract_verifications WHERE address = ?",
            params![address.as_slice()],
            body_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::record("contract verification", address))
    }
}

impl ContractVerificationWriter for SqliteChainStore {
    fn set_contract_verification(&self, verification: &ContractVerification) -> StoreResult<()> {
        let conn = self.writer.lock();
        conn.execute(
            "INSERT OR REPLACE INTO contract_verifications (address, updated_at, body)
             VALUES (?, ?, ?)",
            params![
                verification.address.as_slice(),
                verification.updated_at as i64,
                to_json(verification)?,
            ],
        )?;
        tracing::debug!(address = %verification.address, "Stored contract verification");
        Ok(())
    }
}

impl InternalTransactionReader for SqliteChainStore {
    fn internal_transactions_by_transaction(
        &self,
        tx_hash: B256,
    ) -> StoreResult<Vec<InternalTransaction>> {
        let conn = self.read_conn()?;
        Scan::new("internal_transactions", "body")
            .filter("transaction_hash = ?", [blob(tx_hash.as_slice())])
            .all(&conn, &["call_index"], body_row)
    }

    fn internal_transactions_by_address(
        &self,
        address: Address,
        range: &RangeQuery,
    ) -> StoreResult<Page<InternalTransaction>> {
        let conn = self.read_conn()?;
        Scan::new("internal_transactions", "body")
            .filter_if(
                Some(blob(address.as_slice())),
                "(from_addr = ? OR to_addr = ?)",
                2,
            )
            .blocks("block_number", range)
            .page(
                &conn,
                &["block_number", "transaction_index", "call_index"],
                range,
                body_row,
            )
    }

    fn internal_transaction_count(&self, address: Address) -> StoreResult<u64> {
        let conn = self.read_conn()?;
        Scan::new("internal_transactions", "body")
            .filter_if(
                Some(blob(address.as_slice())),
                "(from_addr = ? OR to_addr = ?)",
                2,
            )
            .count(&conn)
    }
}

impl SetCodeReader for SqliteChainStore {
    fn set_code_authorizations_by_transaction(
        &self,
        tx_hash: B256,
    ) -> StoreResult<Vec<SetCodeAuthorizationRecord>> {
        let conn = self.read_conn()?;
        Scan::new("setcode_authorizations", "body")
            .filter("transaction_hash = ?", [blob(tx_hash.as_slice())])
            .all(&conn, &["authorization_index"], body_row)
    }

    fn set_code_authorizations_by_address(
        &self,
        address: Address,
        range: &RangeQuery,
    ) -> StoreResult<Page<SetCodeAuthorizationRecord>> {
        let conn = self.read_conn()?;
        Scan::new("setcode_authorizations", "body")
            .filter_if(
                Some(blob(address.as_slice())),
                "(authority = ? OR target = ?)",
                2,
            )
            .blocks("block_number", range)
            .page(
                &conn,
                &["block_number", "transaction_index", "authorization_index"],
                range,
                body_row,
            )
    }
}

impl ConsensusReader for SqliteChainStore {
    fn wbft_block(&self, number: u64) -> StoreResult<WbftBlockRecord> {
        let conn = self.read_conn()?;
        conn.query_row(
            "SELECT body FROM wbft_blocks WHERE block_number = ?",
            params![number as i64],
            body_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::record("wbft block", number))
    }

    fn epoch(&self, epoch: u64) -> StoreResult<EpochRecord> {
        let conn = self.read_conn()?;
        conn.query_row(
            "SELECT body FROM wbft_epochs WHERE epoch = ?",
            params![epoch as i64],
            body_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::record("epoch", epoch))
    }

    fn epoch_in_force(&self, epoch: u64) -> StoreResult<EpochRecord> {
        let conn = self.read_conn()?;
        conn.query_row(
            "SELECT body FROM wbft_epochs WHERE epoch <= ? ORDER BY epoch DESC LIMIT 1",
            params![epoch as i64],
            body_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::record("epoch", epoch))
    }

    fn validator_stats(&self, validator: Address) -> StoreResult<ValidatorSigningStats> {
        let conn = self.read_conn()?;
        conn.query_row(
            &format!("SELECT {STATS_COLUMNS} FROM validator_stats WHERE validator = ?"),
            params![validator.as_slice()],
            stats_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::record("validator stats", validator))
    }

    fn all_validator_stats(&self) -> StoreResult<Vec<ValidatorSigningStats>> {
        let conn = self.read_conn()?;
        Scan::new("validator_stats", STATS_COLUMNS).all(&conn, &["validator"], stats_row)
    }

    fn validator_activity(
        &self,
        validator: Address,
        range: &RangeQuery,
    ) -> StoreResult<Page<ValidatorActivity>> {
        let conn = self.read_conn()?;
        Scan::new("validator_activity", "validator, block_number, prepared, committed")
            .filter("validator = ?", [blob(validator.as_slice())])
            .blocks("block_number", range)
            .page(&conn, &["block_number"], range, activity_row)
    }
}

impl BalanceHistoryReader for SqliteChainStore {
    fn balance_deltas(
        &self,
        address: Address,
        range: &RangeQuery,
    ) -> StoreResult<Page<BalanceDelta>> {
        let conn = self.read_conn()?;
        Scan::new("balance_deltas", "address, block_number, delta")
            .filter("address = ?", [blob(address.as_slice())])
            .blocks("block_number", range)
            .page(&conn, &["block_number"], range, delta_row)
    }

    fn balance_at(&self, address: Address, block_number: u64) -> StoreResult<BalanceAt> {
        let conn = self.read_conn()?;

        let snapshot = conn
            .query_row(
                "SELECT block_number, balance FROM balance_snapshots
                 WHERE address = ? AND block_number <= ?
                 ORDER BY block_number DESC LIMIT 1",
                params![address.as_slice(), block_number as i64],
                |row| Ok((u64_column(row, 0)?, u256_column(row, 1)?)),
            )
            .optional()?;

        let (base, mut balance) = match snapshot {
            Some((height, balance)) => (Some(height), I256::from_raw(balance)),
            None => (None, I256::ZERO),
        };

        let deltas = Scan::new("balance_deltas", "address, block_number, delta")
            .filter("address = ?", [blob(address.as_slice())])
            .filter_if(base.map(int), "block_number > ?", 1)
            .filter("block_number <= ?", [int(block_number)])
            .all(&conn, &["block_number"], delta_row)?;
        for delta in deltas {
            balance = balance.saturating_add(delta.delta);
        }

        Ok(BalanceAt {
            address,
            block_number,
            balance,
            snapshot_block: base,
        })
    }

    fn balance_snapshots_at(&self, block_number: u64) -> StoreResult<Vec<BalanceSnapshot>> {
        let conn = self.read_conn()?;
        Scan::new("balance_snapshots", "address, block_number, balance")
            .filter("block_number = ?", [int(block_number)])
            .all(&conn, &["address"], snapshot_row)
    }
}

impl SystemEventReader for SqliteChainStore {
    fn system_events(
        &self,
        filter: &SystemEventFilter,
        range: &RangeQuery,
    ) -> StoreResult<Page<SystemEvent>> {
        let conn = self.read_conn()?;
        system_event_scan(filter)
            .blocks("block_number", range)
            .page(&conn, &["block_number", "log_index"], range, body_row)
    }

    fn all_system_events(&self, filter: &SystemEventFilter) -> StoreResult<Vec<SystemEvent>> {
        let conn = self.read_conn()?;
        system_event_scan(filter).all(&conn, &["block_number", "log_index"], body_row)
    }
}

impl AggregateCounters for SqliteChainStore {
    fn block_count(&self) -> StoreResult<u64> {
        let conn = self.read_conn()?;
        Ok(read_meta(&conn, META_BLOCK_COUNT)?.unwrap_or(0))
    }

    fn transaction_count(&self) -> StoreResult<u64> {
        let conn = self.read_conn()?;
        Ok(read_meta(&conn, META_TRANSACTION_COUNT)?.unwrap_or(0))
    }
}
