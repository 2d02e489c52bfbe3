//! Write-path helpers. Every function runs inside the caller's transaction.

use std::collections::BTreeSet;

use alloy_primitives::{Address, B256, U256};
use chainidx_primitives::{StoredBlock, StoredReceipt, StoredTransaction, TxLocation};
use rusqlite::{params, Connection, OptionalExtension};

use crate::batch::IndexBatch;
use crate::cache::Watermarks;
use crate::codec::{
    address_from_row, b256_from_row, i256_bytes, to_json, u256_bytes, u256_from_row,
};
use crate::error::{StoreError, StoreResult};
use crate::schema::HEIGHT_SCOPED_TABLES;

pub(crate) const META_CHAIN_BASE: &str = "chain_base";
pub(crate) const META_RAW_HEIGHT: &str = "raw_height";
pub(crate) const META_INDEXED_HEIGHT: &str = "indexed_height";
pub(crate) const META_BLOCK_COUNT: &str = "block_count";
pub(crate) const META_TRANSACTION_COUNT: &str = "transaction_count";

pub(crate) fn read_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<u64>> {
    conn.query_row(
        "SELECT value FROM metadata WHERE key = ?",
        params![key],
        |row| row.get::<_, i64>(0),
    )
    .optional()
    .map(|value| value.map(|v| v as u64))
}

fn write_meta(conn: &Connection, key: &str, value: Option<u64>) -> rusqlite::Result<()> {
    match value {
        Some(value) => conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
            params![key, value as i64],
        )?,
        None => conn.execute("DELETE FROM metadata WHERE key = ?", params![key])?,
    };
    Ok(())
}

fn adjust_counter(conn: &Connection, key: &str, delta: i64) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO metadata (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = MAX(value + ?2, 0)",
        params![key, delta],
    )?;
    Ok(())
}

/// Outcome of a block upsert.
pub(crate) enum BlockWrite {
    Inserted,
    /// Same hash already stored; index state kept.
    Unchanged,
    /// A different block occupied the height; its transaction hashes are returned
    /// so the caller can evict them from the cache.
    Replaced(Vec<B256>),
}

pub(crate) fn upsert_block(conn: &Connection, block: &StoredBlock) -> StoreResult<BlockWrite> {
    let number = block.number as i64;

    let owner: Option<i64> = conn
        .query_row(
            "SELECT number FROM blocks WHERE hash = ?",
            params![block.hash.as_slice()],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(owner) = owner.filter(|owner| *owner != number) {
        return Err(StoreError::InvalidInput(format!(
            "block hash {} already stored at height {owner}",
            block.hash
        )));
    }

    let body = to_json(block)?;
    let existing: Option<Vec<u8>> = conn
        .query_row(
            "SELECT hash FROM blocks WHERE number = ?",
            params![number],
            |row| row.get(0),
        )
        .optional()?;

    let outcome = match existing {
        Some(hash) if hash.as_slice() == block.hash.as_slice() => {
            conn.execute(
                "UPDATE blocks SET transaction_count = ?, body = ? WHERE number = ?",
                params![block.transaction_hashes.len() as i64, body, number],
            )?;
            return Ok(BlockWrite::Unchanged);
        }
        Some(_) => BlockWrite::Replaced(delete_height(conn, block.number)?),
        None => BlockWrite::Inserted,
    };

    conn.execute(
        "INSERT INTO blocks (number, hash, indexed, transaction_count, body)
         VALUES (?, ?, 0, ?, ?)",
        params![
            number,
            block.hash.as_slice(),
            block.transaction_hashes.len() as i64,
            body
        ],
    )?;
    adjust_counter(conn, META_BLOCK_COUNT, 1)?;
    Ok(outcome)
}

/// Block at a height, read through the writer connection.
pub(crate) fn stored_block(conn: &Connection, number: u64) -> StoreResult<Option<StoredBlock>> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM blocks WHERE number = ?",
            params![number as i64],
            |row| row.get(0),
        )
        .optional()?;
    body.map(|body| {
        serde_json::from_str(&body).map_err(|e| StoreError::Deserialization(e.to_string()))
    })
    .transpose()
}

pub(crate) fn insert_transaction(
    conn: &Connection,
    transaction: &StoredTransaction,
    location: TxLocation,
) -> StoreResult<()> {
    let existed = conn
        .query_row(
            "SELECT 1 FROM transactions WHERE hash = ?",
            params![transaction.hash.as_slice()],
            |_| Ok(()),
        )
        .optional()?
        .is_some();

    conn.execute(
        "INSERT OR REPLACE INTO transactions
         (hash, block_number, block_hash, transaction_index, from_addr, to_addr, body)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            transaction.hash.as_slice(),
            location.block_number as i64,
            location.block_hash.as_slice(),
            location.transaction_index as i64,
            transaction.from.as_slice(),
            transaction.to.as_ref().map(|a| a.as_slice()),
            to_json(transaction)?,
        ],
    )?;

    if !existed {
        adjust_counter(conn, META_TRANSACTION_COUNT, 1)?;
    }
    Ok(())
}

/// Store the receipt body without logs and replace its rows in `logs`.
pub(crate) fn insert_receipt(
    conn: &Connection,
    receipt: &StoredReceipt,
    location: TxLocation,
) -> StoreResult<()> {
    let mut body = receipt.clone();
    body.logs.clear();

    conn.execute(
        "INSERT OR REPLACE INTO receipts (transaction_hash, block_number, transaction_index, body)
         VALUES (?, ?, ?, ?)",
        params![
            receipt.transaction_hash.as_slice(),
            location.block_number as i64,
            location.transaction_index as i64,
            to_json(&body)?,
        ],
    )?;

    conn.execute(
        "DELETE FROM logs WHERE transaction_hash = ?",
        params![receipt.transaction_hash.as_slice()],
    )?;
    let mut previous: Option<u32> = None;
    for log in &receipt.logs {
        if log.transaction_hash != receipt.transaction_hash
            || log.block_number != location.block_number
        {
            return Err(StoreError::InvalidInput(format!(
                "log {} does not belong to receipt {}",
                log.log_index, receipt.transaction_hash
            )));
        }
        if previous.is_some_and(|previous| log.log_index <= previous) {
            return Err(StoreError::InvalidInput(format!(
                "receipt {} logs are not in log index order",
                receipt.transaction_hash
            )));
        }
        previous = Some(log.log_index);

        // The receipt's own logs were deleted above, so a conflict here is a
        // log index owned by another transaction of the block.
        conn.execute(
            "INSERT INTO logs
             (block_number, log_index, transaction_hash, address, topic0, body)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                log.block_number as i64,
                log.log_index as i64,
                log.transaction_hash.as_slice(),
                log.address.as_slice(),
                log.topic0().map(|t| t.as_slice()),
                to_json(log)?,
            ],
        )
        .map_err(|err| match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::ConstraintViolation) => StoreError::InvalidInput(format!(
                "block {} log index {} is already taken",
                log.block_number, log.log_index
            )),
            _ => StoreError::from(err),
        })?;
    }
    Ok(())
}

/// Location of a stored transaction, read through the writer connection.
pub(crate) fn transaction_location(
    conn: &Connection,
    hash: B256,
) -> StoreResult<Option<TxLocation>> {
    let location = conn
        .query_row(
            "SELECT block_number, block_hash, transaction_index FROM transactions WHERE hash = ?",
            params![hash.as_slice()],
            |row| {
                let block_number: i64 = row.get(0)?;
                let block_hash: Vec<u8> = row.get(1)?;
                let transaction_index: i64 = row.get(2)?;
                Ok(TxLocation {
                    block_number: block_number as u64,
                    block_hash: b256_from_row(&block_hash, 1)?,
                    transaction_index: transaction_index as u32,
                })
            },
        )
        .optional()?;
    Ok(location)
}

/// Remove every row stored for a height. Returns the removed transaction hashes.
pub(crate) fn delete_height(conn: &Connection, number: u64) -> StoreResult<Vec<B256>> {
    let n = number as i64;

    let hashes: Vec<B256> = {
        let mut stmt = conn.prepare(
            "SELECT hash FROM transactions WHERE block_number = ? ORDER BY transaction_index",
        )?;
        let rows = stmt.query_map(params![n], |row| {
            let bytes: Vec<u8> = row.get(0)?;
            b256_from_row(&bytes, 0)
        })?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    clear_secondary(conn, number)?;

    conn.execute("DELETE FROM logs WHERE block_number = ?", params![n])?;
    conn.execute("DELETE FROM receipts WHERE block_number = ?", params![n])?;
    conn.execute("DELETE FROM transactions WHERE block_number = ?", params![n])?;
    let removed = conn.execute("DELETE FROM blocks WHERE number = ?", params![n])?;

    adjust_counter(conn, META_TRANSACTION_COUNT, -(hashes.len() as i64))?;
    adjust_counter(conn, META_BLOCK_COUNT, -(removed as i64))?;
    Ok(hashes)
}

/// Drop the secondary rows of a height and recompute the materialized rows
/// (NFT owners, validator stats) they fed.
fn clear_secondary(conn: &Connection, number: u64) -> StoreResult<()> {
    let n = number as i64;

    let tokens = touched_tokens(conn, number)?;
    let validators = touched_validators(conn, number)?;

    for table in HEIGHT_SCOPED_TABLES {
        conn.execute(
            &format!("DELETE FROM {table} WHERE block_number = ?"),
            params![n],
        )?;
    }
    conn.execute("DELETE FROM erc721_transfers WHERE block_number = ?", params![n])?;
    conn.execute("DELETE FROM validator_activity WHERE block_number = ?", params![n])?;
    conn.execute("DELETE FROM wbft_epochs WHERE announced_at = ?", params![n])?;

    for (contract, token_id) in tokens {
        recompute_nft_owner(conn, contract, token_id)?;
    }
    for validator in validators {
        recompute_validator_stats(conn, validator)?;
    }
    Ok(())
}

fn touched_tokens(conn: &Connection, number: u64) -> StoreResult<BTreeSet<(Address, U256)>> {
    let mut stmt =
        conn.prepare("SELECT DISTINCT contract, token_id FROM erc721_transfers WHERE block_number = ?")?;
    let rows = stmt.query_map(params![number as i64], |row| {
        let contract: Vec<u8> = row.get(0)?;
        let token_id: Vec<u8> = row.get(1)?;
        Ok((
            address_from_row(&contract, 0)?,
            u256_from_row(&token_id, 1)?,
        ))
    })?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

fn touched_validators(conn: &Connection, number: u64) -> StoreResult<BTreeSet<Address>> {
    let mut stmt = conn.prepare("SELECT validator FROM validator_activity WHERE block_number = ?")?;
    let rows = stmt.query_map(params![number as i64], |row| {
        let validator: Vec<u8> = row.get(0)?;
        address_from_row(&validator, 0)
    })?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// Owner = recipient of the transfer with the highest (block, log index).
fn recompute_nft_owner(conn: &Connection, contract: Address, token_id: U256) -> StoreResult<()> {
    let token = u256_bytes(token_id);
    conn.execute(
        "DELETE FROM nft_owners WHERE contract = ? AND token_id = ?",
        params![contract.as_slice(), token.as_slice()],
    )?;
    conn.execute(
        "INSERT INTO nft_owners (contract, token_id, owner, block_number, log_index, transaction_hash)
         SELECT contract, token_id, to_addr, block_number, log_index, transaction_hash
         FROM erc721_transfers
         WHERE contract = ? AND token_id = ?
         ORDER BY block_number DESC, log_index DESC
         LIMIT 1",
        params![contract.as_slice(), token.as_slice()],
    )?;
    Ok(())
}

fn recompute_validator_stats(conn: &Connection, validator: Address) -> StoreResult<()> {
    conn.execute(
        "DELETE FROM validator_stats WHERE validator = ?",
        params![validator.as_slice()],
    )?;
    conn.execute(
        "INSERT INTO validator_stats
         (validator, prepare_signed, prepare_missed, commit_signed, commit_missed, last_signed_block)
         SELECT validator,
                SUM(prepared), SUM(1 - prepared),
                SUM(committed), SUM(1 - committed),
                MAX(CASE WHEN prepared = 1 OR committed = 1 THEN block_number END)
         FROM validator_activity
         WHERE validator = ?
         GROUP BY validator",
        params![validator.as_slice()],
    )?;
    Ok(())
}

/// Replace the secondary rows of `batch.height` with the batch contents.
pub(crate) fn write_batch(conn: &Connection, batch: &IndexBatch) -> StoreResult<()> {
    clear_secondary(conn, batch.height)?;

    for record in &batch.address_transactions {
        conn.execute(
            "INSERT OR REPLACE INTO address_transactions
             (address, block_number, transaction_index, transaction_hash, is_sender, is_recipient)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                record.address.as_slice(),
                record.block_number as i64,
                record.transaction_index as i64,
                record.transaction_hash.as_slice(),
                record.is_sender,
                record.is_recipient,
            ],
        )?;
    }

    for transfer in &batch.erc20_transfers {
        conn.execute(
            "INSERT OR REPLACE INTO erc20_transfers
             (transaction_hash, log_index, block_number, transaction_index, contract, from_addr, to_addr, value)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                transfer.transaction_hash.as_slice(),
                transfer.log_index as i64,
                transfer.block_number as i64,
                transfer.transaction_index as i64,
                transfer.contract.as_slice(),
                transfer.from.as_slice(),
                transfer.to.as_slice(),
                u256_bytes(transfer.value).as_slice(),
            ],
        )?;
    }

    let mut tokens = BTreeSet::new();
    for transfer in &batch.erc721_transfers {
        conn.execute(
            "INSERT OR REPLACE INTO erc721_transfers
             (transaction_hash, log_index, block_number, transaction_index, contract, from_addr, to_addr, token_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                transfer.transaction_hash.as_slice(),
                transfer.log_index as i64,
                transfer.block_number as i64,
                transfer.transaction_index as i64,
                transfer.contract.as_slice(),
                transfer.from.as_slice(),
                transfer.to.as_slice(),
                u256_bytes(transfer.token_id).as_slice(),
            ],
        )?;
        tokens.insert((transfer.contract, transfer.token_id));
    }
    for (contract, token_id) in tokens {
        recompute_nft_owner(conn, contract, token_id)?;
    }

    for creation in &batch.contract_creations {
        conn.execute(
            "INSERT OR REPLACE INTO contract_creations
             (address, creator, transaction_hash, block_number, init_code_size, call_index)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                creation.address.as_slice(),
                creation.creator.as_slice(),
                creation.transaction_hash.as_slice(),
                creation.block_number as i64,
                creation.init_code_size as i64,
                creation.call_index.map(|i| i as i64),
            ],
        )?;
    }

    for call in &batch.internal_transactions {
        conn.execute(
            "INSERT OR REPLACE INTO internal_transactions
             (transaction_hash, call_index, block_number, transaction_index, from_addr, to_addr, body)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                call.transaction_hash.as_slice(),
                call.call_index as i64,
                call.block_number as i64,
                call.transaction_index as i64,
                call.from.as_slice(),
                call.to.as_ref().map(|a| a.as_slice()),
                to_json(call)?,
            ],
        )?;
    }

    for record in &batch.set_code_authorizations {
        conn.execute(
            "INSERT OR REPLACE INTO setcode_authorizations
             (transaction_hash, authorization_index, block_number, transaction_index, authority, target, body)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                record.transaction_hash.as_slice(),
                record.authorization_index as i64,
                record.block_number as i64,
                record.transaction_index as i64,
                record.authority.as_ref().map(|a| a.as_slice()),
                record.target.as_slice(),
                to_json(record)?,
            ],
        )?;
    }

    if let Some(record) = &batch.wbft_block {
        conn.execute(
            "INSERT OR REPLACE INTO wbft_blocks (block_number, epoch, proposer, body)
             VALUES (?, ?, ?, ?)",
            params![
                record.block_number as i64,
                record.epoch as i64,
                record.proposer.as_slice(),
                to_json(record)?,
            ],
        )?;
    }

    if let Some(epoch) = &batch.epoch {
        conn.execute(
            "INSERT OR REPLACE INTO wbft_epochs (epoch, announced_at, body) VALUES (?, ?, ?)",
            params![epoch.epoch as i64, epoch.announced_at as i64, to_json(epoch)?],
        )?;
    }

    let mut validators = BTreeSet::new();
    for activity in &batch.validator_activity {
        conn.execute(
            "INSERT OR REPLACE INTO validator_activity (validator, block_number, prepared, committed)
             VALUES (?, ?, ?, ?)",
            params![
                activity.validator.as_slice(),
                activity.block_number as i64,
                activity.prepared,
                activity.committed,
            ],
        )?;
        validators.insert(activity.validator);
    }
    for validator in validators {
        recompute_validator_stats(conn, validator)?;
    }

    for delta in &batch.balance_deltas {
        conn.execute(
            "INSERT OR REPLACE INTO balance_deltas (address, block_number, delta) VALUES (?, ?, ?)",
            params![
                delta.address.as_slice(),
                delta.block_number as i64,
                i256_bytes(delta.delta).as_slice(),
            ],
        )?;
    }

    for snapshot in &batch.balance_snapshots {
        conn.execute(
            "INSERT OR REPLACE INTO balance_snapshots (address, block_number, balance) VALUES (?, ?, ?)",
            params![
                snapshot.address.as_slice(),
                snapshot.block_number as i64,
                u256_bytes(snapshot.balance).as_slice(),
            ],
        )?;
    }

    for event in &batch.system_events {
        conn.execute(
            "INSERT OR REPLACE INTO system_events
             (block_number, log_index, transaction_hash, contract, event_type, subject, body)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                event.block_number as i64,
                event.log_index as i64,
                event.transaction_hash.as_slice(),
                event.contract.as_slice(),
                event.kind.name(),
                event.kind.subject().as_ref().map(|a| a.as_slice()),
                to_json(event)?,
            ],
        )?;
    }

    conn.execute(
        "UPDATE blocks SET indexed = 1 WHERE number = ?",
        params![batch.height as i64],
    )?;
    Ok(())
}

fn height_ready(conn: &Connection, number: u64, indexed: bool) -> rusqlite::Result<bool> {
    let flag: Option<i64> = conn
        .query_row(
            "SELECT indexed FROM blocks WHERE number = ?",
            params![number as i64],
            |row| row.get(0),
        )
        .optional()?;
    Ok(matches!(flag, Some(flag) if !indexed || flag == 1))
}

/// Lower the mark if `touched` no longer qualifies, then extend it over
/// consecutive qualifying heights.
fn watermark(
    conn: &Connection,
    base: u64,
    current: Option<u64>,
    touched: u64,
    indexed: bool,
) -> rusqlite::Result<Option<u64>> {
    let mut mark = current;
    if let Some(w) = mark {
        if touched <= w && !height_ready(conn, touched, indexed)? {
            mark = touched.checked_sub(1).filter(|h| *h >= base);
        }
    }

    let mut next = mark.map_or(base, |w| w.saturating_add(1));
    while height_ready(conn, next, indexed)? {
        next = next.saturating_add(1);
    }
    Ok((next > base).then(|| next - 1))
}

/// Recompute both watermarks after `touched` changed. Contiguity is counted
/// from the lowest stored height.
pub(crate) fn refresh_watermarks(conn: &Connection, touched: u64) -> StoreResult<Watermarks> {
    let base: Option<i64> = conn.query_row("SELECT MIN(number) FROM blocks", [], |row| row.get(0))?;
    let Some(base) = base.map(|b| b as u64) else {
        write_meta(conn, META_CHAIN_BASE, None)?;
        write_meta(conn, META_RAW_HEIGHT, None)?;
        write_meta(conn, META_INDEXED_HEIGHT, None)?;
        return Ok(Watermarks::default());
    };

    let (raw, indexed) = if read_meta(conn, META_CHAIN_BASE)? == Some(base) {
        (
            read_meta(conn, META_RAW_HEIGHT)?,
            read_meta(conn, META_INDEXED_HEIGHT)?,
        )
    } else {
        (None, None)
    };

    let watermarks = Watermarks {
        raw: watermark(conn, base, raw, touched, false)?,
        indexed: watermark(conn, base, indexed, touched, true)?,
    };

    write_meta(conn, META_CHAIN_BASE, Some(base))?;
    write_meta(conn, META_RAW_HEIGHT, watermarks.raw)?;
    write_meta(conn, META_INDEXED_HEIGHT, watermarks.indexed)?;
    Ok(watermarks)
}
