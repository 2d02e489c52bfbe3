//! SQLite schema and connection setup.
//!
//! Primary entities keep their full serialized form in a `body` column next to
//! the key columns used for lookups. Secondary tables are keyed so that range
//! scans walk a composite `(entity, block_number, position)` index.

use rusqlite::Connection;

/// Configure a connection with standard PRAGMAs for WAL mode.
pub(crate) fn configure_connection(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA foreign_keys=ON;",
    )
}

pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS blocks (
    number INTEGER PRIMARY KEY,
    hash BLOB NOT NULL UNIQUE,
    indexed INTEGER NOT NULL DEFAULT 0,
    transaction_count INTEGER NOT NULL,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_blocks_pending ON blocks(indexed, number);

CREATE TABLE IF NOT EXISTS transactions (
    hash BLOB PRIMARY KEY,
    block_number INTEGER NOT NULL,
    block_hash BLOB NOT NULL,
    transaction_index INTEGER NOT NULL,
    from_addr BLOB NOT NULL,
    to_addr BLOB,
    body TEXT NOT NULL,
    FOREIGN KEY (block_number) REFERENCES blocks(number)
);
CREATE INDEX IF NOT EXISTS idx_tx_block ON transactions(block_number, transaction_index);

CREATE TABLE IF NOT EXISTS receipts (
    transaction_hash BLOB PRIMARY KEY,
    block_number INTEGER NOT NULL,
    transaction_index INTEGER NOT NULL,
    body TEXT NOT NULL,
    FOREIGN KEY (block_number) REFERENCES blocks(number)
);
CREATE INDEX IF NOT EXISTS idx_receipts_block ON receipts(block_number, transaction_index);

CREATE TABLE IF NOT EXISTS logs (
    block_number INTEGER NOT NULL,
    log_index INTEGER NOT NULL,
    transaction_hash BLOB NOT NULL,
    address BLOB NOT NULL,
    topic0 BLOB,
    body TEXT NOT NULL,
    PRIMARY KEY (block_number, log_index),
    FOREIGN KEY (block_number) REFERENCES blocks(number)
);
CREATE INDEX IF NOT EXISTS idx_logs_tx ON logs(transaction_hash);
CREATE INDEX IF NOT EXISTS idx_logs_address ON logs(address, block_number);

CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS address_transactions (
    address BLOB NOT NULL,
    block_number INTEGER NOT NULL,
    transaction_index INTEGER NOT NULL,
    transaction_hash BLOB NOT NULL,
    is_sender INTEGER NOT NULL,
    is_recipient INTEGER NOT NULL,
    PRIMARY KEY (address, block_number, transaction_index)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_address_tx_block ON address_transactions(block_number);

CREATE TABLE IF NOT EXISTS erc20_transfers (
    transaction_hash BLOB NOT NULL,
    log_index INTEGER NOT NULL,
    block_number INTEGER NOT NULL,
    transaction_index INTEGER NOT NULL,
    contract BLOB NOT NULL,
    from_addr BLOB NOT NULL,
    to_addr BLOB NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (transaction_hash, log_index)
);
CREATE INDEX IF NOT EXISTS idx_erc20_contract ON erc20_transfers(contract, block_number, log_index);
CREATE INDEX IF NOT EXISTS idx_erc20_from ON erc20_transfers(from_addr, block_number, log_index);
CREATE INDEX IF NOT EXISTS idx_erc20_to ON erc20_transfers(to_addr, block_number, log_index);
CREATE INDEX IF NOT EXISTS idx_erc20_block ON erc20_transfers(block_number);

CREATE TABLE IF NOT EXISTS erc721_transfers (
    transaction_hash BLOB NOT NULL,
    log_index INTEGER NOT NULL,
    block_number INTEGER NOT NULL,
    transaction_index INTEGER NOT NULL,
    contract BLOB NOT NULL,
    from_addr BLOB NOT NULL,
    to_addr BLOB NOT NULL,
    token_id BLOB NOT NULL,
    PRIMARY KEY (transaction_hash, log_index)
);
CREATE INDEX IF NOT EXISTS idx_erc721_contract ON erc721_transfers(contract, block_number, log_index);
CREATE INDEX IF NOT EXISTS idx_erc721_token ON erc721_transfers(contract, token_id, block_number, log_index);
CREATE INDEX IF NOT EXISTS idx_erc721_from ON erc721_transfers(from_addr, block_number, log_index);
CREATE INDEX IF NOT EXISTS idx_erc721_to ON erc721_transfers(to_addr, block_number, log_index);
CREATE INDEX IF NOT EXISTS idx_erc721_block ON erc721_transfers(block_number);

CREATE TABLE IF NOT EXISTS nft_owners (
    contract BLOB NOT NULL,
    token_id BLOB NOT NULL,
    owner BLOB NOT NULL,
    block_number INTEGER NOT NULL,
    log_index INTEGER NOT NULL,
    transaction_hash BLOB NOT NULL,
    PRIMARY KEY (contract, token_id)
);
CREATE INDEX IF NOT EXISTS idx_nft_owner ON nft_owners(owner, block_number, log_index);

CREATE TABLE IF NOT EXISTS contract_creations (
    address BLOB PRIMARY KEY,
    creator BLOB NOT NULL,
    transaction_hash BLOB NOT NULL,
    block_number INTEGER NOT NULL,
    init_code_size INTEGER NOT NULL,
    call_index INTEGER
);
CREATE INDEX IF NOT EXISTS idx_contract_creator ON contract_creations(creator, block_number);
CREATE INDEX IF NOT EXISTS idx_contract_block ON contract_creations(block_number);

CREATE TABLE IF NOT EXISTS contract_verifications (
    address BLOB PRIMARY KEY,
    updated_at INTEGER NOT NULL,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS internal_transactions (
    transaction_hash BLOB NOT NULL,
    call_index INTEGER NOT NULL,
    block_number INTEGER NOT NULL,
    transaction_index INTEGER NOT NULL,
    from_addr BLOB NOT NULL,
    to_addr BLOB,
    body TEXT NOT NULL,
    PRIMARY KEY (transaction_hash, call_index)
);
CREATE INDEX IF NOT EXISTS idx_internal_from ON internal_transactions(from_addr, block_number, transaction_index);
CREATE INDEX IF NOT EXISTS idx_internal_to ON internal_transactions(to_addr, block_number, transaction_index);
CREATE INDEX IF NOT EXISTS idx_internal_block ON internal_transactions(block_number);

CREATE TABLE IF NOT EXISTS setcode_authorizations (
    transaction_hash BLOB NOT NULL,
    authorization_index INTEGER NOT NULL,
    block_number INTEGER NOT NULL,
    transaction_index INTEGER NOT NULL,
    authority BLOB,
    target BLOB NOT NULL,
    body TEXT NOT NULL,
    PRIMARY KEY (transaction_hash, authorization_index)
);
CREATE INDEX IF NOT EXISTS idx_setcode_authority ON setcode_authorizations(authority, block_number, transaction_index);
CREATE INDEX IF NOT EXISTS idx_setcode_target ON setcode_authorizations(target, block_number, transaction_index);
CREATE INDEX IF NOT EXISTS idx_setcode_block ON setcode_authorizations(block_number);

CREATE TABLE IF NOT EXISTS wbft_blocks (
    block_number INTEGER PRIMARY KEY,
    epoch INTEGER NOT NULL,
    proposer BLOB NOT NULL,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS wbft_epochs (
    epoch INTEGER PRIMARY KEY,
    announced_at INTEGER NOT NULL,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_epoch_announced ON wbft_epochs(announced_at);

CREATE TABLE IF NOT EXISTS validator_activity (
    validator BLOB NOT NULL,
    block_number INTEGER NOT NULL,
    prepared INTEGER NOT NULL,
    committed INTEGER NOT NULL,
    PRIMARY KEY (validator, block_number)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_activity_block ON validator_activity(block_number);

CREATE TABLE IF NOT EXISTS validator_stats (
    validator BLOB PRIMARY KEY,
    prepare_signed INTEGER NOT NULL,
    prepare_missed INTEGER NOT NULL,
    commit_signed INTEGER NOT NULL,
    commit_missed INTEGER NOT NULL,
    last_signed_block INTEGER
);

CREATE TABLE IF NOT EXISTS balance_deltas (
    address BLOB NOT NULL,
    block_number INTEGER NOT NULL,
    delta BLOB NOT NULL,
    PRIMARY KEY (address, block_number)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_delta_block ON balance_deltas(block_number);

CREATE TABLE IF NOT EXISTS balance_snapshots (
    address BLOB NOT NULL,
    block_number INTEGER NOT NULL,
    balance BLOB NOT NULL,
    PRIMARY KEY (address, block_number)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_snapshot_block ON balance_snapshots(block_number);

CREATE TABLE IF NOT EXISTS system_events (
    block_number INTEGER NOT NULL,
    log_index INTEGER NOT NULL,
    transaction_hash BLOB NOT NULL,
    contract BLOB NOT NULL,
    event_type TEXT NOT NULL,
    subject BLOB,
    body TEXT NOT NULL,
    PRIMARY KEY (block_number, log_index)
);
CREATE INDEX IF NOT EXISTS idx_system_type ON system_events(event_type, block_number, log_index);
CREATE INDEX IF NOT EXISTS idx_system_subject ON system_events(subject, block_number, log_index);
";

/// Tables holding rows derived for a single height, cleared before that
/// height's secondary data is rewritten.
pub(crate) const HEIGHT_SCOPED_TABLES: &[&str] = &[
    "address_transactions",
    "erc20_transfers",
    "contract_creations",
    "internal_transactions",
    "setcode_authorizations",
    "wbft_blocks",
    "balance_deltas",
    "balance_snapshots",
    "system_events",
];
