#![allow(clippy::indexing_slicing, clippy::unwrap_used)]

use super::*;
use alloy_primitives::{Bytes, I256};
use chainidx_primitives::{BlockBundle, StoredReceipt, SystemEventKind, TRANSFER_EVENT_SIGNATURE};
use chainidx_store::{
    EnabledIndexes, IndexBatch, IndexWriter, SqliteChainStore, StoreOptions,
};
use chainidx_testing::{address, chain, BundleBuilder};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

const TOKEN: u8 = 0x70;

/// Address buckets and ERC20 transfers of a bundle.
fn batch_for(bundle: &BlockBundle) -> IndexBatch {
    let mut batch = IndexBatch::new(bundle.number());
    for (index, tx) in bundle.transactions.iter().enumerate() {
        let mut buckets = BTreeMap::new();
        buckets.entry(tx.from).or_insert((false, false)).0 = true;
        if let Some(to) = tx.to {
            buckets.entry(to).or_insert((false, false)).1 = true;
        }
        for (address, (is_sender, is_recipient)) in buckets {
            batch.address_transactions.push(AddressTransaction {
                address,
                block_number: bundle.number(),
                transaction_index: index as u32,
                transaction_hash: tx.hash,
                is_sender,
                is_recipient,
            });
        }
    }
    for log in bundle.logs() {
        if log.topics.len() == 3 && log.topics[0] == TRANSFER_EVENT_SIGNATURE {
            batch.erc20_transfers.push(Erc20Transfer {
                contract: log.address,
                from: Address::from_word(log.topics[1]),
                to: Address::from_word(log.topics[2]),
                value: U256::from_be_slice(&log.data),
                transaction_hash: log.transaction_hash,
                log_index: log.log_index,
                block_number: log.block_number,
                transaction_index: log.transaction_index,
            });
        }
    }
    batch
}

fn store_with(bundles: &[BlockBundle], options: StoreOptions) -> Arc<SqliteChainStore> {
    let store = SqliteChainStore::in_memory_with(options).unwrap();
    for bundle in bundles {
        store.commit_height(bundle, &batch_for(bundle)).unwrap();
    }
    Arc::new(store)
}

fn engine(bundles: &[BlockBundle]) -> QueryEngine<SqliteChainStore> {
    QueryEngine::new(
        store_with(bundles, StoreOptions::default()),
        QueryConfig::default(),
    )
}

fn numbers(connection: &Connection<StoredBlock>) -> Vec<u64> {
    connection.nodes.iter().map(|block| block.number).collect()
}

fn ctx() -> QueryContext {
    QueryContext::background()
}

#[test]
fn test_blocks_reverse_first_page() {
    let engine = engine(&chain(31));

    let page = engine
        .blocks(&ctx(), BlockRangeFilter::unbounded(), PageRequest::new(0, 10))
        .unwrap();

    assert_eq!(numbers(&page), (21..=30).rev().collect::<Vec<_>>());
    assert!(page.page_info.has_next_page);
    assert!(!page.page_info.has_previous_page);
    assert_eq!(page.total_count, TotalCount::exact(31));
    assert_eq!(page.page_info.start_cursor, Some(Cursor::block(30)));
    assert_eq!(page.page_info.end_cursor, Some(Cursor::block(21)));
}

#[test]
fn test_cursors_show_whether_pages_abut() {
    let bundles = chain(32);
    let store = store_with(&bundles[..31], StoreOptions::default());
    let engine = QueryEngine::new(Arc::clone(&store), QueryConfig::default());

    let first = engine
        .blocks(&ctx(), BlockRangeFilter::unbounded(), PageRequest::new(0, 10))
        .unwrap();
    let second = engine
        .blocks(&ctx(), BlockRangeFilter::unbounded(), PageRequest::new(10, 10))
        .unwrap();
    let end = first.page_info.end_cursor.unwrap();
    assert_eq!(
        second.page_info.start_cursor,
        Some(Cursor::block(end.block_number - 1))
    );

    // A new head shifts every offset page by one block.
    store.commit_height(&bundles[31], &batch_for(&bundles[31])).unwrap();
    let shifted = engine
        .blocks(&ctx(), BlockRangeFilter::unbounded(), PageRequest::new(10, 10))
        .unwrap();
    assert_eq!(shifted.page_info.start_cursor, Some(end));
}

#[test]
fn test_blocks_reverse_reaches_genesis() {
    let engine = engine(&chain(31));

    let page = engine
        .blocks(&ctx(), BlockRangeFilter::unbounded(), PageRequest::new(25, 10))
        .unwrap();

    assert_eq!(numbers(&page), vec![5, 4, 3, 2, 1, 0]);
    assert!(!page.page_info.has_next_page);
    assert!(page.page_info.has_previous_page);
}

#[test]
fn test_blocks_offset_past_latest_is_empty() {
    let engine = engine(&chain(31));

    let page = engine
        .blocks(&ctx(), BlockRangeFilter::unbounded(), PageRequest::new(31, 10))
        .unwrap();

    assert!(page.nodes.is_empty());
    assert!(page.page_info.has_previous_page);
    assert!(!page.page_info.has_next_page);
    assert_eq!(page.total_count, TotalCount::exact(31));
}

#[test]
fn test_blocks_forward_range() {
    let engine = engine(&chain(31));
    let range = BlockRangeFilter::between(5, 12);

    let first = engine.blocks(&ctx(), range, PageRequest::new(0, 5)).unwrap();
    assert_eq!(numbers(&first), vec![5, 6, 7, 8, 9]);
    assert!(first.page_info.has_next_page);
    assert_eq!(first.total_count, TotalCount::exact(8));

    let second = engine.blocks(&ctx(), range, PageRequest::new(5, 5)).unwrap();
    assert_eq!(numbers(&second), vec![10, 11, 12]);
    assert!(!second.page_info.has_next_page);
    assert!(second.page_info.has_previous_page);
}

#[test]
fn test_blocks_forward_range_stops_at_latest() {
    let engine = engine(&chain(31));

    let page = engine
        .blocks(&ctx(), BlockRangeFilter::between(25, 100), PageRequest::new(0, 10))
        .unwrap();

    assert_eq!(numbers(&page), vec![25, 26, 27, 28, 29, 30]);
    assert!(!page.page_info.has_next_page);
    assert_eq!(page.total_count, TotalCount::exact(6));
}

#[test]
fn test_only_number_to_selects_forward_regime() {
    let engine = engine(&chain(10));
    let range = BlockRangeFilter {
        number_from: None,
        number_to: Some(3),
    };

    let page = engine.blocks(&ctx(), range, PageRequest::new(0, 10)).unwrap();
    assert_eq!(numbers(&page), vec![0, 1, 2, 3]);
}

#[test]
fn test_empty_store_returns_empty_connections() {
    let engine = engine(&[]);

    let blocks = engine
        .blocks(&ctx(), BlockRangeFilter::unbounded(), PageRequest::default())
        .unwrap();
    assert!(blocks.nodes.is_empty());
    assert_eq!(blocks.total_count, TotalCount::exact(0));

    let txs = engine
        .transactions(&ctx(), TransactionFilter::default(), PageRequest::default())
        .unwrap();
    assert!(txs.nodes.is_empty());

    let status = engine.status().unwrap();
    assert_eq!(status.latest_height, None);
    assert_eq!(status.block_count, Some(0));
}

#[test]
fn test_invalid_requests_rejected() {
    let engine = engine(&chain(3));

    assert!(matches!(
        engine.blocks(&ctx(), BlockRangeFilter::between(5, 4), PageRequest::default()),
        Err(QueryError::InvalidInput(_))
    ));
    assert!(matches!(
        engine.blocks(&ctx(), BlockRangeFilter::unbounded(), PageRequest::new(0, 0)),
        Err(QueryError::InvalidInput(_))
    ));
}

#[test]
fn test_page_size_capped() {
    let engine = QueryEngine::new(
        store_with(&chain(10), StoreOptions::default()),
        QueryConfig {
            max_page_size: 3,
            ..QueryConfig::default()
        },
    );

    let page = engine
        .blocks(&ctx(), BlockRangeFilter::unbounded(), PageRequest::new(0, 50))
        .unwrap();
    assert_eq!(page.nodes.len(), 3);
}

#[test]
fn test_transactions_newest_first_with_counter_total() {
    let engine = engine(&chain(12));

    let page = engine
        .transactions(&ctx(), TransactionFilter::default(), PageRequest::new(0, 5))
        .unwrap();

    let heights: Vec<u64> = page
        .nodes
        .iter()
        .map(|node| node.location.block_number)
        .collect();
    assert_eq!(heights, vec![11, 10, 9, 8, 7]);
    assert_eq!(page.total_count, TotalCount::exact(12));
    assert!(page.page_info.has_next_page);
    assert_eq!(page.page_info.start_cursor, Some(Cursor::new(11, 0)));
}

#[test]
fn test_transaction_scan_clamped_to_span() {
    let engine = QueryEngine::new(
        store_with(&chain(20), StoreOptions::default()),
        QueryConfig {
            max_block_span: 5,
            ..QueryConfig::default()
        },
    );
    let filter = TransactionFilter {
        range: BlockRangeFilter::between(0, 19),
        address: None,
    };

    let page = engine
        .transactions(&ctx(), filter, PageRequest::new(0, 20))
        .unwrap();

    let heights: Vec<u64> = page
        .nodes
        .iter()
        .map(|node| node.location.block_number)
        .collect();
    assert_eq!(heights, vec![19, 18, 17, 16, 15]);
    assert_eq!(page.total_count, TotalCount::lower_bound(5));
    assert!(!page.total_count.exact);
}

#[test]
fn test_unclamped_filtered_scan_is_exact() {
    let engine = engine(&chain(6));
    let filter = TransactionFilter {
        range: BlockRangeFilter::between(2, 4),
        address: None,
    };

    let page = engine
        .transactions(&ctx(), filter, PageRequest::default())
        .unwrap();
    assert_eq!(page.total_count, TotalCount::exact(3));
}

fn address_bundles() -> Vec<BlockBundle> {
    vec![
        BundleBuilder::new(0)
            .transfer(address(1), address(2), U256::from(1))
            .build(),
        BundleBuilder::new(1)
            .transfer(address(3), address(4), U256::from(1))
            .build(),
        BundleBuilder::new(2)
            .transfer(address(2), address(5), U256::from(1))
            .build(),
    ]
}

#[test]
fn test_transactions_by_address_from_index() {
    let engine = engine(&address_bundles());
    let filter = TransactionFilter {
        range: BlockRangeFilter::unbounded(),
        address: Some(address(2)),
    };

    let page = engine
        .transactions(&ctx(), filter, PageRequest::default())
        .unwrap();

    let heights: Vec<u64> = page
        .nodes
        .iter()
        .map(|node| node.location.block_number)
        .collect();
    assert_eq!(heights, vec![2, 0]);
    assert_eq!(page.total_count, TotalCount::exact(2));
    assert!(!page.page_info.has_next_page);
}

/// Chain data of a SQLite store without any secondary index readers.
struct BareStore(SqliteChainStore);

impl ChainStore for BareStore {
    fn latest_height(&self) -> StoreResult<u64> {
        self.0.latest_height()
    }

    fn raw_height(&self) -> StoreResult<u64> {
        self.0.raw_height()
    }

    fn get_block(&self, number: u64) -> StoreResult<StoredBlock> {
        self.0.get_block(number)
    }

    fn get_block_by_hash(&self, hash: B256) -> StoreResult<StoredBlock> {
        self.0.get_block_by_hash(hash)
    }

    fn get_block_number(&self, hash: B256) -> StoreResult<u64> {
        self.0.get_block_number(hash)
    }

    fn get_blocks(&self, start: u64, end: u64) -> StoreResult<Vec<StoredBlock>> {
        self.0.get_blocks(start, end)
    }

    fn get_block_transactions(&self, number: u64) -> StoreResult<Vec<StoredTransaction>> {
        self.0.get_block_transactions(number)
    }

    fn get_transaction(&self, hash: B256) -> StoreResult<(StoredTransaction, TxLocation)> {
        self.0.get_transaction(hash)
    }

    fn get_receipt(&self, hash: B256) -> StoreResult<StoredReceipt> {
        self.0.get_receipt(hash)
    }

    fn get_receipts_by_block_number(&self, number: u64) -> StoreResult<Vec<StoredReceipt>> {
        self.0.get_receipts_by_block_number(number)
    }

    fn get_logs_by_block(&self, number: u64) -> StoreResult<Vec<StoredLog>> {
        self.0.get_logs_by_block(number)
    }

    fn has_block(&self, number: u64) -> StoreResult<bool> {
        self.0.has_block(number)
    }

    fn has_transaction(&self, hash: B256) -> StoreResult<bool> {
        self.0.has_transaction(hash)
    }

    fn has_receipt(&self, hash: B256) -> StoreResult<bool> {
        self.0.has_receipt(hash)
    }

    fn set_block(&self, block: &StoredBlock) -> StoreResult<()> {
        self.0.set_block(block)
    }

    fn set_transaction(&self, tx: &StoredTransaction, location: TxLocation) -> StoreResult<()> {
        self.0.set_transaction(tx, location)
    }

    fn set_receipt(&self, receipt: &StoredReceipt) -> StoreResult<()> {
        self.0.set_receipt(receipt)
    }

    fn delete_block(&self, number: u64) -> StoreResult<()> {
        self.0.delete_block(number)
    }
}

impl IndexCapabilities for BareStore {}

#[test]
fn test_transactions_by_address_without_index_scans() {
    let store = SqliteChainStore::in_memory().unwrap();
    for bundle in address_bundles() {
        store.commit_height(&bundle, &batch_for(&bundle)).unwrap();
    }
    let engine = QueryEngine::new(Arc::new(BareStore(store)), QueryConfig::default());
    assert!(engine.store().address_index().is_none());

    let filter = TransactionFilter {
        range: BlockRangeFilter::unbounded(),
        address: Some(address(2)),
    };
    let page = engine
        .transactions(&ctx(), filter, PageRequest::default())
        .unwrap();

    let heights: Vec<u64> = page
        .nodes
        .iter()
        .map(|node| node.location.block_number)
        .collect();
    assert_eq!(heights, vec![2, 0]);
    assert_eq!(page.total_count, TotalCount::exact(2));

    assert!(matches!(
        engine.address_activity(
            &ctx(),
            address(2),
            BlockRangeFilter::unbounded(),
            PageRequest::default()
        ),
        Err(QueryError::Unsupported(_))
    ));
}

#[test]
fn test_address_activity_flags() {
    let engine = engine(&address_bundles());

    let page = engine
        .address_activity(
            &ctx(),
            address(2),
            BlockRangeFilter::unbounded(),
            PageRequest::default(),
        )
        .unwrap();

    assert_eq!(page.nodes.len(), 2);
    assert!(page.nodes[0].is_sender && !page.nodes[0].is_recipient);
    assert!(!page.nodes[1].is_sender && page.nodes[1].is_recipient);
}

fn token_bundles() -> Vec<BlockBundle> {
    vec![
        BundleBuilder::new(0)
            .erc20_transfer(address(TOKEN), address(1), address(2), U256::from(5))
            .log(address(9), vec![B256::repeat_byte(0xaa)], Bytes::new())
            .build(),
        BundleBuilder::new(1)
            .erc20_transfer(address(TOKEN), address(2), address(3), U256::from(1))
            .build(),
    ]
}

#[test]
fn test_logs_filtered_by_topic_and_address() {
    let engine = engine(&token_bundles());

    let transfers = LogFilter {
        topics: vec![Some(vec![TRANSFER_EVENT_SIGNATURE])],
        ..LogFilter::default()
    };
    let page = engine
        .logs(&ctx(), &transfers, PageRequest::default())
        .unwrap();
    let heights: Vec<u64> = page.nodes.iter().map(|log| log.block_number).collect();
    assert_eq!(heights, vec![1, 0]);
    assert_eq!(page.total_count, TotalCount::exact(2));

    let emitter = LogFilter {
        addresses: vec![address(9)],
        ..LogFilter::default()
    };
    let page = engine.logs(&ctx(), &emitter, PageRequest::default()).unwrap();
    assert_eq!(page.nodes.len(), 1);
    assert_eq!(page.nodes[0].topics, vec![B256::repeat_byte(0xaa)]);

    // Second topic position must be the sender address(2).
    let from_two = LogFilter {
        topics: vec![None, Some(vec![address(2).into_word()])],
        ..LogFilter::default()
    };
    let page = engine.logs(&ctx(), &from_two, PageRequest::default()).unwrap();
    assert_eq!(page.nodes.len(), 1);
    assert_eq!(page.nodes[0].block_number, 1);
}

#[test]
fn test_erc20_transfers_by_account() {
    let engine = engine(&token_bundles());
    let filter = TokenTransferFilter {
        contract: Some(address(TOKEN)),
        account: Some(address(2)),
    };

    let page = engine
        .erc20_transfers(
            &ctx(),
            filter,
            BlockRangeFilter::unbounded(),
            PageRequest::default(),
        )
        .unwrap();

    assert_eq!(page.total_count, TotalCount::exact(2));
    assert_eq!(page.nodes[0].block_number, 1);
    assert_eq!(page.nodes[1].value, U256::from(5));
}

#[test]
fn test_disabled_family_is_unsupported() {
    let options = StoreOptions {
        indexes: EnabledIndexes {
            contracts: false,
            ..EnabledIndexes::all()
        },
        ..StoreOptions::default()
    };
    let engine = QueryEngine::new(store_with(&token_bundles(), options), QueryConfig::default());

    assert!(matches!(
        engine.contract_info(address(0x50)),
        Err(QueryError::Unsupported("contracts"))
    ));
    // Token transfers cannot be switched off.
    assert!(engine
        .erc20_transfers(
            &ctx(),
            TokenTransferFilter::default(),
            BlockRangeFilter::unbounded(),
            PageRequest::default()
        )
        .is_ok());
}

#[test]
fn test_cancelled_scan_stops() {
    let engine = engine(&chain(5));
    let token = CancellationToken::new();
    token.cancel();
    let ctx = QueryContext::with_cancellation(token);

    assert!(matches!(
        engine.transactions(&ctx, TransactionFilter::default(), PageRequest::default()),
        Err(QueryError::Cancelled)
    ));
    assert!(matches!(
        engine.logs(&ctx, &LogFilter::default(), PageRequest::default()),
        Err(QueryError::Cancelled)
    ));
}

#[test]
fn test_point_lookups_distinguish_absence() {
    let bundles = chain(3);
    let engine = engine(&bundles);
    let hash = bundles[1].transactions[0].hash;

    let receipt = engine.receipt(hash).unwrap().unwrap();
    assert_eq!(receipt.gas_used, chainidx_testing::TRANSFER_GAS);
    assert!(engine.receipt(B256::repeat_byte(0xee)).unwrap().is_none());

    let node = engine.transaction(hash).unwrap().unwrap();
    assert_eq!(node.location.block_number, 1);
    assert!(engine.block(99).unwrap().is_none());
    assert_eq!(
        engine.block_by_hash(bundles[2].block.hash).unwrap().unwrap().number,
        2
    );
}

#[test]
fn test_contract_info_reports_unverified() {
    let bundle = BundleBuilder::new(0)
        .create(address(1), address(0x50), Bytes::from_static(&[0x60, 0x00]))
        .build();
    let store = SqliteChainStore::in_memory().unwrap();
    let mut batch = IndexBatch::new(0);
    batch.contract_creations.push(ContractCreation {
        address: address(0x50),
        creator: address(1),
        transaction_hash: bundle.transactions[0].hash,
        block_number: 0,
        init_code_size: 2,
        call_index: None,
    });
    store.commit_height(&bundle, &batch).unwrap();
    let engine = QueryEngine::new(Arc::new(store), QueryConfig::default());

    let info = engine.contract_info(address(0x50)).unwrap();
    assert_eq!(info.creation.unwrap().creator, address(1));
    assert!(info.verification.is_none());

    let unknown = engine.contract_info(address(0x51)).unwrap();
    assert!(unknown.creation.is_none());
}

#[test]
fn test_balance_at_defaults_to_latest() {
    let bundles = chain(2);
    let store = SqliteChainStore::in_memory().unwrap();
    for (bundle, delta) in bundles.iter().zip([10i64, 5]) {
        let mut batch = IndexBatch::new(bundle.number());
        batch.balance_deltas.push(BalanceDelta {
            address: address(7),
            block_number: bundle.number(),
            delta: I256::try_from(delta).unwrap(),
        });
        store.commit_height(bundle, &batch).unwrap();
    }
    let engine = QueryEngine::new(Arc::new(store), QueryConfig::default());

    assert_eq!(
        engine.balance_at(address(7), None).unwrap().balance,
        I256::try_from(15).unwrap()
    );
    assert_eq!(
        engine.balance_at(address(7), Some(0)).unwrap().balance,
        I256::try_from(10).unwrap()
    );
}

#[test]
fn test_governance_read_models() {
    let bundles = chain(2);
    let governance = address(0x60);
    let event = |block: u64, log_index: u32, kind: SystemEventKind| SystemEvent {
        block_number: block,
        log_index,
        transaction_hash: bundles[block as usize].transactions[0].hash,
        contract: governance,
        kind,
    };

    let store = SqliteChainStore::in_memory().unwrap();

    let mut first = IndexBatch::new(0);
    first.system_events = vec![
        event(
            0,
            0,
            SystemEventKind::ProposalCreated {
                proposal_id: U256::from(1),
                proposer: address(1),
                action_hash: B256::repeat_byte(0x01),
            },
        ),
        event(0, 1, SystemEventKind::Blacklisted { account: address(8) }),
        event(
            0,
            2,
            SystemEventKind::MinterConfigured {
                minter: address(3),
                allowance: U256::from(100),
            },
        ),
    ];
    store.commit_height(&bundles[0], &first).unwrap();

    let mut second = IndexBatch::new(1);
    second.system_events = vec![
        event(
            1,
            0,
            SystemEventKind::ProposalVoted {
                proposal_id: U256::from(1),
                voter: address(2),
                approve: true,
            },
        ),
        event(1, 1, SystemEventKind::UnBlacklisted { account: address(8) }),
        event(
            1,
            2,
            SystemEventKind::Mint {
                minter: address(3),
                to: address(4),
                amount: U256::from(40),
            },
        ),
    ];
    store.commit_height(&bundles[1], &second).unwrap();

    let engine = QueryEngine::new(Arc::new(store), QueryConfig::default());

    let proposal = engine
        .proposal(governance, U256::from(1))
        .unwrap()
        .unwrap();
    assert_eq!(proposal.approvals(), 1);
    assert!(engine.blacklist(None).unwrap().is_empty());

    let minters = engine.active_minters(Some(governance)).unwrap();
    assert_eq!(minters.len(), 1);
    assert_eq!(minters[0].minted, U256::from(40));
    assert_eq!(minters[0].allowance, U256::from(60));

    let events = engine
        .system_events(
            &ctx(),
            &SystemEventFilter::default(),
            BlockRangeFilter::unbounded(),
            PageRequest::default(),
        )
        .unwrap();
    assert_eq!(events.total_count, TotalCount::exact(6));
    assert_eq!(events.page_info.start_cursor, Some(Cursor::new(1, 2)));
}
