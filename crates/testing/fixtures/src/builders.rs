//! Deterministic block bundle construction.
//!
//! Hashes are derived from `(height, fork)` so two builders for the same
//! height and fork produce identical bundles, and a different fork produces a
//! competing block for the same height.

use alloy_primitives::{keccak256, Address, Bloom, Bytes, B256, U256};
use chainidx_primitives::{
    AggregatedSeal, BalanceSnapshot, BlockBundle, CallType, EpochInfo, InternalCall,
    SignedAuthorization, StoredBlock, StoredLog, StoredReceipt, StoredTransaction, TxSignature,
    TxType, WbftExtra, TRANSFER_EVENT_SIGNATURE,
};

/// Gas charged for a plain value transfer.
pub const TRANSFER_GAS: u64 = 21_000;

/// One gwei, the default legacy gas price.
pub const GWEI: u128 = 1_000_000_000;

/// A small, recognisable address.
pub fn address(n: u8) -> Address {
    Address::repeat_byte(n)
}

pub fn block_hash(number: u64, fork: u8) -> B256 {
    let mut preimage = b"block".to_vec();
    preimage.extend_from_slice(&number.to_be_bytes());
    preimage.push(fork);
    keccak256(preimage)
}

pub fn tx_hash(number: u64, fork: u8, index: usize) -> B256 {
    let mut preimage = b"tx".to_vec();
    preimage.extend_from_slice(&number.to_be_bytes());
    preimage.push(fork);
    preimage.extend_from_slice(&(index as u64).to_be_bytes());
    keccak256(preimage)
}

/// Address of a contract created by `creator` at `(number, index)`.
pub fn contract_address(creator: Address, number: u64, index: usize) -> Address {
    let mut preimage = creator.to_vec();
    preimage.extend_from_slice(&number.to_be_bytes());
    preimage.extend_from_slice(&(index as u64).to_be_bytes());
    let hash = keccak256(preimage);
    Address::from_slice(hash.get(12..).unwrap_or_default())
}

/// Left-pad an address into a log topic.
pub fn address_topic(address: Address) -> B256 {
    address.into_word()
}

/// Legacy value transfer with a zero signature.
pub fn transaction(from: Address, to: Option<Address>, value: U256) -> StoredTransaction {
    StoredTransaction {
        hash: B256::ZERO,
        tx_type: TxType::Legacy,
        chain_id: Some(1),
        nonce: 0,
        from,
        to,
        value,
        gas: 100_000,
        input: Bytes::new(),
        gas_price: Some(GWEI),
        max_fee_per_gas: None,
        max_priority_fee_per_gas: None,
        max_fee_per_blob_gas: None,
        blob_versioned_hashes: vec![],
        signature: TxSignature {
            v: 27,
            r: U256::from(1u64),
            s: U256::from(1u64),
        },
        access_list: None,
        authorization_list: None,
        fee_payer: None,
    }
}

/// WBFT extra data sealed by the given validator positions.
pub fn wbft_extra(
    round: u32,
    prepared: &[usize],
    committed: &[usize],
    epoch_info: Option<EpochInfo>,
) -> WbftExtra {
    WbftExtra {
        vanity: Bytes::from(vec![0u8; 32]),
        randao_reveal: Bytes::new(),
        prev_round: 0,
        prev_prepared_seal: None,
        prev_committed_seal: None,
        round,
        prepared_seal: Some(AggregatedSeal::from_indices(
            prepared,
            Bytes::from_static(&[0xaa]),
        )),
        committed_seal: Some(AggregatedSeal::from_indices(
            committed,
            Bytes::from_static(&[0xbb]),
        )),
        gas_tip: U256::from(GWEI),
        epoch_info,
    }
}

#[derive(Debug, Clone)]
struct PendingTx {
    tx: StoredTransaction,
    gas_used: u64,
    status: bool,
    contract_address: Option<Address>,
    logs: Vec<(Address, Vec<B256>, Bytes)>,
    calls: Vec<InternalCall>,
}

/// Builds a [`BlockBundle`] that passes `validate()`.
#[derive(Debug, Clone)]
pub struct BundleBuilder {
    number: u64,
    fork: u8,
    timestamp: u64,
    base_fee: Option<u64>,
    miner: Address,
    extra_data: Bytes,
    txs: Vec<PendingTx>,
    snapshots: Vec<(Address, U256)>,
}

impl BundleBuilder {
    pub fn new(number: u64) -> Self {
        Self {
            number,
            fork: 0,
            timestamp: 1_700_000_000 + number * 2,
            base_fee: None,
            miner: address(0xee),
            extra_data: Bytes::new(),
            txs: Vec::new(),
            snapshots: Vec::new(),
        }
    }

    /// Produce the block of a competing branch at the same height.
    pub fn fork(mut self, fork: u8) -> Self {
        self.fork = fork;
        self
    }

    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn base_fee(mut self, base_fee: u64) -> Self {
        self.base_fee = Some(base_fee);
        self
    }

    pub fn miner(mut self, miner: Address) -> Self {
        self.miner = miner;
        self
    }

    pub fn extra_data(mut self, extra_data: Bytes) -> Self {
        self.extra_data = extra_data;
        self
    }

    pub fn wbft(self, extra: &WbftExtra) -> Self {
        self.extra_data(extra.encode())
    }

    /// Append a transaction. Its hash is replaced by the deterministic one.
    pub fn tx(mut self, tx: StoredTransaction, gas_used: u64) -> Self {
        self.txs.push(PendingTx {
            tx,
            gas_used,
            status: true,
            contract_address: None,
            logs: Vec::new(),
            calls: Vec::new(),
        });
        self
    }

    pub fn transfer(self, from: Address, to: Address, value: U256) -> Self {
        self.tx(transaction(from, Some(to), value), TRANSFER_GAS)
    }

    /// Contract deployment; the receipt reports `contract`.
    pub fn create(mut self, from: Address, contract: Address, init_code: Bytes) -> Self {
        let tx = StoredTransaction {
            input: init_code,
            gas: 1_000_000,
            ..transaction(from, None, U256::ZERO)
        };
        self = self.tx(tx, 200_000);
        if let Some(last) = self.txs.last_mut() {
            last.contract_address = Some(contract);
        }
        self
    }

    /// EIP-7702 transaction carrying `authorizations`.
    pub fn set_code(
        self,
        from: Address,
        to: Address,
        authorizations: Vec<SignedAuthorization>,
    ) -> Self {
        let tx = StoredTransaction {
            tx_type: TxType::SetCode,
            gas_price: None,
            max_fee_per_gas: Some(2 * GWEI),
            max_priority_fee_per_gas: Some(GWEI),
            authorization_list: Some(authorizations),
            ..transaction(from, Some(to), U256::ZERO)
        };
        self.tx(tx, 50_000)
    }

    /// Mark the last transaction as reverted.
    pub fn reverted(mut self) -> Self {
        if let Some(last) = self.txs.last_mut() {
            last.status = false;
        }
        self
    }

    /// Attach a log to the last transaction.
    pub fn log(mut self, emitter: Address, topics: Vec<B256>, data: Bytes) -> Self {
        if let Some(last) = self.txs.last_mut() {
            last.logs.push((emitter, topics, data));
        }
        self
    }

    /// Transaction to `token` emitting an ERC20 `Transfer`.
    pub fn erc20_transfer(self, token: Address, from: Address, to: Address, value: U256) -> Self {
        let topics = vec![TRANSFER_EVENT_SIGNATURE, address_topic(from), address_topic(to)];
        let data = Bytes::from(value.to_be_bytes::<32>().to_vec());
        self.transfer(from, token, U256::ZERO).log(token, topics, data)
    }

    /// Transaction to `token` emitting an ERC721 `Transfer`.
    pub fn erc721_transfer(
        self,
        token: Address,
        from: Address,
        to: Address,
        token_id: U256,
    ) -> Self {
        let topics = vec![
            TRANSFER_EVENT_SIGNATURE,
            address_topic(from),
            address_topic(to),
            B256::from(token_id.to_be_bytes::<32>()),
        ];
        self.transfer(from, token, U256::ZERO).log(token, topics, Bytes::new())
    }

    /// Attach a trace frame to the last transaction. Call indices follow
    /// insertion order starting at 1.
    pub fn internal_call(
        mut self,
        call_type: CallType,
        from: Address,
        to: Option<Address>,
        value: U256,
        input: Bytes,
    ) -> Self {
        if let Some(last) = self.txs.last_mut() {
            let call_index = last.calls.len() as u32 + 1;
            last.calls.push(InternalCall {
                transaction_hash: B256::ZERO,
                call_index,
                call_type,
                from,
                to,
                value,
                gas: 50_000,
                gas_used: 10_000,
                input,
                depth: 1,
                error: None,
            });
        }
        self
    }

    /// Absolute balance of `address` observed at this height.
    pub fn snapshot(mut self, address: Address, balance: U256) -> Self {
        self.snapshots.push((address, balance));
        self
    }

    pub fn build(self) -> BlockBundle {
        let number = self.number;
        let hash = block_hash(number, self.fork);
        let parent_hash = match number.checked_sub(1) {
            Some(parent) => block_hash(parent, 0),
            None => B256::ZERO,
        };

        let mut transactions = Vec::with_capacity(self.txs.len());
        let mut receipts = Vec::with_capacity(self.txs.len());
        let mut internal_calls = Vec::new();
        let mut cumulative = 0u64;
        let mut log_index = 0u32;

        for (index, pending) in self.txs.into_iter().enumerate() {
            let tx_hash = tx_hash(number, self.fork, index);
            cumulative += pending.gas_used;

            let logs = pending
                .logs
                .into_iter()
                .map(|(emitter, topics, data)| {
                    let log = StoredLog {
                        address: emitter,
                        topics,
                        data,
                        block_number: number,
                        block_hash: hash,
                        transaction_hash: tx_hash,
                        transaction_index: index as u32,
                        log_index,
                        removed: false,
                    };
                    log_index += 1;
                    log
                })
                .collect();

            internal_calls.extend(pending.calls.into_iter().map(|call| InternalCall {
                transaction_hash: tx_hash,
                ..call
            }));

            receipts.push(StoredReceipt {
                transaction_hash: tx_hash,
                status: pending.status,
                cumulative_gas_used: cumulative,
                logs_bloom: Bloom::ZERO,
                logs,
                contract_address: pending.contract_address,
                gas_used: None,
                effective_gas_price: None,
                blob_gas_used: None,
                blob_gas_price: None,
            });
            transactions.push(StoredTransaction {
                hash: tx_hash,
                ..pending.tx
            });
        }

        let block = StoredBlock {
            number,
            hash,
            parent_hash,
            state_root: B256::repeat_byte(0x01),
            transactions_root: B256::repeat_byte(0x02),
            receipts_root: B256::repeat_byte(0x03),
            timestamp: self.timestamp,
            miner: self.miner,
            gas_limit: 30_000_000,
            gas_used: cumulative,
            base_fee_per_gas: self.base_fee,
            blob_gas_used: None,
            excess_blob_gas: None,
            extra_data: self.extra_data,
            transaction_hashes: transactions.iter().map(|tx| tx.hash).collect(),
            uncles: vec![],
        };

        let balance_snapshots = self
            .snapshots
            .into_iter()
            .map(|(address, balance)| BalanceSnapshot {
                address,
                block_number: number,
                balance,
            })
            .collect();

        BlockBundle {
            block,
            transactions,
            receipts,
            internal_calls,
            balance_snapshots,
        }
    }
}

/// `len` linked blocks from genesis, each with one transfer from
/// `address(1)` to `address(2)`.
pub fn chain(len: u64) -> Vec<BlockBundle> {
    (0..len)
        .map(|n| {
            BundleBuilder::new(n)
                .transfer(address(1), address(2), U256::from(n + 1))
                .build()
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::indexing_slicing, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_built_bundles_validate() {
        let bundle = BundleBuilder::new(3)
            .transfer(address(1), address(2), U256::from(5u64))
            .erc20_transfer(address(0x70), address(1), address(3), U256::from(9u64))
            .erc721_transfer(address(0x71), address(1), address(3), U256::from(1u64))
            .create(address(1), address(0x72), Bytes::from_static(&[0x60, 0x80]))
            .internal_call(
                CallType::Create,
                address(0x72),
                Some(address(0x73)),
                U256::ZERO,
                Bytes::new(),
            )
            .snapshot(address(1), U256::from(1_000u64))
            .build();

        assert_eq!(bundle.validate(), Ok(()));
        assert_eq!(bundle.receipts[3].cumulative_gas_used, 3 * TRANSFER_GAS + 200_000);
        assert_eq!(bundle.logs().map(|log| log.log_index).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(bundle.internal_calls[0].transaction_hash, bundle.transactions[3].hash);
    }

    #[test]
    fn test_forks_differ_only_in_identity() {
        let a = BundleBuilder::new(4)
            .transfer(address(1), address(2), U256::from(1u64))
            .build();
        let b = BundleBuilder::new(4)
            .fork(1)
            .transfer(address(1), address(2), U256::from(1u64))
            .build();

        assert_ne!(a.block.hash, b.block.hash);
        assert_eq!(a.block.parent_hash, b.block.parent_hash);
        assert_ne!(a.transactions[0].hash, b.transactions[0].hash);
    }

    #[test]
    fn test_chain_links_parents() {
        let blocks = chain(3);
        assert_eq!(blocks[1].block.parent_hash, blocks[0].block.hash);
        assert_eq!(blocks[2].block.parent_hash, blocks[1].block.hash);
    }
}
