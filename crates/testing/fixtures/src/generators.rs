//! Proptest generators for chains of block bundles.
//!
//! Accounts and token contracts are drawn from small fixed pools so that
//! generated chains exercise shared address buckets and repeated NFT
//! transfers.

use alloy_primitives::{Address, Bytes, U256};
use chainidx_primitives::BlockBundle;
use proptest::prelude::*;

use crate::builders::{address, contract_address, BundleBuilder};

/// Externally owned accounts used by generated activity.
pub const ACCOUNT_POOL: u8 = 4;

/// First byte of the token contract pool (`0x70..0x72`).
const TOKEN_BASE: u8 = 0x70;
const TOKEN_POOL: u8 = 2;

/// Strategy for an account from the fixed pool.
pub fn arb_account() -> impl Strategy<Value = Address> {
    (1..=ACCOUNT_POOL).prop_map(address)
}

pub fn arb_token() -> impl Strategy<Value = Address> {
    (0..TOKEN_POOL).prop_map(|n| address(TOKEN_BASE + n))
}

/// Biased toward small values, with the occasional maximum.
pub fn arb_value() -> impl Strategy<Value = U256> {
    prop_oneof![
        8 => (0u64..1_000).prop_map(U256::from),
        3 => (1_000u64..u64::MAX).prop_map(U256::from),
        1 => Just(U256::MAX),
    ]
}

/// One unit of on-chain activity, materialised as one transaction.
#[derive(Debug, Clone)]
pub enum TestActivity {
    Transfer {
        from: Address,
        to: Address,
        value: U256,
    },
    Erc20 {
        token: Address,
        from: Address,
        to: Address,
        value: U256,
    },
    Erc721 {
        token: Address,
        from: Address,
        to: Address,
        token_id: U256,
    },
    Create {
        from: Address,
    },
}

pub fn arb_activity() -> impl Strategy<Value = TestActivity> {
    prop_oneof![
        5 => (arb_account(), arb_account(), arb_value())
            .prop_map(|(from, to, value)| TestActivity::Transfer { from, to, value }),
        3 => (arb_token(), arb_account(), arb_account(), arb_value())
            .prop_map(|(token, from, to, value)| TestActivity::Erc20 { token, from, to, value }),
        2 => (arb_token(), arb_account(), arb_account(), 0u64..4)
            .prop_map(|(token, from, to, id)| TestActivity::Erc721 {
                token,
                from,
                to,
                token_id: U256::from(id),
            }),
        1 => arb_account().prop_map(|from| TestActivity::Create { from }),
    ]
}

/// Build the bundle for `number` from its activity list.
pub fn bundle_from_activity(number: u64, activity: &[TestActivity]) -> BlockBundle {
    activity
        .iter()
        .enumerate()
        .fold(BundleBuilder::new(number), |builder, (index, item)| match item {
            TestActivity::Transfer { from, to, value } => builder.transfer(*from, *to, *value),
            TestActivity::Erc20 {
                token,
                from,
                to,
                value,
            } => builder.erc20_transfer(*token, *from, *to, *value),
            TestActivity::Erc721 {
                token,
                from,
                to,
                token_id,
            } => builder.erc721_transfer(*token, *from, *to, *token_id),
            TestActivity::Create { from } => builder.create(
                *from,
                contract_address(*from, number, index),
                Bytes::from_static(&[0x60, 0x80, 0x60, 0x40]),
            ),
        })
        .build()
}

/// Strategy for the activity of one block.
pub fn arb_block_activity(max_txs: usize) -> impl Strategy<Value = Vec<TestActivity>> {
    proptest::collection::vec(arb_activity(), 0..=max_txs)
}

/// Strategy for a chain of `1..=max_len` blocks starting at genesis.
pub fn arb_chain(max_len: usize, max_txs: usize) -> impl Strategy<Value = Vec<BlockBundle>> {
    proptest::collection::vec(arb_block_activity(max_txs), 1..=max_len).prop_map(|blocks| {
        blocks
            .iter()
            .enumerate()
            .map(|(number, activity)| bundle_from_activity(number as u64, activity))
            .collect()
    })
}
