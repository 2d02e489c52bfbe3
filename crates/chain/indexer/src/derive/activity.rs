//! Address buckets, contract creations and internal transactions.

use alloy_primitives::Address;
use chainidx_primitives::{AddressTransaction, ContractCreation, InternalTransaction};

use super::BlockContext;

/// One record per (address, transaction). An address that both sends and
/// receives gets a single record with both flags set.
pub(super) fn address_transactions(ctx: &BlockContext<'_>) -> Vec<AddressTransaction> {
    let height = ctx.height();
    let mut records = Vec::with_capacity(ctx.views.len() * 2);

    for (index, (tx, view)) in ctx.transactions().enumerate() {
        let record = |address: Address, is_sender: bool, is_recipient: bool| AddressTransaction {
            address,
            block_number: height,
            transaction_index: index as u32,
            transaction_hash: tx.hash,
            is_sender,
            is_recipient,
        };

        match BlockContext::recipient(tx, view) {
            Some(to) if to == tx.from => records.push(record(tx.from, true, true)),
            Some(to) => {
                records.push(record(tx.from, true, false));
                records.push(record(to, false, true));
            }
            None => records.push(record(tx.from, true, false)),
        }
    }

    records
}

/// Top-level deployments from receipts, then CREATE frames from traces.
///
/// Only successful creations count: a reverted deployment or a failed frame
/// leaves no code behind.
pub(super) fn contract_creations(ctx: &BlockContext<'_>) -> Vec<ContractCreation> {
    let height = ctx.height();
    let mut creations: Vec<ContractCreation> = ctx
        .transactions()
        .filter(|(tx, view)| tx.is_contract_creation() && view.receipt.status)
        .filter_map(|(tx, view)| {
            Some(ContractCreation {
                address: view.contract_address?,
                creator: tx.from,
                transaction_hash: tx.hash,
                block_number: height,
                init_code_size: tx.input.len() as u64,
                call_index: None,
            })
        })
        .collect();

    creations.extend(
        ctx.bundle
            .internal_calls
            .iter()
            .filter(|call| call.call_type.is_create() && call.error.is_none())
            .filter(|call| ctx.succeeded(&call.transaction_hash))
            .filter_map(|call| {
                Some(ContractCreation {
                    address: call.to?,
                    creator: call.from,
                    transaction_hash: call.transaction_hash,
                    block_number: height,
                    init_code_size: call.input.len() as u64,
                    call_index: Some(call.call_index),
                })
            }),
    );

    creations
}

pub(super) fn internal_transactions(ctx: &BlockContext<'_>) -> Vec<InternalTransaction> {
    let height = ctx.height();
    ctx.bundle
        .internal_calls
        .iter()
        .filter_map(|call| {
            let transaction_index = ctx.transaction_index(&call.transaction_hash)?;
            Some(InternalTransaction {
                transaction_hash: call.transaction_hash,
                call_index: call.call_index,
                block_number: height,
                transaction_index,
                call_type: call.call_type,
                from: call.from,
                to: call.to,
                value: call.value,
                gas: call.gas,
                gas_used: call.gas_used,
                input: call.input.clone(),
                depth: call.depth,
                error: call.error.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::indexing_slicing, clippy::unwrap_used)]
mod tests {
    use super::*;
    use alloy_primitives::{Bytes, U256};
    use chainidx_primitives::CallType;
    use chainidx_testing::{address, BundleBuilder};

    #[test]
    fn test_sender_and_recipient_buckets() {
        let bundle = BundleBuilder::new(4)
            .transfer(address(1), address(2), U256::from(5u64))
            .transfer(address(3), address(3), U256::from(1u64))
            .build();
        let ctx = BlockContext::new(&bundle);
        let records = address_transactions(&ctx);

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].address, address(1));
        assert!(records[0].is_sender && !records[0].is_recipient);
        assert_eq!(records[1].address, address(2));
        assert!(!records[1].is_sender && records[1].is_recipient);
        assert_eq!(records[2].address, address(3));
        assert!(records[2].is_sender && records[2].is_recipient);
        assert_eq!(records[2].transaction_index, 1);
    }

    #[test]
    fn test_creation_recipient_is_created_contract() {
        let bundle = BundleBuilder::new(2)
            .create(address(1), address(0xc1), Bytes::from_static(&[0x60, 0x80]))
            .build();
        let ctx = BlockContext::new(&bundle);

        let records = address_transactions(&ctx);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].address, address(0xc1));

        let creations = contract_creations(&ctx);
        assert_eq!(creations.len(), 1);
        assert_eq!(creations[0].creator, address(1));
        assert_eq!(creations[0].init_code_size, 2);
        assert_eq!(creations[0].call_index, None);
    }

    #[test]
    fn test_reverted_deployment_not_recorded() {
        let bundle = BundleBuilder::new(2)
            .create(address(1), address(0xc1), Bytes::from_static(&[0x60]))
            .reverted()
            .build();
        let ctx = BlockContext::new(&bundle);
        assert!(contract_creations(&ctx).is_empty());
    }

    #[test]
    fn test_trace_creations_and_internal_transactions() {
        let bundle = BundleBuilder::new(6)
            .transfer(address(1), address(0xf0), U256::ZERO)
            .internal_call(
                CallType::Create2,
                address(0xf0),
                Some(address(0xc2)),
                U256::ZERO,
                Bytes::from_static(&[1, 2, 3]),
            )
            .internal_call(
                CallType::Call,
                address(0xc2),
                Some(address(4)),
                U256::from(9u64),
                Bytes::new(),
            )
            .build();
        let ctx = BlockContext::new(&bundle);

        let creations = contract_creations(&ctx);
        assert_eq!(creations.len(), 1);
        assert_eq!(creations[0].address, address(0xc2));
        assert_eq!(creations[0].creator, address(0xf0));
        assert_eq!(creations[0].call_index, Some(1));
        // The create frame's input is its init code.
        assert_eq!(creations[0].init_code_size, 3);

        let internal = internal_transactions(&ctx);
        assert_eq!(internal.len(), 2);
        assert_eq!(internal[1].call_index, 2);
        assert_eq!(internal[1].transaction_index, 0);
        assert_eq!(internal[1].value, U256::from(9u64));
    }
}
