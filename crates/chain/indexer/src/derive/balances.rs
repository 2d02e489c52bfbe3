//! Native balance deltas.
//!
//! Per transaction: the fee payer is charged `gas_used * effective_price`
//! plus any blob fee, the block miner earns `gas_used * tip`, and on success
//! the value moves from sender to recipient. Successful value-carrying trace
//! frames move value as well. The base fee is burned and credited to nobody.

use std::collections::BTreeMap;

use alloy_primitives::{Address, I256, U256};
use chainidx_primitives::BalanceDelta;

use super::BlockContext;

#[derive(Default)]
struct Ledger(BTreeMap<Address, I256>);

impl Ledger {
    fn credit(&mut self, address: Address, amount: U256) {
        let entry = self.0.entry(address).or_insert(I256::ZERO);
        *entry = entry.saturating_add(signed(amount));
    }

    fn debit(&mut self, address: Address, amount: U256) {
        let entry = self.0.entry(address).or_insert(I256::ZERO);
        *entry = entry.saturating_sub(signed(amount));
    }

    fn transfer(&mut self, from: Address, to: Address, amount: U256) {
        if amount.is_zero() || from == to {
            return;
        }
        self.debit(from, amount);
        self.credit(to, amount);
    }
}

/// Amounts above `I256::MAX` cannot occur on a real chain; saturate.
fn signed(amount: U256) -> I256 {
    I256::try_from(amount).unwrap_or(I256::MAX)
}

pub(super) fn balance_deltas(ctx: &BlockContext<'_>) -> Vec<BalanceDelta> {
    let block = &ctx.bundle.block;
    let mut ledger = Ledger::default();

    for (tx, view) in ctx.transactions() {
        let fee = U256::from(view.fee()).saturating_add(U256::from(view.blob_fee()));
        ledger.debit(tx.fee_payer_or_sender(), fee);

        let tip = (view.gas_used as u128).saturating_mul(tx.effective_tip(block.base_fee_per_gas));
        ledger.credit(block.miner, U256::from(tip));

        if view.receipt.status {
            if let Some(to) = BlockContext::recipient(tx, view) {
                ledger.transfer(tx.from, to, tx.value);
            }
        }
    }

    for call in &ctx.bundle.internal_calls {
        if !call.call_type.transfers_value()
            || call.error.is_some()
            || !ctx.succeeded(&call.transaction_hash)
        {
            continue;
        }
        if let Some(to) = call.to {
            ledger.transfer(call.from, to, call.value);
        }
    }

    ledger
        .0
        .into_iter()
        .filter(|(_, delta)| !delta.is_zero())
        .map(|(address, delta)| BalanceDelta {
            address,
            block_number: block.number,
            delta,
        })
        .collect()
}
