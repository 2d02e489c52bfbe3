//! EIP-7702 authorization records.

use alloy_primitives::U256;
use chainidx_primitives::SetCodeAuthorizationRecord;

use super::BlockContext;

/// One record per authorization entry, whether or not it took effect.
///
/// The authority is only set when signature recovery succeeds. An
/// authorization applies when its signer is recoverable and it names either
/// this chain or chain id zero (valid on every chain).
pub(super) fn authorizations(
    ctx: &BlockContext<'_>,
    chain_id: u64,
    failures: &mut u64,
) -> Vec<SetCodeAuthorizationRecord> {
    let height = ctx.height();
    let chain_id = U256::from(chain_id);
    let mut records = Vec::new();

    for (index, (tx, _)) in ctx.transactions().enumerate() {
        let Some(list) = &tx.authorization_list else {
            continue;
        };

        for (position, auth) in list.iter().enumerate() {
            let (authority, error) = match auth.recover_authority() {
                Ok(authority) => {
                    let auth_chain = *auth.chain_id();
                    let error = (!auth_chain.is_zero() && auth_chain != chain_id).then(|| {
                        format!("chain id {auth_chain} does not match {chain_id}")
                    });
                    (Some(authority), error)
                }
                Err(err) => {
                    tracing::warn!(
                        block = height,
                        tx = %tx.hash,
                        authorization = position,
                        %err,
                        "Authorization signer could not be recovered"
                    );
                    *failures += 1;
                    (None, Some(err.to_string()))
                }
            };

            records.push(SetCodeAuthorizationRecord {
                transaction_hash: tx.hash,
                authorization_index: position as u32,
                block_number: height,
                transaction_index: index as u32,
                chain_id: *auth.chain_id(),
                target: *auth.address(),
                nonce: auth.nonce(),
                authority,
                applied: authority.is_some() && error.is_none(),
                error,
            });
        }
    }

    records
}
