//! ERC20 and ERC721 `Transfer` logs.
//!
//! Both standards share one event signature. Three topics mean the value is
//! in the data (ERC20), four mean the token id is indexed (ERC721). Any other
//! topic count is some unrelated contract reusing the name and is ignored.

use chainidx_primitives::{
    DecodeError, Erc20Transfer, Erc721Transfer, StoredLog, TRANSFER_EVENT_SIGNATURE,
};

use super::BlockContext;
use crate::abi::{decode_log, IERC20, IERC721};

#[derive(Debug, Default)]
pub(super) struct TokenTransfers {
    pub erc20: Vec<Erc20Transfer>,
    pub erc721: Vec<Erc721Transfer>,
}

pub(super) fn token_transfers(ctx: &BlockContext<'_>, failures: &mut u64) -> TokenTransfers {
    let mut transfers = TokenTransfers::default();

    for log in ctx.bundle.logs() {
        if log.removed || log.topics.first() != Some(&TRANSFER_EVENT_SIGNATURE) {
            continue;
        }
        let decoded = match log.topics.len() {
            3 => decode_erc20(log).map(|transfer| transfers.erc20.push(transfer)),
            4 => decode_erc721(log).map(|transfer| transfers.erc721.push(transfer)),
            _ => Ok(()),
        };
        if let Err(err) = decoded {
            tracing::warn!(
                block = log.block_number,
                log_index = log.log_index,
                token = %log.address,
                %err,
                "Skipping undecodable token transfer"
            );
            *failures += 1;
        }
    }

    transfers
}

fn decode_erc20(log: &StoredLog) -> Result<Erc20Transfer, DecodeError> {
    let event: IERC20::Transfer = decode_log(log)?;
    Ok(Erc20Transfer {
        contract: log.address,
        from: event.from,
        to: event.to,
        value: event.value,
        transaction_hash: log.transaction_hash,
        log_index: log.log_index,
        block_number: log.block_number,
        transaction_index: log.transaction_index,
    })
}

fn decode_erc721(log: &StoredLog) -> Result<Erc721Transfer, DecodeError> {
    let event: IERC721::Transfer = decode_log(log)?;
    Ok(Erc721Transfer {
        contract: log.address,
        from: event.from,
        to: event.to,
        token_id: event.tokenId,
        transaction_hash: log.transaction_hash,
        log_index: log.log_index,
        block_number: log.block_number,
        transaction_index: log.transaction_index,
    })
}
