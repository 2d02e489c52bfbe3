//! Solidity event declarations the indexer decodes.
//!
//! ERC20 and ERC721 share the `Transfer(address,address,uint256)` signature
//! and differ only in whether the last argument is indexed, so each lives in
//! its own interface.

use alloy_sol_types::{sol, SolEvent};
use chainidx_primitives::{DecodeError, StoredLog};

sol! {
    #[derive(Debug)]
    interface IERC20 {
        event Transfer(address indexed from, address indexed to, uint256 value);
    }

    interface IERC721 {
        event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);
    }

    /// Native coin contract.
    interface INativeCoin {
        event Mint(address indexed minter, address indexed to, uint256 amount);
        event Burn(address indexed burner, address indexed from, uint256 amount);
        event MinterConfigured(address indexed minter, uint256 allowance);
        event MinterRemoved(address indexed minter);
        event Blacklisted(address indexed account);
        event UnBlacklisted(address indexed account);
    }

    /// Governance contracts.
    interface IGovernance {
        event ProposalCreated(uint256 indexed proposalId, address indexed proposer, bytes32 actionHash);
        event ProposalVoted(uint256 indexed proposalId, address indexed voter, bool approve);
        event ProposalExecuted(uint256 indexed proposalId, bool success);
        event MemberAdded(address indexed member);
        event MemberRemoved(address indexed member);
        event ValidatorAdded(address indexed validator);
        event ValidatorRemoved(address indexed validator);
    }
}

/// Decode a stored log as event `E`, validating its topics and ABI data.
pub fn decode_log<E: SolEvent>(log: &StoredLog) -> Result<E, DecodeError> {
    E::decode_raw_log(log.topics.iter().copied(), &log.data, true).map_err(|err| {
        DecodeError::Abi {
            event: E::SIGNATURE,
            reason: err.to_string(),
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use alloy_primitives::{Bytes, B256, U256};
    use chainidx_primitives::TRANSFER_EVENT_SIGNATURE;
    use chainidx_testing::{address, address_topic};

    fn log(topics: Vec<B256>, data: Bytes) -> StoredLog {
        StoredLog {
            address: address(0x70),
            topics,
            data,
            block_number: 1,
            block_hash: B256::ZERO,
            transaction_hash: B256::ZERO,
            transaction_index: 0,
            log_index: 0,
            removed: false,
        }
    }

    #[test]
    fn test_transfer_signatures_collide() {
        assert_eq!(IERC20::Transfer::SIGNATURE_HASH, TRANSFER_EVENT_SIGNATURE);
        assert_eq!(IERC721::Transfer::SIGNATURE_HASH, TRANSFER_EVENT_SIGNATURE);
    }

    #[test]
    fn test_decode_erc20_transfer() {
        let transfer: IERC20::Transfer = decode_log(&log(
            vec![TRANSFER_EVENT_SIGNATURE, address_topic(address(1)), address_topic(address(2))],
            Bytes::from(U256::from(9u64).to_be_bytes::<32>().to_vec()),
        ))
        .unwrap();
        assert_eq!(transfer.from, address(1));
        assert_eq!(transfer.to, address(2));
        assert_eq!(transfer.value, U256::from(9u64));
    }

    #[test]
    fn test_short_data_is_an_abi_error() {
        let err = decode_log::<IERC20::Transfer>(&log(
            vec![TRANSFER_EVENT_SIGNATURE, address_topic(address(1)), address_topic(address(2))],
            Bytes::from_static(&[1, 2]),
        ))
        .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Abi { event: "Transfer(address,address,uint256)", .. }
        ));
    }
}
