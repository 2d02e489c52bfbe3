//! Registry of system-contract events.
//!
//! Each system contract has a role that fixes the set of events it may emit.
//! A log is decoded only when its emitter is a registered contract and its
//! first topic is one of that role's event signatures; every other log is
//! ignored without error.

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy_primitives::{Address, B256};
use alloy_sol_types::SolEvent;
use chainidx_operations::config::SystemContractsConfig;
use chainidx_primitives::{DecodeError, StoredLog, SystemEventKind};
use parking_lot::RwLock;

use crate::abi::decode_log;

/// Addresses of the contracts whose events become governance records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemContracts {
    /// Native coin contract: mint, burn, minter and blacklist events.
    pub native_token: Option<Address>,
    /// Governance contracts: proposal, member and validator events.
    pub governance: Vec<Address>,
}

impl SystemContracts {
    pub fn is_empty(&self) -> bool {
        self.native_token.is_none() && self.governance.is_empty()
    }
}

impl From<&SystemContractsConfig> for SystemContracts {
    fn from(config: &SystemContractsConfig) -> Self {
        Self {
            native_token: config.native_token,
            governance: config.governance.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ContractRole {
    NativeToken,
    Governance,
}

type DecodeFn = fn(&StoredLog) -> Result<SystemEventKind, DecodeError>;

#[derive(Clone, Copy)]
struct EventEntry {
    role: ContractRole,
    decode: DecodeFn,
}

fn entry<E: SolEvent>(role: ContractRole, decode: DecodeFn) -> (B256, EventEntry) {
    (E::SIGNATURE_HASH, EventEntry { role, decode })
}

/// Every system event, keyed by its first topic.
fn registry() -> BTreeMap<B256, EventEntry> {
    use ContractRole::{Governance, NativeToken};
    use crate::abi::IGovernance as gov;
    use crate::abi::INativeCoin as coin;

    BTreeMap::from([
        entry::<coin::Mint>(NativeToken, |log| {
            let event: coin::Mint = decode_log(log)?;
            Ok(SystemEventKind::Mint {
                minter: event.minter,
                to: event.to,
                amount: event.amount,
            })
        }),
        entry::<coin::Burn>(NativeToken, |log| {
            let event: coin::Burn = decode_log(log)?;
            Ok(SystemEventKind::Burn {
                burner: event.burner,
                from: event.from,
                amount: event.amount,
            })
        }),
        entry::<coin::MinterConfigured>(NativeToken, |log| {
            let event: coin::MinterConfigured = decode_log(log)?;
            Ok(SystemEventKind::MinterConfigured {
                minter: event.minter,
                allowance: event.allowance,
            })
        }),
        entry::<coin::MinterRemoved>(NativeToken, |log| {
            let event: coin::MinterRemoved = decode_log(log)?;
            Ok(SystemEventKind::MinterRemoved { minter: event.minter })
        }),
        entry::<coin::Blacklisted>(NativeToken, |log| {
            let event: coin::Blacklisted = decode_log(log)?;
            Ok(SystemEventKind::Blacklisted { account: event.account })
        }),
        entry::<coin::UnBlacklisted>(NativeToken, |log| {
            let event: coin::UnBlacklisted = decode_log(log)?;
            Ok(SystemEventKind::UnBlacklisted { account: event.account })
        }),
        entry::<gov::ProposalCreated>(Governance, |log| {
            let event: gov::ProposalCreated = decode_log(log)?;
            Ok(SystemEventKind::ProposalCreated {
                proposal_id: event.proposalId,
                proposer: event.proposer,
                action_hash: event.actionHash,
            })
        }),
        entry::<gov::ProposalVoted>(Governance, |log| {
            let event: gov::ProposalVoted = decode_log(log)?;
            Ok(SystemEventKind::ProposalVoted {
                proposal_id: event.proposalId,
                voter: event.voter,
                approve: event.approve,
            })
        }),
        entry::<gov::ProposalExecuted>(Governance, |log| {
            let event: gov::ProposalExecuted = decode_log(log)?;
            Ok(SystemEventKind::ProposalExecuted {
                proposal_id: event.proposalId,
                success: event.success,
            })
        }),
        entry::<gov::MemberAdded>(Governance, |log| {
            let event: gov::MemberAdded = decode_log(log)?;
            Ok(SystemEventKind::MemberAdded { member: event.member })
        }),
        entry::<gov::MemberRemoved>(Governance, |log| {
            let event: gov::MemberRemoved = decode_log(log)?;
            Ok(SystemEventKind::MemberRemoved { member: event.member })
        }),
        entry::<gov::ValidatorAdded>(Governance, |log| {
            let event: gov::ValidatorAdded = decode_log(log)?;
            Ok(SystemEventKind::ValidatorAdded { validator: event.validator })
        }),
        entry::<gov::ValidatorRemoved>(Governance, |log| {
            let event: gov::ValidatorRemoved = decode_log(log)?;
            Ok(SystemEventKind::ValidatorRemoved { validator: event.validator })
        }),
    ])
}

/// System-contract event decoder.
///
/// Shared by `Arc` between the maintainer and whoever manages the contract
/// list; [`EventDecoder::reload`] swaps the registered contracts in place.
pub struct EventDecoder {
    events: BTreeMap<B256, EventEntry>,
    contracts: RwLock<Arc<BTreeMap<Address, ContractRole>>>,
}

impl EventDecoder {
    pub fn new(contracts: SystemContracts) -> Self {
        Self {
            events: registry(),
            contracts: RwLock::new(Arc::new(roles(&contracts))),
        }
    }

    /// Decoder with no contracts registered; decodes nothing.
    pub fn disabled() -> Self {
        Self::new(SystemContracts::default())
    }

    /// Replace the registered contracts. Logs decoded afterwards use the new set.
    pub fn reload(&self, contracts: SystemContracts) {
        let roles = roles(&contracts);
        tracing::info!(contracts = roles.len(), "Reloaded system contract registry");
        *self.contracts.write() = Arc::new(roles);
    }

    pub fn is_system_contract(&self, address: &Address) -> bool {
        self.contracts.read().contains_key(address)
    }

    /// Decode a log.
    ///
    /// `None` when the log is not a system event. `Some(Err(_))` when it
    /// claims to be one but does not match the event layout.
    pub fn decode(&self, log: &StoredLog) -> Option<Result<SystemEventKind, DecodeError>> {
        let role = *self.contracts.read().get(&log.address)?;
        let entry = self.events.get(log.topics.first()?)?;
        if entry.role != role {
            return None;
        }
        Some((entry.decode)(log))
    }
}

impl std::fmt::Debug for EventDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDecoder")
            .field("events", &self.events.len())
            .field("contracts", &self.contracts.read())
            .finish()
    }
}

fn roles(contracts: &SystemContracts) -> BTreeMap<Address, ContractRole> {
    let mut roles: BTreeMap<_, _> = contracts
        .governance
        .iter()
        .map(|address| (*address, ContractRole::Governance))
        .collect();
    if let Some(token) = contracts.native_token {
        roles.insert(token, ContractRole::NativeToken);
    }
    roles
}

#[cfg(test)]
#[allow(clippy::indexing_slicing, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::abi::{IGovernance, INativeCoin};
    use alloy_primitives::{Bytes, U256};
    use chainidx_testing::{address, address_topic};

    fn log(emitter: Address, topics: Vec<B256>, data: Vec<u8>) -> StoredLog {
        StoredLog {
            address: emitter,
            topics,
            data: Bytes::from(data),
            block_number: 1,
            block_hash: B256::ZERO,
            transaction_hash: B256::ZERO,
            transaction_index: 0,
            log_index: 0,
            removed: false,
        }
    }

    fn word(value: u64) -> Vec<u8> {
        U256::from(value).to_be_bytes::<32>().to_vec()
    }

    fn decoder() -> EventDecoder {
        EventDecoder::new(SystemContracts {
            native_token: Some(address(0x10)),
            governance: vec![address(0x11)],
        })
    }

    #[test]
    fn test_registry_covers_both_roles() {
        let decoder = decoder();
        assert_eq!(decoder.events.len(), 13);
        let roles = |role| decoder.events.values().filter(|e| e.role == role).count();
        assert_eq!(roles(ContractRole::NativeToken), 6);
        assert_eq!(roles(ContractRole::Governance), 7);
    }

    #[test]
    fn test_decode_mint() {
        let decoded = decoder()
            .decode(&log(
                address(0x10),
                vec![
                    INativeCoin::Mint::SIGNATURE_HASH,
                    address_topic(address(1)),
                    address_topic(address(2)),
                ],
                word(40),
            ))
            .unwrap()
            .unwrap();
        assert_eq!(
            decoded,
            SystemEventKind::Mint {
                minter: address(1),
                to: address(2),
                amount: U256::from(40u64),
            }
        );
    }

    #[test]
    fn test_decode_proposal_events() {
        let decoder = decoder();
        let id = B256::from(U256::from(7u64).to_be_bytes::<32>());

        let created = decoder
            .decode(&log(
                address(0x11),
                vec![
                    IGovernance::ProposalCreated::SIGNATURE_HASH,
                    id,
                    address_topic(address(3)),
                ],
                B256::repeat_byte(0xab).to_vec(),
            ))
            .unwrap()
            .unwrap();
        assert_eq!(
            created,
            SystemEventKind::ProposalCreated {
                proposal_id: U256::from(7u64),
                proposer: address(3),
                action_hash: B256::repeat_byte(0xab),
            }
        );

        let voted = decoder
            .decode(&log(
                address(0x11),
                vec![
                    IGovernance::ProposalVoted::SIGNATURE_HASH,
                    id,
                    address_topic(address(4)),
                ],
                word(0),
            ))
            .unwrap()
            .unwrap();
        assert_eq!(
            voted,
            SystemEventKind::ProposalVoted {
                proposal_id: U256::from(7u64),
                voter: address(4),
                approve: false,
            }
        );
    }

    #[test]
    fn test_foreign_logs_ignored() {
        let decoder = decoder();
        let blacklisted = INativeCoin::Blacklisted::SIGNATURE_HASH;

        // Unregistered emitter.
        assert!(decoder
            .decode(&log(address(0x12), vec![blacklisted, address_topic(address(1))], vec![]))
            .is_none());
        // Event of another role.
        assert!(decoder
            .decode(&log(address(0x11), vec![blacklisted, address_topic(address(1))], vec![]))
            .is_none());
        // Unknown signature and anonymous log.
        assert!(decoder
            .decode(&log(address(0x10), vec![B256::repeat_byte(1)], vec![]))
            .is_none());
        assert!(decoder.decode(&log(address(0x10), vec![], vec![])).is_none());
    }

    #[test]
    fn test_malformed_system_logs() {
        let decoder = decoder();

        let short_data = log(
            address(0x10),
            vec![
                INativeCoin::Burn::SIGNATURE_HASH,
                address_topic(address(1)),
                address_topic(address(2)),
            ],
            vec![0u8; 16],
        );
        assert!(matches!(
            decoder.decode(&short_data),
            Some(Err(DecodeError::Abi { event: "Burn(address,address,uint256)", .. }))
        ));

        let missing_topic = log(
            address(0x11),
            vec![IGovernance::MemberAdded::SIGNATURE_HASH],
            vec![],
        );
        assert!(matches!(
            decoder.decode(&missing_topic),
            Some(Err(DecodeError::Abi { event: "MemberAdded(address)", .. }))
        ));

        // A bool word other than 0 or 1.
        let bad_vote = log(
            address(0x11),
            vec![
                IGovernance::ProposalVoted::SIGNATURE_HASH,
                B256::with_last_byte(1),
                address_topic(address(4)),
            ],
            word(2),
        );
        assert!(matches!(
            decoder.decode(&bad_vote),
            Some(Err(DecodeError::Abi { .. }))
        ));
    }

    #[test]
    fn test_reload_replaces_contracts() {
        let decoder = decoder();
        let member_added = log(
            address(0x20),
            vec![IGovernance::MemberAdded::SIGNATURE_HASH, address_topic(address(5))],
            vec![],
        );
        assert!(decoder.decode(&member_added).is_none());

        decoder.reload(SystemContracts {
            native_token: None,
            governance: vec![address(0x20)],
        });
        assert!(decoder.is_system_contract(&address(0x20)));
        assert!(!decoder.is_system_contract(&address(0x10)));
        assert_eq!(
            decoder.decode(&member_added).unwrap().unwrap(),
            SystemEventKind::MemberAdded { member: address(5) }
        );
    }
}
