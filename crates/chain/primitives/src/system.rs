//! System-contract governance events and the read models folded from them.
//!
//! Only the events are persisted. Proposal state, the active minter set, the
//! blacklist and membership lists are rebuilt on demand by folding events in
//! chain order, so a rollback never leaves a stale materialized row behind.

use std::collections::BTreeMap;

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// A decoded governance event with its chain position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemEvent {
    pub block_number: u64,
    pub log_index: u32,
    pub transaction_hash: B256,
    /// Emitting system contract.
    pub contract: Address,
    pub kind: SystemEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SystemEventKind {
    ProposalCreated {
        proposal_id: U256,
        proposer: Address,
        action_hash: B256,
    },
    ProposalVoted {
        proposal_id: U256,
        voter: Address,
        approve: bool,
    },
    ProposalExecuted {
        proposal_id: U256,
        success: bool,
    },
    Mint {
        minter: Address,
        to: Address,
        amount: U256,
    },
    Burn {
        burner: Address,
        from: Address,
        amount: U256,
    },
    MinterConfigured {
        minter: Address,
        allowance: U256,
    },
    MinterRemoved {
        minter: Address,
    },
    ValidatorAdded {
        validator: Address,
    },
    ValidatorRemoved {
        validator: Address,
    },
    Blacklisted {
        account: Address,
    },
    UnBlacklisted {
        account: Address,
    },
    MemberAdded {
        member: Address,
    },
    MemberRemoved {
        member: Address,
    },
}

impl SystemEventKind {
    /// Stable name, persisted as the event type column.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ProposalCreated { .. } => "proposal_created",
            Self::ProposalVoted { .. } => "proposal_voted",
            Self::ProposalExecuted { .. } => "proposal_executed",
            Self::Mint { .. } => "mint",
            Self::Burn { .. } => "burn",
            Self::MinterConfigured { .. } => "minter_configured",
            Self::MinterRemoved { .. } => "minter_removed",
            Self::ValidatorAdded { .. } => "validator_added",
            Self::ValidatorRemoved { .. } => "validator_removed",
            Self::Blacklisted { .. } => "blacklisted",
            Self::UnBlacklisted { .. } => "un_blacklisted",
            Self::MemberAdded { .. } => "member_added",
            Self::MemberRemoved { .. } => "member_removed",
        }
    }

    /// Primary account the event is about, used for per-account filtering.
    pub const fn subject(&self) -> Option<Address> {
        match self {
            Self::ProposalCreated { proposer, .. } => Some(*proposer),
            Self::ProposalVoted { voter, .. } => Some(*voter),
            Self::ProposalExecuted { .. } => None,
            Self::Mint { to, .. } => Some(*to),
            Self::Burn { from, .. } => Some(*from),
            Self::MinterConfigured { minter, .. } | Self::MinterRemoved { minter } => {
                Some(*minter)
            }
            Self::ValidatorAdded { validator } | Self::ValidatorRemoved { validator } => {
                Some(*validator)
            }
            Self::Blacklisted { account } | Self::UnBlacklisted { account } => Some(*account),
            Self::MemberAdded { member } | Self::MemberRemoved { member } => Some(*member),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Voting,
    Executed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalVote {
    pub voter: Address,
    pub approve: bool,
    pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub contract: Address,
    pub proposal_id: U256,
    pub proposer: Address,
    pub action_hash: B256,
    pub created_block: u64,
    pub status: ProposalStatus,
    pub votes: Vec<ProposalVote>,
    pub executed_block: Option<u64>,
}

impl Proposal {
    pub fn approvals(&self) -> usize {
        self.votes.iter().filter(|v| v.approve).count()
    }

    pub fn rejections(&self) -> usize {
        self.votes.len() - self.approvals()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinterState {
    pub minter: Address,
    pub allowance: U256,
    pub minted: U256,
    pub burned: U256,
    pub configured_block: u64,
}

/// Fold events (in chain order) into proposals, ordered by contract and id.
///
/// A vote replaces the same voter's earlier vote. Votes and executions for
/// proposals never created are ignored.
pub fn fold_proposals<'a>(events: impl IntoIterator<Item = &'a SystemEvent>) -> Vec<Proposal> {
    let mut proposals: BTreeMap<(Address, U256), Proposal> = BTreeMap::new();

    for event in events {
        match &event.kind {
            SystemEventKind::ProposalCreated {
                proposal_id,
                proposer,
                action_hash,
            } => {
                proposals.insert(
                    (event.contract, *proposal_id),
                    Proposal {
                        contract: event.contract,
                        proposal_id: *proposal_id,
                        proposer: *proposer,
                        action_hash: *action_hash,
                        created_block: event.block_number,
                        status: ProposalStatus::Voting,
                        votes: Vec::new(),
                        executed_block: None,
                    },
                );
            }
            SystemEventKind::ProposalVoted {
                proposal_id,
                voter,
                approve,
            } => {
                if let Some(proposal) = proposals.get_mut(&(event.contract, *proposal_id)) {
                    proposal.votes.retain(|v| v.voter != *voter);
                    proposal.votes.push(ProposalVote {
                        voter: *voter,
                        approve: *approve,
                        block_number: event.block_number,
                    });
                }
            }
            SystemEventKind::ProposalExecuted {
                proposal_id,
                success,
            } => {
                if let Some(proposal) = proposals.get_mut(&(event.contract, *proposal_id)) {
                    proposal.status = if *success {
                        ProposalStatus::Executed
                    } else {
                        ProposalStatus::Failed
                    };
                    proposal.executed_block = Some(event.block_number);
                }
            }
            _ => {}
        }
    }

    proposals.into_values().collect()
}

/// Active minters with their allowance and running mint/burn totals.
pub fn fold_minters<'a>(events: impl IntoIterator<Item = &'a SystemEvent>) -> Vec<MinterState> {
    let mut minters: BTreeMap<Address, MinterState> = BTreeMap::new();

    for event in events {
        match &event.kind {
            SystemEventKind::MinterConfigured { minter, allowance } => {
                let entry = minters.entry(*minter).or_insert_with(|| MinterState {
                    minter: *minter,
                    allowance: U256::ZERO,
                    minted: U256::ZERO,
                    burned: U256::ZERO,
                    configured_block: event.block_number,
                });
                entry.allowance = *allowance;
                entry.configured_block = event.block_number;
            }
            SystemEventKind::MinterRemoved { minter } => {
                minters.remove(minter);
            }
            SystemEventKind::Mint { minter, amount, .. } => {
                if let Some(state) = minters.get_mut(minter) {
                    state.minted = state.minted.saturating_add(*amount);
                    state.allowance = state.allowance.saturating_sub(*amount);
                }
            }
            SystemEventKind::Burn { burner, amount, .. } => {
                if let Some(state) = minters.get_mut(burner) {
                    state.burned = state.burned.saturating_add(*amount);
                }
            }
            _ => {}
        }
    }

    minters.into_values().collect()
}

/// Accounts currently blacklisted.
pub fn fold_blacklist<'a>(events: impl IntoIterator<Item = &'a SystemEvent>) -> Vec<Address> {
    fold_membership(events, |kind| match kind {
        SystemEventKind::Blacklisted { account } => Some((*account, true)),
        SystemEventKind::UnBlacklisted { account } => Some((*account, false)),
        _ => None,
    })
}

/// Current council members.
pub fn fold_members<'a>(events: impl IntoIterator<Item = &'a SystemEvent>) -> Vec<Address> {
    fold_membership(events, |kind| match kind {
        SystemEventKind::MemberAdded { member } => Some((*member, true)),
        SystemEventKind::MemberRemoved { member } => Some((*member, false)),
        _ => None,
    })
}

/// Validators registered through governance.
pub fn fold_validators<'a>(events: impl IntoIterator<Item = &'a SystemEvent>) -> Vec<Address> {
    fold_membership(events, |kind| match kind {
        SystemEventKind::ValidatorAdded { validator } => Some((*validator, true)),
        SystemEventKind::ValidatorRemoved { validator } => Some((*validator, false)),
        _ => None,
    })
}

fn fold_membership<'a>(
    events: impl IntoIterator<Item = &'a SystemEvent>,
    classify: impl Fn(&SystemEventKind) -> Option<(Address, bool)>,
) -> Vec<Address> {
    let mut members = std::collections::BTreeSet::new();
    for event in events {
        match classify(&event.kind) {
            Some((account, true)) => {
                members.insert(account);
            }
            Some((account, false)) => {
                members.remove(&account);
            }
            None => {}
        }
    }
    members.into_iter().collect()
}

#[cfg(test)]
#[allow(clippy::indexing_slicing, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn event(block_number: u64, log_index: u32, kind: SystemEventKind) -> SystemEvent {
        SystemEvent {
            block_number,
            log_index,
            transaction_hash: B256::repeat_byte(block_number as u8),
            contract: Address::repeat_byte(0x10),
            kind,
        }
    }

    #[test]
    fn test_proposal_lifecycle() {
        let id = U256::from(1u64);
        let events = vec![
            event(
                1,
                0,
                SystemEventKind::ProposalCreated {
                    proposal_id: id,
                    proposer: Address::repeat_byte(1),
                    action_hash: B256::repeat_byte(0xab),
                },
            ),
            event(
                2,
                0,
                SystemEventKind::ProposalVoted {
                    proposal_id: id,
                    voter: Address::repeat_byte(2),
                    approve: false,
                },
            ),
            // Same voter changes their mind.
            event(
                3,
                0,
                SystemEventKind::ProposalVoted {
                    proposal_id: id,
                    voter: Address::repeat_byte(2),
                    approve: true,
                },
            ),
            event(
                3,
                1,
                SystemEventKind::ProposalVoted {
                    proposal_id: id,
                    voter: Address::repeat_byte(3),
                    approve: true,
                },
            ),
            event(
                4,
                0,
                SystemEventKind::ProposalExecuted {
                    proposal_id: id,
                    success: true,
                },
            ),
            // Vote for a proposal that was never created.
            event(
                4,
                1,
                SystemEventKind::ProposalVoted {
                    proposal_id: U256::from(9u64),
                    voter: Address::repeat_byte(2),
                    approve: true,
                },
            ),
        ];

        let proposals = fold_proposals(&events);
        assert_eq!(proposals.len(), 1);
        let p = &proposals[0];
        assert_eq!(p.status, ProposalStatus::Executed);
        assert_eq!(p.approvals(), 2);
        assert_eq!(p.rejections(), 0);
        assert_eq!(p.executed_block, Some(4));
    }

    #[test]
    fn test_minter_allowance_tracks_mints() {
        let minter = Address::repeat_byte(7);
        let events = vec![
            event(
                1,
                0,
                SystemEventKind::MinterConfigured {
                    minter,
                    allowance: U256::from(1_000u64),
                },
            ),
            event(
                2,
                0,
                SystemEventKind::Mint {
                    minter,
                    to: Address::repeat_byte(8),
                    amount: U256::from(300u64),
                },
            ),
            event(
                2,
                1,
                SystemEventKind::Burn {
                    burner: minter,
                    from: Address::repeat_byte(8),
                    amount: U256::from(50u64),
                },
            ),
        ];

        let minters = fold_minters(&events);
        assert_eq!(minters.len(), 1);
        assert_eq!(minters[0].allowance, U256::from(700u64));
        assert_eq!(minters[0].minted, U256::from(300u64));
        assert_eq!(minters[0].burned, U256::from(50u64));

        let mut removed = events.clone();
        removed.push(event(3, 0, SystemEventKind::MinterRemoved { minter }));
        assert!(fold_minters(&removed).is_empty());
    }

    #[test]
    fn test_blacklist_add_remove() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let events = vec![
            event(1, 0, SystemEventKind::Blacklisted { account: a }),
            event(1, 1, SystemEventKind::Blacklisted { account: b }),
            event(2, 0, SystemEventKind::UnBlacklisted { account: a }),
        ];
        assert_eq!(fold_blacklist(&events), vec![b]);
        assert!(fold_members(&events).is_empty());
    }

    #[test]
    fn test_event_kind_serde_tag() {
        let kind = SystemEventKind::MemberAdded {
            member: Address::repeat_byte(1),
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "member_added");
        let back: SystemEventKind = serde_json::from_value(json).unwrap();
        assert_eq!(back, kind);
    }
}
