//! WBFT round, seal and epoch records.
//!
//! Seal bitmaps are positions in the validator set of the block's epoch, so
//! a block can only be attributed once that set is known. The set for epoch
//! `e` is announced in the extra data of an earlier block and stored under
//! `e`; a block announcing its own set (genesis) is resolved against it.

use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::Address;
use chainidx_primitives::{
    AggregatedSeal, DecodeError, EpochRecord, StoredBlock, ValidatorActivity, WbftBlockRecord,
    WbftExtra,
};
use chainidx_store::{ConsensusReader, StoreResult, StoreResultExt};

/// Epoch number of `height`.
pub(crate) fn epoch_of(height: u64, epoch_length: u64) -> u64 {
    height.checked_div(epoch_length).unwrap_or(0)
}

/// Where validator sets come from while deriving a height.
pub trait ValidatorSource: Sync {
    /// Ordered validator set in force for `epoch`, as known before `height`.
    fn validators(&self, epoch: u64, height: u64) -> StoreResult<Option<Vec<Address>>>;
}

/// Epochs announced by heights not yet committed, layered over the store.
pub struct EpochOverlay<'a> {
    announced: BTreeMap<(u64, u64), EpochRecord>,
    store: Option<&'a dyn ConsensusReader>,
}

impl<'a> EpochOverlay<'a> {
    pub fn new(store: Option<&'a dyn ConsensusReader>) -> Self {
        Self {
            announced: BTreeMap::new(),
            store,
        }
    }

    pub fn insert(&mut self, record: EpochRecord) {
        self.announced
            .insert((record.epoch, record.announced_at), record);
    }

    pub fn len(&self) -> usize {
        self.announced.len()
    }

    pub fn is_empty(&self) -> bool {
        self.announced.is_empty()
    }
}

impl ValidatorSource for EpochOverlay<'_> {
    fn validators(&self, epoch: u64, height: u64) -> StoreResult<Option<Vec<Address>>> {
        let announced = self
            .announced
            .range(..=(epoch, u64::MAX))
            .rev()
            .map(|(_, record)| record)
            .find(|record| record.announced_at < height);
        let stored = match self.store {
            Some(store) => store.epoch_in_force(epoch).optional()?,
            None => None,
        };

        Ok(match (announced, stored) {
            (Some(announced), Some(stored)) if stored.epoch > announced.epoch => {
                Some(stored.validators)
            }
            (Some(announced), _) => Some(announced.validators.clone()),
            (None, stored) => stored.map(|record| record.validators),
        })
    }
}

/// The epoch a block announces, if any. Used to pre-collect announcements
/// before a batch of heights is derived in parallel.
pub fn announced_epoch(
    block: &StoredBlock,
    epoch_length: u64,
) -> Result<Option<EpochRecord>, DecodeError> {
    if block.extra_data.is_empty() {
        return Ok(None);
    }
    let extra = WbftExtra::decode(&block.extra_data)?;
    epoch_record(block.number, epoch_length, &extra)
}

fn epoch_record(
    height: u64,
    epoch_length: u64,
    extra: &WbftExtra,
) -> Result<Option<EpochRecord>, DecodeError> {
    let Some(info) = &extra.epoch_info else {
        return Ok(None);
    };
    Ok(Some(EpochRecord {
        epoch: epoch_of(height.saturating_add(1), epoch_length),
        announced_at: height,
        validators: info.validator_addresses()?,
        info: info.clone(),
    }))
}

#[derive(Debug, Default)]
pub(super) struct ConsensusRecords {
    pub wbft_block: Option<WbftBlockRecord>,
    pub epoch: Option<EpochRecord>,
    pub activity: Vec<ValidatorActivity>,
}

pub(super) fn consensus_records(
    block: &StoredBlock,
    epoch_length: u64,
    validators: &dyn ValidatorSource,
    failures: &mut u64,
) -> StoreResult<ConsensusRecords> {
    let mut records = ConsensusRecords::default();
    if block.extra_data.is_empty() {
        return Ok(records);
    }

    let height = block.number;
    let extra = match WbftExtra::decode(&block.extra_data) {
        Ok(extra) => extra,
        Err(err) => {
            tracing::warn!(block = height, %err, "Skipping undecodable WBFT extra data");
            *failures += 1;
            return Ok(records);
        }
    };

    match epoch_record(height, epoch_length, &extra) {
        Ok(epoch) => records.epoch = epoch,
        Err(err) => {
            tracing::warn!(block = height, %err, "Skipping malformed epoch announcement");
            *failures += 1;
        }
    }

    let epoch = epoch_of(height, epoch_length);
    let current = match validators.validators(epoch, height)? {
        Some(set) => set,
        None => match &records.epoch {
            Some(announced) => announced.validators.clone(),
            None => {
                if extra.prepared_seal.is_some() || extra.committed_seal.is_some() {
                    tracing::warn!(block = height, epoch, "No validator set known, seals not attributed");
                }
                return Ok(records);
            }
        },
    };
    let previous = match height.checked_sub(1) {
        Some(parent) => validators.validators(epoch_of(parent, epoch_length), height)?,
        None => None,
    }
    .unwrap_or_else(|| current.clone());

    let record = match block_record(block, epoch, &extra, &current, &previous) {
        Ok(record) => record,
        Err(err) => {
            tracing::warn!(block = height, %err, "Skipping unresolvable WBFT seals");
            *failures += 1;
            return Ok(records);
        }
    };

    let prepared: BTreeSet<_> = record.prepared_sealers.iter().collect();
    let committed: BTreeSet<_> = record.committed_sealers.iter().collect();
    let mut seen = BTreeSet::new();
    records.activity = current
        .iter()
        .filter(|validator| seen.insert(**validator))
        .map(|validator| ValidatorActivity {
            validator: *validator,
            block_number: height,
            prepared: prepared.contains(validator),
            committed: committed.contains(validator),
        })
        .collect();
    records.wbft_block = Some(record);

    Ok(records)
}

fn sealers(seal: Option<&AggregatedSeal>, set: &[Address]) -> Result<Vec<Address>, DecodeError> {
    seal.map_or(Ok(Vec::new()), |seal| seal.sealer_addresses(set))
}

fn block_record(
    block: &StoredBlock,
    epoch: u64,
    extra: &WbftExtra,
    current: &[Address],
    previous: &[Address],
) -> Result<WbftBlockRecord, DecodeError> {
    Ok(WbftBlockRecord {
        block_number: block.number,
        block_hash: block.hash,
        epoch,
        proposer: block.miner,
        round: extra.round,
        prev_round: extra.prev_round,
        prepared_sealers: sealers(extra.prepared_seal.as_ref(), current)?,
        committed_sealers: sealers(extra.committed_seal.as_ref(), current)?,
        prev_prepared_sealers: sealers(extra.prev_prepared_seal.as_ref(), previous)?,
        prev_committed_sealers: sealers(extra.prev_committed_seal.as_ref(), previous)?,
        gas_tip: extra.gas_tip,
    })
}

#[cfg(test)]
#[allow(clippy::indexing_slicing, clippy::unwrap_used)]
mod tests {
    use super::*;
    use alloy_primitives::Bytes;
    use chainidx_primitives::{Candidate, EpochInfo};
    use chainidx_testing::{address, wbft_extra, BundleBuilder};

    const EPOCH_LENGTH: u64 = 10;

    fn epoch_info(validators: &[u8]) -> EpochInfo {
        EpochInfo {
            candidates: validators
                .iter()
                .map(|n| Candidate {
                    address: address(*n),
                    diligence: 2_000_000,
                })
                .collect(),
            validators: (0..validators.len() as u32).collect(),
            bls_public_keys: validators.iter().map(|n| Bytes::from(vec![*n; 48])).collect(),
        }
    }

    fn block(number: u64, extra: &WbftExtra) -> StoredBlock {
        BundleBuilder::new(number).wbft(extra).build().block
    }

    fn derive(block: &StoredBlock, source: &EpochOverlay<'_>) -> (ConsensusRecords, u64) {
        let mut failures = 0;
        let records = consensus_records(block, EPOCH_LENGTH, source, &mut failures).unwrap();
        (records, failures)
    }

    #[test]
    fn test_plain_blocks_have_no_consensus_data() {
        let block = BundleBuilder::new(3).build().block;
        let (records, failures) = derive(&block, &EpochOverlay::new(None));
        assert!(records.wbft_block.is_none() && records.epoch.is_none());
        assert_eq!(failures, 0);
    }

    #[test]
    fn test_garbage_extra_data_counted() {
        let block = BundleBuilder::new(3)
            .extra_data(Bytes::from_static(&[0xde, 0xad]))
            .build()
            .block;
        let (records, failures) = derive(&block, &EpochOverlay::new(None));
        assert!(records.wbft_block.is_none());
        assert_eq!(failures, 1);
    }

    #[test]
    fn test_genesis_resolves_against_own_announcement() {
        let extra = wbft_extra(2, &[0, 1, 2], &[0, 1], Some(epoch_info(&[0xa1, 0xa2, 0xa3])));
        let (records, failures) = derive(&block(0, &extra), &EpochOverlay::new(None));
        assert_eq!(failures, 0);

        let epoch = records.epoch.unwrap();
        assert_eq!(epoch.epoch, 0);
        assert_eq!(epoch.announced_at, 0);
        assert_eq!(epoch.validators, vec![address(0xa1), address(0xa2), address(0xa3)]);

        let wbft = records.wbft_block.unwrap();
        assert_eq!(wbft.round, 2);
        assert_eq!(wbft.proposer, address(0xee));
        assert_eq!(wbft.committed_sealers, vec![address(0xa1), address(0xa2)]);

        assert_eq!(records.activity.len(), 3);
        assert!(records.activity[2].prepared);
        assert!(!records.activity[2].committed);
    }

    #[test]
    fn test_boundary_announcement_applies_to_next_epoch() {
        let mut overlay = EpochOverlay::new(None);
        overlay.insert(
            announced_epoch(&block(0, &wbft_extra(0, &[], &[], Some(epoch_info(&[0xa1])))), EPOCH_LENGTH)
                .unwrap()
                .unwrap(),
        );
        let boundary = announced_epoch(
            &block(9, &wbft_extra(0, &[0], &[0], Some(epoch_info(&[0xb1, 0xb2])))),
            EPOCH_LENGTH,
        )
        .unwrap()
        .unwrap();
        assert_eq!(boundary.epoch, 1);
        overlay.insert(boundary);

        // Height 9 is still sealed by the epoch 0 set.
        assert_eq!(overlay.validators(0, 9).unwrap(), Some(vec![address(0xa1)]));
        // Height 10 switches to the announced set.
        assert_eq!(
            overlay.validators(1, 10).unwrap(),
            Some(vec![address(0xb1), address(0xb2)])
        );

        let (records, failures) = derive(&block(10, &wbft_extra(0, &[1], &[0, 1], None)), &overlay);
        assert_eq!(failures, 0);
        let wbft = records.wbft_block.unwrap();
        assert_eq!(wbft.epoch, 1);
        assert_eq!(wbft.prepared_sealers, vec![address(0xb2)]);
        assert!(!records.activity[0].prepared && records.activity[0].committed);
    }

    #[test]
    fn test_unknown_validator_set_skips_seals() {
        let (records, failures) = derive(&block(25, &wbft_extra(0, &[0], &[0], None)), &EpochOverlay::new(None));
        assert!(records.wbft_block.is_none());
        assert!(records.activity.is_empty());
        assert_eq!(failures, 0);
    }

    #[test]
    fn test_sealer_outside_set_counted() {
        let mut overlay = EpochOverlay::new(None);
        overlay.insert(EpochRecord {
            epoch: 0,
            announced_at: 0,
            info: epoch_info(&[0xa1]),
            validators: vec![address(0xa1)],
        });
        let (records, failures) = derive(&block(4, &wbft_extra(0, &[0, 5], &[0], None)), &overlay);
        assert!(records.wbft_block.is_none());
        assert_eq!(failures, 1);
    }
}
