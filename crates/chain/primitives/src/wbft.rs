//! WBFT consensus extra-data codec.
//!
//! The block `extra_data` is one RLP list:
//!
//! ```text
//! [ vanity, randao_reveal, prev_round, prev_prepared_seal, prev_committed_seal,
//!   round, prepared_seal, committed_seal, gas_tip, epoch_info ]
//!
//! seal       = [] | [ sealers_bitmap, aggregated_signature ]
//! epoch_info = [] | [ [ [address, diligence], .. ], [validator_index, ..], [bls_key, ..] ]
//! ```
//!
//! Sealer bitmaps index into the validator set of the block's epoch, LSB first
//! within each byte. Validator entries index into the candidate list.

use alloy_primitives::{Address, Bytes, U256};
use alloy_rlp::{Decodable, Encodable, Header, RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// BLS-aggregated seal over a consensus phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedSeal {
    /// Bitmap of validator positions that signed.
    pub sealers: Bytes,
    /// Aggregated BLS signature.
    pub signature: Bytes,
}

impl AggregatedSeal {
    /// Validator positions whose bit is set.
    pub fn sealer_indices(&self) -> Vec<usize> {
        let mut indices = Vec::new();
        for (byte_index, byte) in self.sealers.iter().enumerate() {
            for bit in 0..8 {
                if (byte >> bit) & 1 == 1 {
                    indices.push(byte_index * 8 + bit);
                }
            }
        }
        indices
    }

    /// Resolve sealer positions against an ordered validator set.
    pub fn sealer_addresses(&self, validators: &[Address]) -> Result<Vec<Address>, DecodeError> {
        self.sealer_indices()
            .into_iter()
            .map(|index| {
                validators
                    .get(index)
                    .copied()
                    .ok_or(DecodeError::SealerIndex {
                        index,
                        len: validators.len(),
                    })
            })
            .collect()
    }

    /// Build a seal from validator positions.
    pub fn from_indices(indices: &[usize], signature: Bytes) -> Self {
        let len = indices.iter().max().map_or(0, |max| max / 8 + 1);
        let mut bitmap = vec![0u8; len];
        for &index in indices {
            if let Some(byte) = bitmap.get_mut(index / 8) {
                *byte |= 1 << (index % 8);
            }
        }
        Self {
            sealers: bitmap.into(),
            signature,
        }
    }

    fn payload_length(&self) -> usize {
        self.sealers.length() + self.signature.length()
    }
}

/// A validator candidate and its diligence score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, RlpEncodable, RlpDecodable)]
pub struct Candidate {
    pub address: Address,
    pub diligence: u64,
}

/// Validator set announced for the next epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, RlpEncodable, RlpDecodable)]
pub struct EpochInfo {
    pub candidates: Vec<Candidate>,
    /// Indices into `candidates`, in sealing order.
    pub validators: Vec<u32>,
    pub bls_public_keys: Vec<Bytes>,
}

impl EpochInfo {
    /// Ordered validator addresses.
    pub fn validator_addresses(&self) -> Result<Vec<Address>, DecodeError> {
        self.validators
            .iter()
            .map(|&index| {
                self.candidates
                    .get(index as usize)
                    .map(|candidate| candidate.address)
                    .ok_or(DecodeError::SealerIndex {
                        index: index as usize,
                        len: self.candidates.len(),
                    })
            })
            .collect()
    }
}

/// Decoded WBFT extra data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WbftExtra {
    pub vanity: Bytes,
    pub randao_reveal: Bytes,
    pub prev_round: u32,
    pub prev_prepared_seal: Option<AggregatedSeal>,
    pub prev_committed_seal: Option<AggregatedSeal>,
    pub round: u32,
    pub prepared_seal: Option<AggregatedSeal>,
    pub committed_seal: Option<AggregatedSeal>,
    pub gas_tip: U256,
    pub epoch_info: Option<EpochInfo>,
}

impl WbftExtra {
    pub fn decode(extra_data: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = extra_data;
        let mut payload = list_payload(&mut buf)?;
        let payload = &mut payload;

        Ok(Self {
            vanity: Bytes::decode(payload)?,
            randao_reveal: Bytes::decode(payload)?,
            prev_round: u32::decode(payload)?,
            prev_prepared_seal: decode_seal(payload)?,
            prev_committed_seal: decode_seal(payload)?,
            round: u32::decode(payload)?,
            prepared_seal: decode_seal(payload)?,
            committed_seal: decode_seal(payload)?,
            gas_tip: U256::decode(payload)?,
            epoch_info: decode_epoch_info(payload)?,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut payload = Vec::new();
        self.vanity.encode(&mut payload);
        self.randao_reveal.encode(&mut payload);
        self.prev_round.encode(&mut payload);
        encode_seal(self.prev_prepared_seal.as_ref(), &mut payload);
        encode_seal(self.prev_committed_seal.as_ref(), &mut payload);
        self.round.encode(&mut payload);
        encode_seal(self.prepared_seal.as_ref(), &mut payload);
        encode_seal(self.committed_seal.as_ref(), &mut payload);
        self.gas_tip.encode(&mut payload);
        match &self.epoch_info {
            Some(info) => info.encode(&mut payload),
            None => empty_list(&mut payload),
        }

        let mut out = Vec::with_capacity(payload.len() + 9);
        Header {
            list: true,
            payload_length: payload.len(),
        }
        .encode(&mut out);
        out.extend_from_slice(&payload);
        out.into()
    }
}

fn list_payload<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], DecodeError> {
    let header = Header::decode(buf)?;
    if !header.list {
        return Err(alloy_rlp::Error::UnexpectedString.into());
    }
    if buf.len() < header.payload_length {
        return Err(alloy_rlp::Error::InputTooShort.into());
    }
    let (payload, rest) = buf.split_at(header.payload_length);
    *buf = rest;
    Ok(payload)
}

fn decode_seal(buf: &mut &[u8]) -> Result<Option<AggregatedSeal>, DecodeError> {
    let mut payload = list_payload(buf)?;
    if payload.is_empty() {
        return Ok(None);
    }
    Ok(Some(AggregatedSeal {
        sealers: Bytes::decode(&mut payload)?,
        signature: Bytes::decode(&mut payload)?,
    }))
}

fn decode_epoch_info(buf: &mut &[u8]) -> Result<Option<EpochInfo>, DecodeError> {
    let mut peek = *buf;
    let header = Header::decode(&mut peek)?;
    if header.list && header.payload_length == 0 {
        *buf = peek;
        return Ok(None);
    }
    Ok(Some(EpochInfo::decode(buf)?))
}

fn encode_seal(seal: Option<&AggregatedSeal>, out: &mut Vec<u8>) {
    let Some(seal) = seal else {
        empty_list(out);
        return;
    };
    Header {
        list: true,
        payload_length: seal.payload_length(),
    }
    .encode(out);
    seal.sealers.encode(out);
    seal.signature.encode(out);
}

fn empty_list(out: &mut Vec<u8>) {
    Header {
        list: true,
        payload_length: 0,
    }
    .encode(out);
}
