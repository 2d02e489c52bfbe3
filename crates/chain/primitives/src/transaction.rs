//! Stored transaction types and fee derivation.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

pub use alloy_eips::eip2930::{AccessList, AccessListItem};
pub use alloy_eips::eip7702::{Authorization, SignedAuthorization};

/// Transaction envelope type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum TxType {
    /// Pre-EIP-2718 transaction with a fixed gas price.
    Legacy = 0x00,
    /// EIP-2930 access-list transaction.
    AccessList = 0x01,
    /// EIP-1559 dynamic-fee transaction.
    DynamicFee = 0x02,
    /// EIP-4844 blob transaction.
    Blob = 0x03,
    /// EIP-7702 set-code transaction.
    SetCode = 0x04,
    /// Dynamic-fee transaction whose fee is paid by a second signer.
    FeeDelegated = 0x16,
}

impl TxType {
    /// Whether the effective price depends on the block base fee.
    pub const fn is_fee_market(self) -> bool {
        matches!(
            self,
            Self::DynamicFee | Self::Blob | Self::SetCode | Self::FeeDelegated
        )
    }
}

impl TryFrom<u8> for TxType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => Self::Legacy,
            0x01 => Self::AccessList,
            0x02 => Self::DynamicFee,
            0x03 => Self::Blob,
            0x04 => Self::SetCode,
            0x16 => Self::FeeDelegated,
            other => return Err(format!("unsupported transaction type 0x{other:02x}")),
        })
    }
}

impl From<TxType> for u8 {
    fn from(value: TxType) -> Self {
        value as u8
    }
}

/// ECDSA signature components as carried by the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSignature {
    /// Legacy `v` (27/28 or EIP-155) or the typed-transaction y parity.
    pub v: u64,
    pub r: U256,
    pub s: U256,
}

/// Stored transaction. Its location is tracked separately in [`TxLocation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTransaction {
    /// Transaction hash.
    pub hash: B256,
    /// Envelope type.
    pub tx_type: TxType,
    /// Chain id (absent for pre-EIP-155 legacy transactions).
    #[serde(default)]
    pub chain_id: Option<u64>,
    pub nonce: u64,
    /// Sender address.
    pub from: Address,
    /// Recipient; `None` for contract creation.
    #[serde(default)]
    pub to: Option<Address>,
    pub value: U256,
    /// Gas limit.
    pub gas: u64,
    pub input: Bytes,
    /// Fixed gas price (legacy and access-list transactions).
    #[serde(default)]
    pub gas_price: Option<u128>,
    /// Fee cap for fee-market transactions.
    #[serde(default)]
    pub max_fee_per_gas: Option<u128>,
    /// Tip cap for fee-market transactions.
    #[serde(default)]
    pub max_priority_fee_per_gas: Option<u128>,
    #[serde(default)]
    pub max_fee_per_blob_gas: Option<u128>,
    #[serde(default)]
    pub blob_versioned_hashes: Vec<B256>,
    pub signature: TxSignature,
    #[serde(default)]
    pub access_list: Option<AccessList>,
    /// EIP-7702 authorizations (set-code transactions only). Authorities are
    /// recovered with [`SignedAuthorization::recover_authority`].
    #[serde(default)]
    pub authorization_list: Option<Vec<SignedAuthorization>>,
    /// Fee payer of a fee-delegated transaction.
    #[serde(default)]
    pub fee_payer: Option<Address>,
}

impl StoredTransaction {
    pub fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }

    /// Account charged for gas.
    pub fn fee_payer_or_sender(&self) -> Address {
        self.fee_payer.unwrap_or(self.from)
    }

    /// Price actually paid per unit of gas.
    ///
    /// Fee-market transactions with a base fee pay `min(base_fee + tip_cap, fee_cap)`.
    /// Everything else pays its fixed gas price; a fee-market transaction in a
    /// block without base fee falls back to its fee cap.
    pub fn effective_gas_price(&self, base_fee: Option<u64>) -> u128 {
        if self.tx_type.is_fee_market() {
            if let (Some(base_fee), Some(fee_cap)) = (base_fee, self.max_fee_per_gas) {
                let tip_cap = self.max_priority_fee_per_gas.unwrap_or(0);
                return (base_fee as u128).saturating_add(tip_cap).min(fee_cap);
            }
        }
        self.gas_price.or(self.max_fee_per_gas).unwrap_or(0)
    }

    /// Portion of the effective price that goes to the block producer.
    pub fn effective_tip(&self, base_fee: Option<u64>) -> u128 {
        let price = self.effective_gas_price(base_fee);
        match base_fee {
            Some(base_fee) => price.saturating_sub(base_fee as u128),
            None => price,
        }
    }
}

/// Where a transaction lives in the canonical chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxLocation {
    /// Block number containing the transaction.
    pub block_number: u64,
    /// Hash of that block.
    pub block_hash: B256,
    /// Index within the block.
    pub transaction_index: u32,
}

#[cfg(test)]
#[allow(clippy::indexing_slicing, clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use alloy_primitives::keccak256;
    use k256::ecdsa::{signature::hazmat::PrehashSigner, SigningKey, VerifyingKey};
    use rand::rngs::OsRng;

    pub(crate) fn make_tx(tx_type: TxType) -> StoredTransaction {
        StoredTransaction {
            hash: B256::repeat_byte(0x11),
            tx_type,
            chain_id: Some(1),
            nonce: 0,
            from: Address::repeat_byte(0x01),
            to: Some(Address::repeat_byte(0x02)),
            value: U256::from(100u64),
            gas: 21_000,
            input: Bytes::new(),
            gas_price: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            max_fee_per_blob_gas: None,
            blob_versioned_hashes: vec![],
            signature: TxSignature {
                v: 0,
                r: U256::ZERO,
                s: U256::ZERO,
            },
            access_list: None,
            authorization_list: None,
            fee_payer: None,
        }
    }

    fn dynamic_fee(tip_cap: u128, fee_cap: u128) -> StoredTransaction {
        StoredTransaction {
            max_fee_per_gas: Some(fee_cap),
            max_priority_fee_per_gas: Some(tip_cap),
            ..make_tx(TxType::DynamicFee)
        }
    }

    #[test]
    fn test_effective_price_capped_by_fee_cap() {
        let tx = dynamic_fee(20, 110);
        assert_eq!(tx.effective_gas_price(Some(100)), 110);
    }

    #[test]
    fn test_effective_price_base_plus_tip() {
        let tx = dynamic_fee(20, 200);
        assert_eq!(tx.effective_gas_price(Some(100)), 120);
        assert_eq!(tx.effective_tip(Some(100)), 20);
    }

    #[test]
    fn test_legacy_uses_gas_price_even_with_base_fee() {
        let tx = StoredTransaction {
            gas_price: Some(75),
            ..make_tx(TxType::Legacy)
        };
        assert_eq!(tx.effective_gas_price(Some(100)), 75);
        assert_eq!(tx.effective_gas_price(None), 75);
    }

    #[test]
    fn test_fee_market_without_base_fee_falls_back_to_cap() {
        let tx = dynamic_fee(20, 110);
        assert_eq!(tx.effective_gas_price(None), 110);
        assert_eq!(tx.effective_tip(None), 110);
    }

    #[test]
    fn test_fee_delegated_is_fee_market() {
        let tx = StoredTransaction {
            fee_payer: Some(Address::repeat_byte(0x99)),
            max_fee_per_gas: Some(300),
            max_priority_fee_per_gas: Some(5),
            ..make_tx(TxType::FeeDelegated)
        };
        assert_eq!(tx.effective_gas_price(Some(100)), 105);
        assert_eq!(tx.fee_payer_or_sender(), Address::repeat_byte(0x99));
    }

    #[test]
    fn test_tx_type_tags() {
        assert_eq!(TxType::try_from(0x16).unwrap(), TxType::FeeDelegated);
        assert!(TxType::try_from(0x05).is_err());
        assert_eq!(u8::from(TxType::SetCode), 4);
    }

    fn signed(key: &SigningKey, authorization: Authorization) -> SignedAuthorization {
        let hash = authorization.signature_hash();
        let (sig, recovery_id) = key.sign_prehash(hash.as_ref()).unwrap();
        SignedAuthorization::new_unchecked(
            authorization,
            u8::from(recovery_id.is_y_odd()),
            U256::from_be_slice(&sig.r().to_bytes()),
            U256::from_be_slice(&sig.s().to_bytes()),
        )
    }

    #[test]
    fn test_set_code_transaction_round_trips_through_json() {
        let key = SigningKey::random(&mut OsRng);
        let public_key = VerifyingKey::from(&key).to_encoded_point(false);
        let signer = Address::from_slice(&keccak256(&public_key.as_bytes()[1..])[12..]);

        let authorization = Authorization {
            chain_id: U256::from(1u64),
            address: Address::repeat_byte(0x42),
            nonce: 3,
        };
        let tx = StoredTransaction {
            access_list: Some(AccessList(vec![AccessListItem {
                address: Address::repeat_byte(0x07),
                storage_keys: vec![B256::repeat_byte(0x01)],
            }])),
            authorization_list: Some(vec![signed(&key, authorization)]),
            ..make_tx(TxType::SetCode)
        };

        let json = serde_json::to_string(&tx).unwrap();
        let back: StoredTransaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tx);

        let authorizations = back.authorization_list.unwrap();
        assert_eq!(authorizations[0].recover_authority().unwrap(), signer);
        assert_eq!(*authorizations[0].address(), Address::repeat_byte(0x42));
        assert_eq!(authorizations[0].nonce(), 3);
    }
}
