//! secp256k1 signing fixtures for EIP-7702 authorizations.

use alloy_primitives::{keccak256, Address, U256};
use chainidx_primitives::{Authorization, SignedAuthorization};
use k256::ecdsa::{signature::hazmat::PrehashSigner, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

pub fn random_key() -> SigningKey {
    SigningKey::random(&mut OsRng)
}

/// Ethereum address controlled by `signing_key`.
pub fn address_of(signing_key: &SigningKey) -> Address {
    let verifying_key = VerifyingKey::from(signing_key);
    let public_key = verifying_key.to_encoded_point(false);
    let hash = keccak256(public_key.as_bytes().get(1..).unwrap_or_default());
    Address::from_slice(hash.get(12..).unwrap_or_default())
}

pub fn sign_authorization(
    signing_key: &SigningKey,
    chain_id: u64,
    target: Address,
    nonce: u64,
) -> SignedAuthorization {
    let authorization = Authorization {
        chain_id: U256::from(chain_id),
        address: target,
        nonce,
    };
    let hash = authorization.signature_hash();
    let (sig, recovery_id) = signing_key
        .sign_prehash(hash.as_ref())
        .expect("prehash signing never fails for a 32-byte digest");
    SignedAuthorization::new_unchecked(
        authorization,
        u8::from(recovery_id.is_y_odd()),
        U256::from_be_slice(&sig.r().to_bytes()),
        U256::from_be_slice(&sig.s().to_bytes()),
    )
}

/// `authorization` with its signature replaced by an unusable parity.
pub fn corrupt_parity(authorization: &SignedAuthorization) -> SignedAuthorization {
    SignedAuthorization::new_unchecked(
        Authorization {
            chain_id: *authorization.chain_id(),
            address: *authorization.address(),
            nonce: authorization.nonce(),
        },
        7,
        authorization.r(),
        authorization.s(),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_authorization_recovers_signer() {
        let key = random_key();
        let auth = sign_authorization(&key, 1, Address::repeat_byte(0x42), 3);
        assert_eq!(auth.recover_authority().unwrap(), address_of(&key));
        assert!(corrupt_parity(&auth).recover_authority().is_err());
    }
}
