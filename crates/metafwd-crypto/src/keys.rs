//! secp256k1 key handling and deterministic key derivation via HKDF-SHA256.
//!
//! Flow: seed -> HKDF-SHA256(info = "MetaForwarder.KeyGen:<index>") -> 32 bytes -> secp256k1 scalar
//!
//! Derived keys are meant for test wallets and local relayer accounts, not
//! for custody of real funds.

use hkdf::Hkdf;
use k256::ecdsa::{SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha2::Sha256;

use metafwd_types::{hex_to_bytes, Address, ForwarderError, Result};

use crate::eip712::keccak256;

const HKDF_INFO: &str = "MetaForwarder.KeyGen";

/// Attempts before giving up on a seed whose expansions never land in the
/// scalar range. Practically unreachable.
const MAX_DERIVATION_ROUNDS: u32 = 16;

/// Ethereum address of a public key: last 20 bytes of keccak256(X || Y).
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.as_affine().to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

pub fn signing_key_from_hex(hex_str: &str) -> Result<SigningKey> {
    let bytes = hex_to_bytes(hex_str)?;
    SigningKey::from_slice(&bytes)
        .map_err(|e| ForwarderError::Validation(format!("invalid secp256k1 private key: {}", e)))
}

/// Derive the `index`-th signing key from a seed phrase.
pub fn derive_signing_key(seed: &str, index: u32) -> Result<SigningKey> {
    if seed.len() < 16 {
        return Err(ForwarderError::Validation(
            "seed too short: minimum 16 characters required".into(),
        ));
    }

    let hk = Hkdf::<Sha256>::new(None, seed.as_bytes());
    for round in 0..MAX_DERIVATION_ROUNDS {
        let info = if round == 0 {
            format!("{}:{}", HKDF_INFO, index)
        } else {
            format!("{}:{}:{}", HKDF_INFO, index, round)
        };
        let mut okm = [0u8; 32];
        hk.expand(info.as_bytes(), &mut okm)
            .map_err(|e| ForwarderError::Other(format!("key derivation failed: {}", e)))?;

        // Zero or >= curve order: try the next round.
        if let Ok(key) = SigningKey::from_slice(&okm) {
            return Ok(key);
        }
    }

    Err(ForwarderError::Other(format!(
        "no valid key derived for index {} after {} rounds",
        index, MAX_DERIVATION_ROUNDS
    )))
}
