//! Typed-data signing capability and signature recovery.
//!
//! The signer is injected into the flow as a `TypedDataSigner`: a local
//! secp256k1 key here, or a wallet reached over JSON-RPC elsewhere. A key
//! holder that refuses or fails must surface `SignerUnavailable`; an empty
//! signature is never returned.

use async_trait::async_trait;
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};

use metafwd_types::{Address, Domain, ForwardRequest, ForwarderError, Result, Signature, B256};

use crate::eip712::{typed_data_hash, TypeSchema};
use crate::keys;

#[async_trait]
pub trait TypedDataSigner: Send + Sync {
    /// Address the produced signatures recover to.
    fn address(&self) -> Address;

    async fn sign_typed_data(
        &self,
        domain: &Domain,
        types: &TypeSchema,
        request: &ForwardRequest,
    ) -> Result<Signature>;
}

/// Sign `request` under `domain` with the given key holder.
pub async fn sign(
    signer: &dyn TypedDataSigner,
    domain: &Domain,
    types: &TypeSchema,
    request: &ForwardRequest,
) -> Result<Signature> {
    let signature = signer.sign_typed_data(domain, types, request).await?;
    tracing::debug!(
        signer = %signer.address(),
        from = %request.from,
        nonce = %request.nonce,
        "Signed forward request"
    );
    Ok(signature)
}

/// Recover the address that produced `signature` over (domain, request).
pub fn recover_signer(
    domain: &Domain,
    types: &TypeSchema,
    request: &ForwardRequest,
    signature: &Signature,
) -> Result<Address> {
    let digest = typed_data_hash(domain, types, request)?;
    recover_digest(&digest, signature)
}

pub fn recover_digest(digest: &B256, signature: &Signature) -> Result<Address> {
    let sig = EcdsaSignature::from_slice(signature.rs())
        .map_err(|e| ForwarderError::InvalidSignature(e.to_string()))?;
    let recovery_id = RecoveryId::from_byte(signature.recovery_id()?)
        .ok_or_else(|| ForwarderError::InvalidSignature("bad recovery id".into()))?;
    let key = VerifyingKey::recover_from_prehash(digest.as_slice(), &sig, recovery_id)
        .map_err(|e| ForwarderError::InvalidSignature(e.to_string()))?;
    Ok(keys::address_of(&key))
}

/// Check that `signature` recovers to `request.from`.
///
/// A signature that cannot be parsed or recovered at all is reported as
/// `InvalidSignature`; one that recovers to another address as
/// `SignatureMismatch`.
pub fn verify_signature(
    domain: &Domain,
    types: &TypeSchema,
    request: &ForwardRequest,
    signature: &Signature,
) -> Result<()> {
    let recovered = recover_signer(domain, types, request, signature)?;
    if recovered != request.from {
        return Err(ForwarderError::SignatureMismatch {
            expected: request.from,
            recovered,
        });
    }
    Ok(())
}

/// secp256k1 key held in process.
pub struct LocalSigner {
    key: SigningKey,
    address: Address,
}

impl LocalSigner {
    pub fn new(key: SigningKey) -> Self {
        let address = keys::address_of(key.verifying_key());
        Self { key, address }
    }

    pub fn from_hex(private_key: &str) -> Result<Self> {
        Ok(Self::new(keys::signing_key_from_hex(private_key)?))
    }

    /// Derive the `index`-th wallet from a seed phrase.
    pub fn from_seed(seed: &str, index: u32) -> Result<Self> {
        Ok(Self::new(keys::derive_signing_key(seed, index)?))
    }

    /// Fresh random wallet.
    pub fn random() -> Self {
        Self::new(SigningKey::random(&mut rand::rngs::OsRng))
    }

    /// RFC 6979 deterministic, low-S signature over a 32-byte digest.
    pub fn sign_digest(&self, digest: &B256) -> Result<Signature> {
        let (sig, recovery_id) = self
            .key
            .sign_prehash_recoverable(digest.as_slice())
            .map_err(|e| ForwarderError::InvalidSignature(e.to_string()))?;

        let bytes = sig.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[0..32]);
        s.copy_from_slice(&bytes[32..64]);
        Ok(Signature::from_parts(&r, &s, recovery_id.to_byte()))
    }
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TypedDataSigner for LocalSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_typed_data(
        &self,
        domain: &Domain,
        types: &TypeSchema,
        request: &ForwardRequest,
    ) -> Result<Signature> {
        let digest = typed_data_hash(domain, types, request)?;
        self.sign_digest(&digest)
    }
}
