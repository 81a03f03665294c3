//! EIP-712 typed-data hashing and secp256k1 signing for forward requests.

pub mod eip712;
pub mod keys;
pub mod signer;

pub use eip712::{build_domain, build_types, FieldType, TypeSchema, TypedField};
pub use signer::{recover_signer, sign, verify_signature, LocalSigner, TypedDataSigner};
