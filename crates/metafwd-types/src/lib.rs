use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use alloy_primitives::{Address, Bytes, B256, U256};

pub mod signature;
pub mod state;

pub use signature::Signature;
pub use state::{RejectReason, RequestState};

/// 0x-prefixed hex string (e.g. "0x1234...").
pub type Hex = String;

/// Default EIP-712 domain name of the forwarder contract.
pub const DEFAULT_DOMAIN_NAME: &str = "MetaForwarder";

/// Default EIP-712 domain version of the forwarder contract.
pub const DEFAULT_DOMAIN_VERSION: &str = "1";

/// Meta-forwarder error types.
#[derive(Debug, Error)]
pub enum ForwarderError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("signer unavailable: {0}")]
    SignerUnavailable(String),

    #[error("signature mismatch: expected {expected}, recovered {recovered}")]
    SignatureMismatch { expected: Address, recovered: Address },

    #[error("nonce mismatch for {from}: stored {expected}, request carries {got}")]
    NonceMismatch {
        from: Address,
        expected: U256,
        got: U256,
    },

    #[error("forwarded call reverted (nonce {nonce}, {} bytes of return data)", .return_data.len())]
    ExecutionReverted { nonce: U256, return_data: Bytes },

    #[error("relayer {relayer} cannot cover {required} (balance {available})")]
    InsufficientRelayFunds {
        relayer: Address,
        required: U256,
        available: U256,
    },

    #[error("relay unavailable: {0}")]
    RelayUnavailable(String),

    /// The request may or may not have been executed. Resubmitting the same
    /// signed request is safe; building a new one needs a fresh nonce read.
    #[error("outcome unknown for {from} nonce {nonce}: {reason}")]
    OutcomeUnknown {
        from: Address,
        nonce: U256,
        reason: String,
    },

    #[error("batch aborted after failure of item {failed_index}")]
    BatchAborted { failed_index: usize },

    #[error("{0}")]
    Other(String),
}

impl ForwarderError {
    /// Only transport failures that happened before the verifier decided are
    /// safe to resubmit with the identical signed request.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ForwarderError::RelayUnavailable(_))
    }

    /// Signature or nonce rejection. The request must be rebuilt with a fresh
    /// nonce and signed again.
    pub fn is_authorization_failure(&self) -> bool {
        self.reject_reason().is_some()
    }

    /// Map a protocol rejection onto the lifecycle reason. A signature that
    /// recovers to nobody is rejected like one that recovers to someone else.
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            ForwarderError::SignatureMismatch { .. } | ForwarderError::InvalidSignature(_) => {
                Some(RejectReason::SignatureMismatch)
            }
            ForwarderError::NonceMismatch { .. } => Some(RejectReason::NonceMismatch),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ForwarderError>;

/// EIP-712 signing domain of a forwarder deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

/// A signed unit of delegated execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardRequest {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub gas: U256,
    pub nonce: U256,
    pub data: Bytes,
}

/// Outcome of a verified and dispatched forward request.
///
/// `success == false` means the forwarded call reverted after the nonce was
/// consumed. Rejections never produce an `ExecutionResult`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub return_data: Bytes,
    pub nonce: U256,
    pub digest: B256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_tx_hash: Option<Hex>,
}

impl ExecutionResult {
    /// Turn a reverted execution into `ExecutionReverted`.
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(ForwarderError::ExecutionReverted {
                nonce: self.nonce,
                return_data: self.return_data,
            })
        }
    }
}

/// Parse a 0x-prefixed, 40-hex-digit address.
pub fn parse_address(s: &str) -> Result<Address> {
    let stripped = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or_else(|| ForwarderError::Validation(format!("address must be 0x-prefixed: {}", s)))?;
    if stripped.len() != 40 {
        return Err(ForwarderError::Validation(format!(
            "address must have 40 hex digits, got {}: {}",
            stripped.len(),
            s
        )));
    }
    let bytes = hex::decode(stripped).map_err(|e| ForwarderError::InvalidHex(e.to_string()))?;
    Ok(Address::from_slice(&bytes))
}

/// Parse a hex string to a big-endian byte array.
pub fn hex_to_bytes(hex_str: &str) -> Result<Vec<u8>> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    hex::decode(hex_str).map_err(|e| ForwarderError::InvalidHex(e.to_string()))
}

/// Convert bytes to a 0x-prefixed hex string.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        let addr = parse_address("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266").unwrap();
        assert_eq!(
            bytes_to_hex(addr.as_slice()),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[test]
    fn test_parse_address_rejects_malformed() {
        assert!(matches!(
            parse_address("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266"),
            Err(ForwarderError::Validation(_))
        ));
        assert!(matches!(parse_address("0x1234"), Err(ForwarderError::Validation(_))));
        assert!(matches!(
            parse_address("0xzz9Fd6e51aad88F6F4ce6aB8827279cffFb92266"),
            Err(ForwarderError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_error_classification() {
        let relay = ForwarderError::RelayUnavailable("connection refused".into());
        assert!(relay.is_retriable());
        assert!(!relay.is_authorization_failure());

        let nonce = ForwarderError::NonceMismatch {
            from: Address::ZERO,
            expected: U256::from(1u64),
            got: U256::ZERO,
        };
        assert!(!nonce.is_retriable());
        assert_eq!(nonce.reject_reason(), Some(RejectReason::NonceMismatch));

        let reverted = ForwarderError::ExecutionReverted {
            nonce: U256::ZERO,
            return_data: Bytes::new(),
        };
        assert!(!reverted.is_retriable());
        assert!(!reverted.is_authorization_failure());

        let garbage = ForwarderError::InvalidSignature("r is zero".into());
        assert!(!garbage.is_retriable());
        assert_eq!(garbage.reject_reason(), Some(RejectReason::SignatureMismatch));

        let unknown = ForwarderError::OutcomeUnknown {
            from: Address::ZERO,
            nonce: U256::ZERO,
            reason: "timed out".into(),
        };
        assert!(!unknown.is_retriable());
        assert!(!unknown.is_authorization_failure());
    }

    #[test]
    fn test_reverted_result_becomes_error() {
        let result = ExecutionResult {
            success: false,
            return_data: Bytes::from(vec![0xde, 0xad]),
            nonce: U256::from(4u64),
            digest: B256::ZERO,
            relay_tx_hash: None,
        };
        match result.into_result() {
            Err(ForwarderError::ExecutionReverted { nonce, return_data }) => {
                assert_eq!(nonce, U256::from(4u64));
                assert_eq!(&return_data[..], &[0xde, 0xad]);
            }
            other => panic!("expected ExecutionReverted, got {:?}", other),
        }
    }

    #[test]
    fn test_request_json_shape() {
        let req = ForwardRequest {
            from: Address::repeat_byte(0x11),
            to: Address::repeat_byte(0x22),
            value: U256::ZERO,
            gas: U256::from(100_000u64),
            nonce: U256::ZERO,
            data: Bytes::from(vec![0x12, 0x34]),
        };
        let json = serde_json::to_value(&req).unwrap();
        for key in ["from", "to", "value", "gas", "nonce", "data"] {
            assert!(json.get(key).is_some(), "missing field {}", key);
        }
        let back: ForwardRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, req);
    }
}
