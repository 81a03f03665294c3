//! 65-byte ECDSA signature in `r || s || v` layout.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{bytes_to_hex, hex_to_bytes, ForwarderError, Hex, Result};

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; 65]);

impl Signature {
    pub const LEN: usize = 65;

    /// Build from `r`, `s` and a recovery id (0 or 1). Stored with `v = 27 + id`.
    pub fn from_parts(r: &[u8; 32], s: &[u8; 32], recovery_id: u8) -> Self {
        let mut out = [0u8; 65];
        out[0..32].copy_from_slice(r);
        out[32..64].copy_from_slice(s);
        out[64] = 27 + (recovery_id & 1);
        Self(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 65] = bytes.try_into().map_err(|_| {
            ForwarderError::InvalidSignature(format!("expected 65 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        Self::from_bytes(&hex_to_bytes(s)?)
    }

    pub fn to_hex(&self) -> Hex {
        bytes_to_hex(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }

    /// The 64-byte `r || s` part.
    pub fn rs(&self) -> &[u8] {
        &self.0[0..64]
    }

    pub fn v(&self) -> u8 {
        self.0[64]
    }

    /// Normalized recovery id. Accepts `v` in {0, 1, 27, 28}.
    pub fn recovery_id(&self) -> Result<u8> {
        match self.v() {
            0 | 1 => Ok(self.v()),
            27 | 28 => Ok(self.v() - 27),
            other => Err(ForwarderError::InvalidSignature(format!(
                "unsupported v value {}",
                other
            ))),
        }
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Signature::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_id_normalization() {
        let r = [1u8; 32];
        let s = [2u8; 32];
        let sig = Signature::from_parts(&r, &s, 1);
        assert_eq!(sig.v(), 28);
        assert_eq!(sig.recovery_id().unwrap(), 1);

        let mut raw = *sig.as_bytes();
        raw[64] = 0;
        assert_eq!(Signature::from_bytes(&raw).unwrap().recovery_id().unwrap(), 0);

        raw[64] = 35;
        assert!(Signature::from_bytes(&raw).unwrap().recovery_id().is_err());
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert!(matches!(
            Signature::from_hex("0x1234"),
            Err(ForwarderError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_serde_as_hex_string() {
        let sig = Signature::from_parts(&[0xaa; 32], &[0xbb; 32], 0);
        let json = serde_json::to_string(&sig).unwrap();
        assert!(json.starts_with("\"0xaaaa"));
        assert!(json.ends_with("1b\""));
        let back: Signature = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sig);
    }
}
