//! Ed25519 address type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TypesError;
use crate::hex;

/// A ledger address: the Blake2b-256 hash of an Ed25519 public key.
///
/// The human-facing `qrm_` encoding with checksum lives in `quorum-crypto`;
/// this type's `Display` is the plain hex form used on the node wire.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(
    #[serde(
        serialize_with = "hex::serialize_bytes",
        deserialize_with = "hex::deserialize_bytes"
    )]
    [u8; 32],
);

impl Address {
    pub const LENGTH: usize = 32;

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({}\u{2026})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex::decode_fixed(s)
            .map(Self)
            .ok_or_else(|| TypesError::InvalidHex(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let address = Address::new([0x5a; 32]);
        assert_eq!(address.to_hex().parse::<Address>().unwrap(), address);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!("5a5a".parse::<Address>().is_err());
    }
}
