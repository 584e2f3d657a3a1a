//! Content-derived identifiers for messages, transactions and outputs.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::TypesError;
use crate::hex;

/// A 32-byte message identifier: Blake2b-256 of the message's canonical bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(
    #[serde(
        serialize_with = "hex::serialize_bytes",
        deserialize_with = "hex::deserialize_bytes"
    )]
    [u8; 32],
);

impl MessageId {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({}\u{2026})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl FromStr for MessageId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex::decode_fixed(s)
            .map(Self)
            .ok_or_else(|| TypesError::InvalidHex(s.to_string()))
    }
}

/// A 32-byte transaction identifier: Blake2b-256 of the transaction payload.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(
    #[serde(
        serialize_with = "hex::serialize_bytes",
        deserialize_with = "hex::deserialize_bytes"
    )]
    [u8; 32],
);

impl TransactionId {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({}\u{2026})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// Identifies one output of a transaction.
///
/// Text form is the transaction id followed by the little-endian output index,
/// both hex encoded (68 characters).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutputId {
    transaction_id: TransactionId,
    index: u16,
}

impl OutputId {
    pub const TEXT_LEN: usize = 68;

    pub fn new(transaction_id: TransactionId, index: u16) -> Self {
        Self {
            transaction_id,
            index,
        }
    }

    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    pub fn index(&self) -> u16 {
        self.index
    }
}

impl fmt::Debug for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputId({}", hex::encode(&self.transaction_id.0[..4]))?;
        write!(f, "\u{2026}:{})", self.index)
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            self.transaction_id,
            hex::encode(&self.index.to_le_bytes())
        )
    }
}

impl FromStr for OutputId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != Self::TEXT_LEN {
            return Err(TypesError::InvalidLength {
                expected: Self::TEXT_LEN,
                actual: s.len(),
            });
        }
        let invalid = || TypesError::InvalidHex(s.to_string());
        let tx: [u8; 32] = hex::decode_fixed(s.get(..64).ok_or_else(invalid)?).ok_or_else(invalid)?;
        let index: [u8; 2] = hex::decode_fixed(s.get(64..).ok_or_else(invalid)?).ok_or_else(invalid)?;
        Ok(Self::new(TransactionId(tx), u16::from_le_bytes(index)))
    }
}

impl Serialize for OutputId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            (self.transaction_id, self.index).serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for OutputId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            let (transaction_id, index) = <(TransactionId, u16)>::deserialize(deserializer)?;
            Ok(Self::new(transaction_id, index))
        }
    }
}
