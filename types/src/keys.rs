//! Key material: Ed25519 keys, signatures, and the wallet seed.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::TypesError;
use crate::hex;

/// A 32-byte Ed25519 public key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(
    #[serde(
        serialize_with = "hex::serialize_bytes",
        deserialize_with = "hex::deserialize_bytes"
    )]
    pub [u8; 32],
);

/// A 32-byte Ed25519 private key (secret scalar seed).
///
/// This type intentionally does not implement `Debug`, `Serialize`, or `Clone`
/// to prevent accidental exposure. Key bytes are zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey(pub [u8; 32]);

/// A 64-byte Ed25519 signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(
    #[serde(
        serialize_with = "hex::serialize_bytes",
        deserialize_with = "hex::deserialize_bytes"
    )]
    pub [u8; 64],
);

/// An Ed25519 key pair (public + private).
///
/// Use `quorum_crypto::derive()` or `quorum_crypto::keypair_from_private()`
/// to construct key pairs. This struct is intentionally just data.
pub struct KeyPair {
    pub public: PublicKey,
    pub private: PrivateKey,
}

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Signature {
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

/// The secret from which every key and address of a wallet is derived.
///
/// Callers hand a `&Seed` to each derivation or signing call; nothing in the
/// client keeps one beyond the call. No `Clone`, `Debug` or `Serialize`, and
/// the bytes are zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Seed(Vec<u8>);

impl Seed {
    pub const MIN_LEN: usize = 16;
    pub const MAX_LEN: usize = 64;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        if !(Self::MIN_LEN..=Self::MAX_LEN).contains(&bytes.len()) {
            return Err(TypesError::InvalidSeedLength(bytes.len()));
        }
        Ok(Self(bytes.to_vec()))
    }

    pub fn from_array(bytes: &[u8; 32]) -> Self {
        Self(bytes.to_vec())
    }

    /// Parse a hex-encoded seed (e.g. the output of a mnemonic conversion).
    pub fn from_hex(s: &str) -> Result<Self, TypesError> {
        let mut bytes = hex::decode(s.trim()).ok_or_else(|| TypesError::InvalidHex("<seed>".into()))?;
        let seed = Self::from_bytes(&bytes);
        bytes.zeroize();
        seed
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}
