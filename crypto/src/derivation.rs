//! Hierarchical deterministic key derivation (SLIP-10, Ed25519 curve).
//!
//! Every key is derived along the fully hardened path
//! `m/44'/COIN_TYPE'/account'/internal'/address_index'`:
//!
//! 1. Master node: `I = HMAC-SHA512(key = "ed25519 seed", data = seed)`,
//!    secret `I[..32]`, chain code `I[32..]`.
//! 2. Hardened child `i`: `I = HMAC-SHA512(key = chain_code, data = 0x00 || secret || be32(i | 2^31))`.
//!
//! Only hardened derivation exists for Ed25519, so a leaked child key or
//! address reveals neither the seed nor any sibling. Indices must be below
//! 2^31; larger values are rejected rather than masked, so two distinct
//! indices can never collapse onto the same hardened child.

use hmac::{Hmac, Mac};
use quorum_types::{Address, KeyPair, PrivateKey, Seed};
use sha2::Sha512;
use thiserror::Error;
use zeroize::Zeroize;

use crate::address::address_from_public_key;
use crate::keys::keypair_from_private;

type HmacSha512 = Hmac<Sha512>;

/// SLIP-44 coin type used as the second path segment.
pub const COIN_TYPE: u32 = 4218;
/// Exclusive upper bound for account and address indices.
pub const HARDENED_LIMIT: u32 = 1 << 31;

const PURPOSE: u32 = 44;
const CURVE_KEY: &[u8] = b"ed25519 seed";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DerivationError {
    #[error("{kind} index {index} is not below 2^31")]
    IndexOutOfRange { kind: &'static str, index: u32 },

    #[error("key derivation failed: {0}")]
    Hmac(String),
}

/// A derived key pair together with its address.
pub struct DerivedKey {
    pub keypair: KeyPair,
    pub address: Address,
}

/// Secret + chain code of one node in the derivation tree.
#[derive(Zeroize)]
struct ExtendedKey {
    secret: [u8; 32],
    chain_code: [u8; 32],
}

impl Drop for ExtendedKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl ExtendedKey {
    fn from_hmac(key: &[u8], parts: &[&[u8]]) -> Result<Self, DerivationError> {
        let mut mac = HmacSha512::new_from_slice(key)
            .map_err(|e| DerivationError::Hmac(e.to_string()))?;
        for part in parts {
            mac.update(part);
        }
        let mut output = mac.finalize().into_bytes();
        let mut ext = Self {
            secret: [0u8; 32],
            chain_code: [0u8; 32],
        };
        ext.secret.copy_from_slice(&output[..32]);
        ext.chain_code.copy_from_slice(&output[32..]);
        output.as_mut_slice().zeroize();
        Ok(ext)
    }

    fn master(seed: &Seed) -> Result<Self, DerivationError> {
        Self::from_hmac(CURVE_KEY, &[seed.as_bytes()])
    }

    fn hardened_child(&self, index: u32) -> Result<Self, DerivationError> {
        let hardened = (index | HARDENED_LIMIT).to_be_bytes();
        Self::from_hmac(&self.chain_code, &[&[0u8], &self.secret, &hardened])
    }
}

fn check_index(kind: &'static str, index: u32) -> Result<(), DerivationError> {
    if index >= HARDENED_LIMIT {
        return Err(DerivationError::IndexOutOfRange { kind, index });
    }
    Ok(())
}

/// Derive the key pair and address at `(account_index, address_index, internal)`.
///
/// Pure and deterministic: identical inputs always yield identical output.
/// The seed is only borrowed for the duration of the call.
pub fn derive(
    seed: &Seed,
    account_index: u32,
    address_index: u32,
    internal: bool,
) -> Result<DerivedKey, DerivationError> {
    check_index("account", account_index)?;
    check_index("address", address_index)?;

    let path = [
        PURPOSE,
        COIN_TYPE,
        account_index,
        internal as u32,
        address_index,
    ];
    let mut node = ExtendedKey::master(seed)?;
    for segment in path {
        node = node.hardened_child(segment)?;
    }

    let keypair = keypair_from_private(PrivateKey(node.secret));
    let address = address_from_public_key(&keypair.public);
    Ok(DerivedKey { keypair, address })
}
