//! Cryptographic primitives for the quorum client.
//!
//! - **Ed25519** for signing transaction essences and verifying unlock blocks
//! - **Blake2b** for hashing (addresses, message ids, proof-of-work)
//! - **SLIP-10 style hardened derivation** of key pairs and addresses from a seed
//! - **BIP39** mnemonic generation and mnemonic-to-seed conversion
//! - Human-facing address encoding with `qrm_` prefix and checksum

pub mod address;
pub mod derivation;
pub mod hash;
pub mod keys;
pub mod mnemonic;
pub mod sign;

pub use address::{
    address_from_public_key, decode_address, encode_address, validate_address, AddressError,
};
pub use derivation::{derive, DerivationError, DerivedKey, COIN_TYPE, HARDENED_LIMIT};
pub use hash::{blake2b_256, blake2b_256_multi};
pub use keys::{generate_seed, keypair_from_private, public_from_private};
pub use mnemonic::{generate_mnemonic, mnemonic_to_seed, validate_mnemonic, MnemonicError};
pub use sign::{sign_essence, verify_essence, verify_unlock};
