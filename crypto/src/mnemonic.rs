//! BIP39 mnemonic generation and mnemonic-to-seed conversion.
//!
//! A 24-word mnemonic (256-bit entropy) is stretched into a 64-byte BIP39 seed
//! (PBKDF2-HMAC-SHA512, 2048 rounds, empty passphrase). The resulting [`Seed`]
//! feeds [`crate::derive`].

use bip39::Mnemonic;
use quorum_types::Seed;
use thiserror::Error;
use zeroize::Zeroize;

/// Errors arising from mnemonic operations.
#[derive(Debug, Error)]
pub enum MnemonicError {
    #[error("invalid mnemonic phrase: {0}")]
    InvalidMnemonic(String),

    #[error("entropy unavailable: {0}")]
    Entropy(String),

    #[error("seed conversion failed: {0}")]
    Seed(String),
}

/// Generate a new 24-word BIP39 mnemonic from 256-bit entropy.
pub fn generate_mnemonic() -> Result<String, MnemonicError> {
    let mut entropy = [0u8; 32];
    getrandom::getrandom(&mut entropy).map_err(|e| MnemonicError::Entropy(e.to_string()))?;
    let mnemonic =
        Mnemonic::from_entropy(&entropy).map_err(|e| MnemonicError::Entropy(e.to_string()));
    entropy.zeroize();
    Ok(mnemonic?.to_string())
}

/// Convert a mnemonic phrase into the 64-byte seed used for key derivation.
pub fn mnemonic_to_seed(mnemonic: &str) -> Result<Seed, MnemonicError> {
    let mnemonic = Mnemonic::parse_normalized(mnemonic)
        .map_err(|e| MnemonicError::InvalidMnemonic(e.to_string()))?;
    let mut bytes = mnemonic.to_seed_normalized("");
    let seed = Seed::from_bytes(&bytes).map_err(|e| MnemonicError::Seed(e.to_string()));
    bytes.zeroize();
    seed
}

/// Validate that a mnemonic phrase is a valid BIP39 mnemonic.
pub fn validate_mnemonic(mnemonic: &str) -> bool {
    Mnemonic::parse_normalized(mnemonic).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KNOWN: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon art";

    #[test]
    fn generate_produces_24_words() {
        let mnemonic = generate_mnemonic().unwrap();
        assert_eq!(mnemonic.split_whitespace().count(), 24);
        assert!(validate_mnemonic(&mnemonic));
    }

    #[test]
    fn seed_is_64_bytes_and_deterministic() {
        let s1 = mnemonic_to_seed(KNOWN).unwrap();
        let s2 = mnemonic_to_seed(KNOWN).unwrap();
        assert_eq!(s1.as_bytes().len(), 64);
        assert_eq!(s1.as_bytes(), s2.as_bytes());
    }

    #[test]
    fn mnemonic_seed_feeds_derivation() {
        let seed = mnemonic_to_seed(KNOWN).unwrap();
        let a = crate::derive(&seed, 0, 0, false).unwrap();
        let b = crate::derive(&mnemonic_to_seed(KNOWN).unwrap(), 0, 0, false).unwrap();
        assert_eq!(a.address, b.address);
    }

    #[test]
    fn different_mnemonics_produce_different_seeds() {
        let m1 = generate_mnemonic().unwrap();
        let m2 = generate_mnemonic().unwrap();
        assert_ne!(m1, m2);
        assert_ne!(
            mnemonic_to_seed(&m1).unwrap().as_bytes(),
            mnemonic_to_seed(&m2).unwrap().as_bytes()
        );
    }

    #[test]
    fn invalid_mnemonic_rejected() {
        assert!(!validate_mnemonic("not a valid mnemonic phrase"));
        assert!(!validate_mnemonic(""));
        assert!(mnemonic_to_seed("invalid words here").is_err());
    }
}
