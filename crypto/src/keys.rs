//! Ed25519 key reconstruction and seed generation.

use ed25519_dalek::SigningKey;
use quorum_types::{KeyPair, PrivateKey, PublicKey, Seed};
use zeroize::Zeroize;

/// Derive the public key from a private key.
pub fn public_from_private(private: &PrivateKey) -> PublicKey {
    let signing_key = SigningKey::from_bytes(&private.0);
    PublicKey(signing_key.verifying_key().to_bytes())
}

/// Reconstruct a full key pair from a private key.
pub fn keypair_from_private(private: PrivateKey) -> KeyPair {
    let public = public_from_private(&private);
    KeyPair { public, private }
}

/// Generate a fresh 32-byte seed from the operating system's CSPRNG.
pub fn generate_seed() -> Result<Seed, getrandom::Error> {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes)?;
    let seed = Seed::from_array(&bytes);
    bytes.zeroize();
    Ok(seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_from_private_is_deterministic() {
        let private = PrivateKey([7u8; 32]);
        assert_eq!(public_from_private(&private), public_from_private(&private));
    }

    #[test]
    fn keypair_from_private_matches_public() {
        let kp = keypair_from_private(PrivateKey([9u8; 32]));
        assert_eq!(kp.public, public_from_private(&PrivateKey([9u8; 32])));
    }

    #[test]
    fn generated_seeds_differ() {
        let a = generate_seed().unwrap();
        let b = generate_seed().unwrap();
        assert_eq!(a.as_bytes().len(), 32);
        assert_ne!(a.as_bytes(), b.as_bytes());
    }
}
