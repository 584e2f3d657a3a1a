//! Ed25519 signatures over transaction essence hashes.

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use quorum_types::{Address, PrivateKey, PublicKey, Signature};

use crate::address::address_from_public_key;

pub fn sign_essence(essence_hash: &[u8; 32], private_key: &PrivateKey) -> Signature {
    Signature(SigningKey::from_bytes(&private_key.0).sign(essence_hash).to_bytes())
}

/// Strict verification: malformed keys and non-canonical signatures fail.
pub fn verify_essence(essence_hash: &[u8; 32], signature: &Signature, public_key: &PublicKey) -> bool {
    VerifyingKey::from_bytes(&public_key.0).is_ok_and(|key| {
        key.verify_strict(essence_hash, &ed25519_dalek::Signature::from_bytes(&signature.0))
            .is_ok()
    })
}

/// Whether a signature unlock spends an output locked to `address`.
pub fn verify_unlock(
    essence_hash: &[u8; 32],
    public_key: &PublicKey,
    signature: &Signature,
    address: &Address,
) -> bool {
    address_from_public_key(public_key) == *address
        && verify_essence(essence_hash, signature, public_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::keypair_from_private;

    const HASH: [u8; 32] = [0x11; 32];

    #[test]
    fn signature_verifies_only_for_its_hash_and_key() {
        let kp = keypair_from_private(PrivateKey([1; 32]));
        let other = keypair_from_private(PrivateKey([2; 32]));
        let sig = sign_essence(&HASH, &kp.private);

        assert!(verify_essence(&HASH, &sig, &kp.public));
        assert!(!verify_essence(&[0x12; 32], &sig, &kp.public));
        assert!(!verify_essence(&HASH, &sig, &other.public));
        assert_eq!(sig, sign_essence(&HASH, &kp.private));
    }

    #[test]
    fn garbage_public_key_fails() {
        let kp = keypair_from_private(PrivateKey([5; 32]));
        let sig = sign_essence(&HASH, &kp.private);
        assert!(!verify_essence(&HASH, &sig, &PublicKey([0xFF; 32])));
    }

    #[test]
    fn unlock_must_match_the_output_address() {
        let kp = keypair_from_private(PrivateKey([3; 32]));
        let sig = sign_essence(&HASH, &kp.private);
        let own = address_from_public_key(&kp.public);

        assert!(verify_unlock(&HASH, &kp.public, &sig, &own));
        assert!(!verify_unlock(&HASH, &kp.public, &sig, &Address::new([0; 32])));
    }
}
