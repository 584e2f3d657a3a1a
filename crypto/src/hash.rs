//! Blake2b-256, the only hash in the protocol.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

type Blake2b256 = Blake2b<U32>;

/// Blake2b-256 over the concatenation of `parts`, without allocating it.
pub fn blake2b_256_multi(parts: &[&[u8]]) -> [u8; 32] {
    let hasher = parts
        .iter()
        .fold(Blake2b256::new(), |hasher, part| hasher.chain_update(part));
    hasher.finalize().into()
}

pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    blake2b_256_multi(&[data])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_matches_reference() {
        // Well-known digest of the empty string.
        assert_eq!(
            quorum_types::to_hex(&blake2b_256(b"")),
            "0e5751c026e543b2e8ab2eb06099daa1d1e5df47778f7787faab45cdf12fe3a8"
        );
    }

    #[test]
    fn split_input_hashes_like_joined_input() {
        assert_eq!(
            blake2b_256(b"milestones/latest"),
            blake2b_256_multi(&[b"milestones", b"/", b"latest"])
        );
        assert_ne!(blake2b_256(b"a"), blake2b_256(b"b"));
    }

    #[test]
    fn network_id_is_a_hash_prefix() {
        use quorum_types::message::network_id;
        let h = blake2b_256(b"devnet");
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&h[..8]);
        assert_eq!(network_id("devnet"), u64::from_le_bytes(prefix));
    }
}
