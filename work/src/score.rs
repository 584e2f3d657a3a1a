//! The score function shared by the generator and the validator.

use quorum_crypto::{blake2b_256, blake2b_256_multi};

/// Hash of the bytes under work; computed once per search.
pub fn pow_digest(pow_bytes: &[u8]) -> [u8; 32] {
    blake2b_256(pow_bytes)
}

/// Leading zero bits of `Blake2b-256(digest || le64(nonce))`.
pub fn leading_zeros(digest: &[u8; 32], nonce: u64) -> u32 {
    zeros_of(&blake2b_256_multi(&[digest, &nonce.to_le_bytes()]))
}

pub(crate) fn zeros_of(hash: &[u8; 32]) -> u32 {
    let mut zeros = 0;
    for &byte in hash {
        if byte == 0 {
            zeros += 8;
        } else {
            zeros += byte.leading_zeros();
            break;
        }
    }
    zeros
}

fn score_for_zeros(zeros: u32, len: usize) -> f64 {
    2f64.powi(zeros as i32) / (len as f64 + 8.0)
}

/// Score of `nonce` for `pow_bytes`.
pub fn score(pow_bytes: &[u8], nonce: u64) -> f64 {
    score_for_zeros(leading_zeros(&pow_digest(pow_bytes), nonce), pow_bytes.len())
}

/// Smallest number of leading zero bits whose score reaches `target` for a
/// message of `len` bytes. `None` when the target is unreachable.
pub fn required_zeros(target: f64, len: usize) -> Option<u32> {
    if !target.is_finite() || target < 0.0 {
        return None;
    }
    (0..=256).find(|&zeros| score_for_zeros(zeros, len) >= target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_target_needs_no_work() {
        assert_eq!(required_zeros(0.0, 100), Some(0));
    }

    #[test]
    fn required_zeros_grows_with_length() {
        let short = required_zeros(100.0, 10).unwrap();
        let long = required_zeros(100.0, 10_000).unwrap();
        assert!(long > short);
        assert!(score_for_zeros(short, 10) >= 100.0);
        assert!(score_for_zeros(short - 1, 10) < 100.0);
    }

    #[test]
    fn invalid_targets_rejected() {
        assert_eq!(required_zeros(f64::NAN, 10), None);
        assert_eq!(required_zeros(-1.0, 10), None);
        assert_eq!(required_zeros(f64::INFINITY, 10), None);
    }

    #[test]
    fn score_matches_leading_zeros() {
        let bytes = b"message bytes";
        let digest = pow_digest(bytes);
        for nonce in 0..64 {
            let expected = score_for_zeros(leading_zeros(&digest, nonce), bytes.len());
            assert_eq!(score(bytes, nonce), expected);
        }
    }
}
