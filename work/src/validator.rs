//! PoW validation.

use crate::score::score;

/// Check that `nonce` gives `pow_bytes` a score of at least `target_score`.
pub fn validate_work(pow_bytes: &[u8], nonce: u64, target_score: f64) -> bool {
    score(pow_bytes, nonce) >= target_score
}
