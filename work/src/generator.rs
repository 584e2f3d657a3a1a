//! PoW generation (multi-threaded CPU).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::debug;

use crate::score::{pow_digest, required_zeros, zeros_of};
use crate::{WorkError, WorkNonce};
use quorum_crypto::blake2b_256;

/// Limits on a single nonce search. Both are checked between batches, so a
/// search may overshoot `max_iterations` by one batch per thread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkBudget {
    pub max_iterations: Option<u64>,
    pub timeout: Option<Duration>,
}

impl WorkBudget {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }
}

/// Generates proof-of-work for message bytes using all available CPU cores.
pub struct WorkGenerator;

/// Batch size per thread before checking the stop flag and the budget.
const BATCH_SIZE: u64 = 4096;

/// Never a searched nonce: every batch ends strictly below it.
const NOT_FOUND: u64 = u64::MAX;

impl WorkGenerator {
    /// Find a nonce whose score for `pow_bytes` reaches `target_score`.
    pub fn generate(
        &self,
        pow_bytes: &[u8],
        target_score: f64,
        budget: &WorkBudget,
    ) -> Result<WorkNonce, WorkError> {
        self.generate_with_cancel(pow_bytes, target_score, budget, &AtomicBool::new(false))
    }

    /// Like [`generate`](Self::generate), but stops with
    /// [`WorkError::Cancelled`] once `cancel` is set.
    ///
    /// Splits the nonce space across all available CPU cores via rayon.
    /// The first thread to find a valid nonce signals the others to stop.
    pub fn generate_with_cancel(
        &self,
        pow_bytes: &[u8],
        target_score: f64,
        budget: &WorkBudget,
        cancel: &AtomicBool,
    ) -> Result<WorkNonce, WorkError> {
        let zeros = required_zeros(target_score, pow_bytes.len())
            .ok_or(WorkError::InvalidTarget(target_score))?;
        if zeros == 0 {
            return Ok(WorkNonce(0));
        }

        let digest = pow_digest(pow_bytes);
        let deadline = budget.timeout.map(|t| Instant::now() + t);
        let found = AtomicU64::new(NOT_FOUND);
        let stop = AtomicBool::new(false);
        let hashed = AtomicU64::new(0);
        let num_threads = rayon::current_num_threads().max(1);

        (0..num_threads).into_par_iter().for_each(|thread_id| {
            let mut input = [0u8; 40];
            input[..32].copy_from_slice(&digest);

            let mut nonce = thread_id as u64;
            let stride = num_threads as u64;

            loop {
                if stop.load(Ordering::Relaxed) || cancel.load(Ordering::Relaxed) {
                    return;
                }
                let over_time = deadline.is_some_and(|d| Instant::now() >= d);
                let over_budget = budget
                    .max_iterations
                    .is_some_and(|max| hashed.load(Ordering::Relaxed) >= max);
                if over_time || over_budget {
                    stop.store(true, Ordering::Relaxed);
                    return;
                }

                let end = nonce.saturating_add(BATCH_SIZE * stride).min(NOT_FOUND);
                while nonce < end {
                    input[32..].copy_from_slice(&nonce.to_le_bytes());
                    if zeros_of(&blake2b_256(&input)) >= zeros {
                        let _ = found.compare_exchange(
                            NOT_FOUND,
                            nonce,
                            Ordering::Relaxed,
                            Ordering::Relaxed,
                        );
                        stop.store(true, Ordering::Relaxed);
                        return;
                    }
                    nonce = nonce.saturating_add(stride);
                }
                hashed.fetch_add(BATCH_SIZE, Ordering::Relaxed);
                if end == NOT_FOUND {
                    return;
                }
            }
        });

        let iterations = hashed.load(Ordering::Relaxed);
        let result = found.load(Ordering::Relaxed);
        if result != NOT_FOUND {
            debug!(nonce = result, zeros, iterations, "proof-of-work found");
            Ok(WorkNonce(result))
        } else if cancel.load(Ordering::Relaxed) {
            Err(WorkError::Cancelled)
        } else {
            debug!(zeros, iterations, "proof-of-work budget exhausted");
            Err(WorkError::Timeout { iterations })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate_work;

    #[test]
    fn test_generate_work() {
        let bytes = [0x42u8; 64];
        let target = 50.0;

        let nonce = WorkGenerator
            .generate(&bytes, target, &WorkBudget::unlimited())
            .unwrap();

        assert!(validate_work(&bytes, nonce.0, target));
    }

    #[test]
    fn test_zero_target() {
        let nonce = WorkGenerator
            .generate(&[0u8; 32], 0.0, &WorkBudget::unlimited())
            .unwrap();
        assert_eq!(nonce, WorkNonce(0));
    }

    #[test]
    fn test_iteration_budget_times_out() {
        // 200 leading zero bits is out of reach.
        let target = 2f64.powi(200);
        let budget = WorkBudget::unlimited().with_max_iterations(10_000);
        let err = WorkGenerator.generate(b"x", target, &budget).unwrap_err();
        assert!(matches!(err, WorkError::Timeout { iterations } if iterations >= 10_000));
    }

    #[test]
    fn test_time_budget_times_out() {
        let target = 2f64.powi(200);
        let budget = WorkBudget::unlimited().with_timeout(Duration::from_millis(50));
        let started = Instant::now();
        let err = WorkGenerator.generate(b"x", target, &budget).unwrap_err();
        assert!(matches!(err, WorkError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_cancel_stops_search() {
        let cancel = AtomicBool::new(true);
        let err = WorkGenerator
            .generate_with_cancel(b"x", 2f64.powi(200), &WorkBudget::unlimited(), &cancel)
            .unwrap_err();
        assert_eq!(err, WorkError::Cancelled);
    }

    #[test]
    fn test_invalid_target() {
        let err = WorkGenerator
            .generate(b"x", f64::NAN, &WorkBudget::unlimited())
            .unwrap_err();
        assert!(matches!(err, WorkError::InvalidTarget(_)));
    }
}
