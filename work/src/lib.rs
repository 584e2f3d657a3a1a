//! Message proof-of-work.
//!
//! A lightweight nonce search that rate-limits message issuance. The score of a
//! nonce is `2^z / (len + 8)` where `z` is the number of leading zero bits of
//! `Blake2b-256(Blake2b-256(pow_bytes) || le64(nonce))` and `len` is the length
//! of the bytes being worked on, so bigger messages need more work for the same
//! score.

pub mod error;
pub mod generator;
pub mod score;
pub mod validator;

pub use error::WorkError;
pub use generator::{WorkBudget, WorkGenerator};
pub use score::{leading_zeros, pow_digest, required_zeros, score};
pub use validator::validate_work;

/// The result of PoW generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkNonce(pub u64);
