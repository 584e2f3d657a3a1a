//! Errors raised while parsing or validating core types.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypesError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid seed length {0}, expected 16..=64 bytes")]
    InvalidSeedLength(usize),

    #[error("invalid parent count {0}, expected 1..=8")]
    InvalidParentCount(usize),

    #[error("parents must be sorted and unique")]
    ParentsNotSortedUnique,

    #[error("invalid indexation index length {0}, expected 1..=64")]
    InvalidIndexLength(usize),

    #[error("invalid {kind} count {count}, expected 1..=127")]
    InvalidCount { kind: &'static str, count: usize },

    #[error("output amount must be non-zero")]
    ZeroAmount,

    #[error("message length {0} exceeds maximum")]
    MessageTooLarge(usize),
}
