use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum WorkError {
    #[error("no nonce reached the target after {iterations} hashes")]
    Timeout { iterations: u64 },

    #[error("work generation cancelled")]
    Cancelled,

    #[error("invalid target score {0}")]
    InvalidTarget(f64),
}
