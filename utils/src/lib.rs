//! Shared utilities for the quorum client crates.

pub mod logging;
pub mod stats;

pub use logging::{try_init_logging, LogFormat, LoggingError};
pub use stats::StatsCounter;
