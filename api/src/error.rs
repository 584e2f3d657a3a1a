use thiserror::Error;

/// Failure of a single call to a single node.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("node returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("node rejected the request: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl ApiError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout(e.to_string())
        } else if e.is_connect() {
            ApiError::Transport(format!("connection failed: {e}"))
        } else if e.is_decode() {
            ApiError::Malformed(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}
