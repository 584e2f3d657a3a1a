use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PubsubError {
    #[error("invalid topic {0:?}")]
    InvalidTopic(String),

    #[error("not subscribed to {0}")]
    NotSubscribed(String),

    #[error("broker transport error: {0}")]
    Transport(String),

    #[error("broker refused the request: {0}")]
    Rejected(String),

    #[error("broker did not acknowledge {0} in time")]
    AckTimeout(String),

    #[error("broker connection closed")]
    Closed,
}
