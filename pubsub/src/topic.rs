//! Topic names accepted by the broker.
//!
//! ```text
//! milestones/latest
//! milestones/confirmed
//! messages
//! messages/referenced
//! messages/indexation/{hex index, 1-64 bytes}
//! messages/{message id}/metadata
//! outputs/{output id}
//! addresses/{address}/outputs
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PubsubError;

const MESSAGE_ID_HEX: usize = 64;
const ADDRESS_HEX: usize = 64;
const OUTPUT_ID_HEX: usize = 68;
const INDEX_HEX_MAX: usize = 128;

/// A validated topic name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic(String);

fn is_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn is_valid(topic: &str) -> bool {
    let parts: Vec<&str> = topic.split('/').collect();
    match parts.as_slice() {
        ["milestones", "latest" | "confirmed"] => true,
        ["messages"] | ["messages", "referenced"] => true,
        ["messages", "indexation", index] => {
            !index.is_empty()
                && index.len() <= INDEX_HEX_MAX
                && index.len() % 2 == 0
                && index.bytes().all(|b| b.is_ascii_hexdigit())
        }
        ["messages", id, "metadata"] => is_hex(id, MESSAGE_ID_HEX),
        ["outputs", id] => is_hex(id, OUTPUT_ID_HEX),
        ["addresses", address, "outputs"] => is_hex(address, ADDRESS_HEX),
        _ => false,
    }
}

impl Topic {
    pub fn new(topic: impl Into<String>) -> Result<Self, PubsubError> {
        let topic = topic.into();
        if is_valid(&topic) {
            Ok(Self(topic))
        } else {
            Err(PubsubError::InvalidTopic(topic))
        }
    }

    pub fn milestones_latest() -> Self {
        Self("milestones/latest".into())
    }

    pub fn milestones_confirmed() -> Self {
        Self("milestones/confirmed".into())
    }

    pub fn messages() -> Self {
        Self("messages".into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Topic {
    type Err = PubsubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Topic {
    type Error = PubsubError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.0
    }
}
