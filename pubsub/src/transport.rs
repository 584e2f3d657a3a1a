//! The broker boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::PubsubError;
use crate::topic::Topic;

/// A notification published on a topic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub topic: String,
    pub data: serde_json::Value,
}

/// A connection to a pub/sub broker.
///
/// A transport must forward events into the sink it was connected with in the
/// order the broker delivered them.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Open the connection and start delivering events into `sink`.
    async fn connect(&self, sink: mpsc::UnboundedSender<Event>) -> Result<(), PubsubError>;

    async fn subscribe(&self, topic: &Topic) -> Result<(), PubsubError>;

    async fn unsubscribe(&self, topic: &Topic) -> Result<(), PubsubError>;
}
