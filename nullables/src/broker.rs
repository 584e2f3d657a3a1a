//! Nullable broker: publishes only what the test tells it to.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use quorum_pubsub::{BrokerTransport, Event, PubsubError, Topic};

#[derive(Default)]
struct BrokerState {
    sink: Option<mpsc::UnboundedSender<Event>>,
    topics: BTreeSet<Topic>,
    refuse: bool,
}

/// An in-memory broker. Cloning shares the state, so a test keeps one handle
/// to publish through while the subscriber owns another.
#[derive(Clone, Default)]
pub struct NullBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl NullBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make subsequent subscribe calls fail.
    pub fn refuse_subscriptions(&self) {
        self.state().refuse = true;
    }

    /// Deliver an event if anyone subscribed to `topic`. Returns whether it
    /// was delivered.
    pub fn publish(&self, topic: &Topic, data: serde_json::Value) -> bool {
        let state = self.state();
        if !state.topics.contains(topic) {
            return false;
        }
        match &state.sink {
            Some(sink) => sink
                .send(Event {
                    topic: topic.to_string(),
                    data,
                })
                .is_ok(),
            None => false,
        }
    }

    pub fn subscribed_topics(&self) -> Vec<Topic> {
        self.state().topics.iter().cloned().collect()
    }
}

#[async_trait]
impl BrokerTransport for NullBroker {
    async fn connect(&self, sink: mpsc::UnboundedSender<Event>) -> Result<(), PubsubError> {
        self.state().sink = Some(sink);
        Ok(())
    }

    async fn subscribe(&self, topic: &Topic) -> Result<(), PubsubError> {
        let mut state = self.state();
        if state.refuse {
            return Err(PubsubError::Transport("subscription refused".into()));
        }
        state.topics.insert(topic.clone());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &Topic) -> Result<(), PubsubError> {
        self.state().topics.remove(topic);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publishes_only_subscribed_topics() {
        let broker = NullBroker::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        broker.connect(tx).await.unwrap();
        broker.subscribe(&Topic::messages()).await.unwrap();

        assert!(broker.publish(&Topic::messages(), serde_json::json!(1)));
        assert!(!broker.publish(&Topic::milestones_latest(), serde_json::json!(2)));
        assert_eq!(rx.recv().await.unwrap().data, serde_json::json!(1));
    }
}
