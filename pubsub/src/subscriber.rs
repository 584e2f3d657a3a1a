//! Callback registry and in-order event dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::PubsubError;
use crate::topic::Topic;
use crate::transport::{BrokerTransport, Event};

/// A notification handler. Runs on the dispatcher task, so it should not block.
pub type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

type Handlers = Arc<RwLock<HashMap<Topic, Vec<Callback>>>>;

/// Maintains topic subscriptions on a broker and delivers events to callbacks.
///
/// The broker is told about a topic when its first callback is registered and
/// released when the topic is unsubscribed.
pub struct TopicSubscriber {
    transport: Arc<dyn BrokerTransport>,
    handlers: Handlers,
    dispatcher: JoinHandle<()>,
}

impl TopicSubscriber {
    /// Connect the transport and start the dispatcher.
    pub async fn connect(transport: Arc<dyn BrokerTransport>) -> Result<Self, PubsubError> {
        let (tx, rx) = mpsc::unbounded_channel();
        transport.connect(tx).await?;

        let handlers: Handlers = Arc::new(RwLock::new(HashMap::new()));
        let dispatcher = tokio::spawn(dispatch(rx, handlers.clone()));

        Ok(Self {
            transport,
            handlers,
            dispatcher,
        })
    }

    /// Register `callback` for each of `topics`.
    pub async fn subscribe<F>(&self, topics: &[Topic], callback: F) -> Result<(), PubsubError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        for topic in topics {
            // Register before telling the broker so no early event is lost.
            let first = {
                let mut handlers = self.handlers.write().await;
                let entry = handlers.entry(topic.clone()).or_default();
                entry.push(callback.clone());
                entry.len() == 1
            };
            if first {
                if let Err(e) = self.transport.subscribe(topic).await {
                    self.withdraw(topic, &callback).await;
                    return Err(e);
                }
            }
            debug!(%topic, "subscribed");
        }
        Ok(())
    }

    /// Remove one registration of `callback`, leaving any registered
    /// meanwhile by other callers.
    async fn withdraw(&self, topic: &Topic, callback: &Callback) {
        let mut handlers = self.handlers.write().await;
        if let Some(callbacks) = handlers.get_mut(topic) {
            if let Some(i) = callbacks.iter().position(|c| Arc::ptr_eq(c, callback)) {
                callbacks.remove(i);
            }
            if callbacks.is_empty() {
                handlers.remove(topic);
            }
        }
    }

    /// Drop every callback for `topics` and release them on the broker.
    pub async fn unsubscribe(&self, topics: &[Topic]) -> Result<(), PubsubError> {
        for topic in topics {
            if self.handlers.write().await.remove(topic).is_none() {
                return Err(PubsubError::NotSubscribed(topic.to_string()));
            }
            self.transport.unsubscribe(topic).await?;
            debug!(%topic, "unsubscribed");
        }
        Ok(())
    }

    pub async fn unsubscribe_all(&self) -> Result<(), PubsubError> {
        let topics = self.topics().await;
        self.unsubscribe(&topics).await
    }

    /// Currently subscribed topics, sorted.
    pub async fn topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.handlers.read().await.keys().cloned().collect();
        topics.sort();
        topics
    }
}

impl Drop for TopicSubscriber {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

async fn dispatch(mut rx: mpsc::UnboundedReceiver<Event>, handlers: Handlers) {
    while let Some(event) = rx.recv().await {
        let callbacks = {
            let handlers = handlers.read().await;
            match Topic::new(event.topic.as_str()) {
                Ok(topic) => handlers.get(&topic).cloned().unwrap_or_default(),
                Err(_) => {
                    warn!(topic = %event.topic, "event on invalid topic dropped");
                    continue;
                }
            }
        };
        trace!(topic = %event.topic, callbacks = callbacks.len(), "dispatching event");
        for callback in &callbacks {
            callback(&event);
        }
    }
    debug!("event stream closed");
}
