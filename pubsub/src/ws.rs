//! WebSocket broker transport.
//!
//! Control frames sent to the broker:
//! `{"action":"subscribe","topic":"..."}` and `{"action":"unsubscribe","topic":"..."}`.
//! Frames received: `{"type":"event","topic":"...","data":...}`,
//! `{"type":"ack","action":"...","topic":"..."}` and
//! `{"type":"error","message":"..."}`, the last optionally naming the
//! `action` and `topic` it answers.
//!
//! Every control frame waits for its ack or error. Brokers answer in order,
//! so a reply that names no request settles the oldest one outstanding.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::PubsubError;
use crate::topic::Topic;
use crate::transport::{BrokerTransport, Event};

const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum ControlMessage<'a> {
    Subscribe { topic: &'a str },
    Unsubscribe { topic: &'a str },
}

impl ControlMessage<'_> {
    fn action(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
        }
    }

    fn topic(&self) -> &str {
        match self {
            Self::Subscribe { topic } | Self::Unsubscribe { topic } => *topic,
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum BrokerFrame {
    Event {
        topic: String,
        data: serde_json::Value,
    },
    Ack {
        action: String,
        topic: String,
    },
    Error {
        message: String,
        #[serde(default)]
        action: Option<String>,
        #[serde(default)]
        topic: Option<String>,
    },
}

/// A control frame sent and not yet answered.
struct PendingRequest {
    action: &'static str,
    topic: String,
    reply: oneshot::Sender<Result<(), String>>,
}

/// Requests in the order they were sent.
#[derive(Default)]
struct PendingRequests(Mutex<VecDeque<PendingRequest>>);

impl PendingRequests {
    fn lock(&self) -> MutexGuard<'_, VecDeque<PendingRequest>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, request: PendingRequest) {
        self.lock().push_back(request);
    }

    /// Settle the request named by `action`/`topic`, or the oldest one when
    /// the reply names none. Returns false if nothing was waiting.
    fn settle(&self, action: Option<&str>, topic: Option<&str>, outcome: Result<(), String>) -> bool {
        let mut pending = self.lock();
        let position = match (action, topic) {
            (Some(action), Some(topic)) => pending
                .iter()
                .position(|r| r.action == action && r.topic == topic),
            (None, Some(topic)) => pending.iter().position(|r| r.topic == topic),
            _ => (!pending.is_empty()).then_some(0),
        };
        match position.and_then(|i| pending.remove(i)) {
            Some(request) => {
                let _ = request.reply.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Drop every waiter so it sees the connection as closed.
    fn clear(&self) {
        self.lock().clear();
    }

    fn forget(&self, action: &str, topic: &str) {
        let mut pending = self.lock();
        if let Some(i) = pending
            .iter()
            .position(|r| r.action == action && r.topic == topic)
        {
            pending.remove(i);
        }
    }
}

/// A broker reached over a WebSocket connection.
pub struct WsBroker {
    url: String,
    ack_timeout: Duration,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pending: Arc<PendingRequests>,
}

impl WsBroker {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            outbound: Mutex::new(None),
            pending: Arc::new(PendingRequests::default()),
        }
    }

    /// How long a subscribe or unsubscribe waits for the broker's answer.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send `control` and wait until the broker acknowledges or refuses it.
    async fn request(&self, control: ControlMessage<'_>) -> Result<(), PubsubError> {
        let text =
            serde_json::to_string(&control).map_err(|e| PubsubError::Transport(e.to_string()))?;
        let (reply, answer) = oneshot::channel();
        {
            let outbound = self
                .outbound
                .lock()
                .map_err(|_| PubsubError::Transport("outbound queue poisoned".into()))?;
            let tx = outbound.as_ref().ok_or(PubsubError::Closed)?;
            // Registered before sending so a fast ack cannot overtake it.
            self.pending.push(PendingRequest {
                action: control.action(),
                topic: control.topic().to_string(),
                reply,
            });
            if tx.send(Message::Text(text)).is_err() {
                self.pending.forget(control.action(), control.topic());
                return Err(PubsubError::Closed);
            }
        }

        match tokio::time::timeout(self.ack_timeout, answer).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(message))) => Err(PubsubError::Rejected(message)),
            Ok(Err(_)) => Err(PubsubError::Closed),
            Err(_) => {
                self.pending.forget(control.action(), control.topic());
                Err(PubsubError::AckTimeout(format!(
                    "{} {}",
                    control.action(),
                    control.topic()
                )))
            }
        }
    }
}

#[async_trait]
impl BrokerTransport for WsBroker {
    async fn connect(&self, sink: mpsc::UnboundedSender<Event>) -> Result<(), PubsubError> {
        let (stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| PubsubError::Transport(e.to_string()))?;
        info!(url = %self.url, "connected to broker");
        let (mut ws_sender, mut ws_receiver) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        // Writer: drains control frames and pongs into the socket.
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = ws_sender.send(message).await {
                    warn!("broker send failed: {e}");
                    break;
                }
            }
        });

        // Reader: forwards events in arrival order and settles requests.
        let pong_tx = tx.clone();
        let pending = self.pending.clone();
        tokio::spawn(async move {
            while let Some(frame) = ws_receiver.next().await {
                let message = match frame {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("broker receive error: {e}");
                        break;
                    }
                };
                match message {
                    Message::Text(text) => match serde_json::from_str::<BrokerFrame>(&text) {
                        Ok(BrokerFrame::Event { topic, data }) => {
                            if sink.send(Event { topic, data }).is_err() {
                                break;
                            }
                        }
                        Ok(BrokerFrame::Ack { action, topic }) => {
                            debug!(%action, %topic, "broker ack");
                            if !pending.settle(Some(&action), Some(&topic), Ok(())) {
                                debug!(%action, %topic, "ack for no outstanding request");
                            }
                        }
                        Ok(BrokerFrame::Error {
                            message,
                            action,
                            topic,
                        }) => {
                            warn!(%message, "broker error");
                            pending.settle(action.as_deref(), topic.as_deref(), Err(message));
                        }
                        Err(e) => warn!("unparsable broker frame: {e}"),
                    },
                    Message::Ping(data) => {
                        let _ = pong_tx.send(Message::Pong(data));
                    }
                    Message::Close(_) => {
                        debug!("broker sent close frame");
                        break;
                    }
                    _ => {}
                }
            }
            pending.clear();
            debug!("broker connection closed");
        });

        let mut outbound = self
            .outbound
            .lock()
            .map_err(|_| PubsubError::Transport("outbound queue poisoned".into()))?;
        *outbound = Some(tx);
        Ok(())
    }

    async fn subscribe(&self, topic: &Topic) -> Result<(), PubsubError> {
        self.request(ControlMessage::Subscribe {
            topic: topic.as_str(),
        })
        .await
    }

    async fn unsubscribe(&self, topic: &Topic) -> Result<(), PubsubError> {
        self.request(ControlMessage::Unsubscribe {
            topic: topic.as_str(),
        })
        .await
    }
}
