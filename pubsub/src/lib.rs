//! Topic notifications from an external broker.
//!
//! Callers register callbacks for named [`Topic`]s on a [`TopicSubscriber`].
//! The subscriber talks to the broker through a [`BrokerTransport`]; the
//! WebSocket transport is [`WsBroker`]. Events are dispatched by a single task
//! in arrival order, so callbacks for one topic never run out of order.

pub mod error;
pub mod subscriber;
pub mod topic;
pub mod transport;
pub mod ws;

pub use error::PubsubError;
pub use subscriber::{Callback, TopicSubscriber};
pub use topic::Topic;
pub use transport::{BrokerTransport, Event};
pub use ws::WsBroker;
