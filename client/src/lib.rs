//! Quorum-verified ledger client.
//!
//! Reads are fanned out to several nodes and only accepted when enough of
//! them agree; messages are built, signed and given proof-of-work locally and
//! broadcast to the pool. Keys and addresses are derived from a caller-held
//! seed that is only ever borrowed.
//!
//! ```no_run
//! # async fn demo() -> Result<(), quorum_client::ClientError> {
//! use quorum_client::ClientBuilder;
//!
//! let client = ClientBuilder::new()
//!     .with_nodes(&["http://node-a:14265", "http://node-b:14265", "http://node-c:14265"])
//!     .with_quorum_size(3)
//!     .with_quorum_threshold(0.66)
//!     .finish()
//!     .await?;
//! let info = client.get_info().await?;
//! println!("{} on {}", info.url, info.info.network);
//! # Ok(())
//! # }
//! ```

pub mod addresses;
pub mod balance;
pub mod builder;
pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod node_pool;
pub mod pow;
pub mod quorum;
pub mod sender;
pub mod sync;

pub use addresses::{AddressFinder, DerivedAddress, UnspentAddressGetter, UsedAddress};
pub use balance::BalanceGetter;
pub use builder::ClientBuilder;
pub use client::{Client, NodeInfoWrapper};
pub use config::{ClientConfig, QuorumConfig};
pub use error::{ClientError, Disagreement, NodeFailure, ValueGroup};
pub use message::{BuilderState, InputSigningData, MessageBuilder};
pub use node_pool::{Node, NodeHealth, NodePool, NodeStatus, PoolState};
pub use pow::PowEngine;
pub use quorum::{FirstAnswer, QuorumResolver, QuorumResult};
pub use sender::MessageSender;

pub use quorum_api::Api;
pub use quorum_pubsub::{Event, Topic};
