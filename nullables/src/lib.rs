//! Nullable infrastructure for deterministic testing.
//!
//! Inspired by the "A-frame architecture" pattern from RsNano: the node RPC
//! boundary and the broker are traits, and this crate provides in-memory
//! implementations that
//! - share one deterministic ledger between any number of nodes
//! - can be steered per node (latency, outages, garbage, lies)
//! - record what was asked of them
//! - never touch the network
//!
//! Usage: hand `Arc<NullNode>`s and a `NullBroker` to the client in tests.

pub mod broker;
pub mod ledger;
pub mod node;

pub use broker::NullBroker;
pub use ledger::NullLedger;
pub use node::{NodeMode, NullNode};
