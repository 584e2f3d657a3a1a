//! The node RPC boundary.
//!
//! Every node is reached through the [`NodeApi`] trait: one timeout-bounded
//! request per call, returning a typed value or an [`ApiError`]. [`HttpNode`]
//! implements it over the node's REST interface; tests use in-memory nodes.

pub mod error;
pub mod http;
pub mod node;
pub mod responses;

pub use error::ApiError;
pub use http::HttpNode;
pub use node::{Api, NodeApi};
pub use responses::{
    AddressBalance, LedgerInclusionState, MessageMetadata, MilestoneResponse, NodeInfo,
    OutputResponse,
};
