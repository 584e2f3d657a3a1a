//! Typed node responses.
//!
//! Fields that legitimately differ between honest nodes at the same moment
//! (local timestamps, the node's own ledger index) are left out, so responses
//! from agreeing nodes compare equal.

use serde::{Deserialize, Serialize};

use quorum_types::{Address, MessageId, Output, OutputId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub name: String,
    pub version: String,
    pub network: String,
    pub is_healthy: bool,
    pub min_pow_score: f64,
    pub latest_milestone_index: u32,
    pub confirmed_milestone_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LedgerInclusionState {
    Included,
    Conflicting,
    NoTransaction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    pub message_id: MessageId,
    pub parents: Vec<MessageId>,
    pub is_solid: bool,
    #[serde(default)]
    pub referenced_by_milestone_index: Option<u32>,
    #[serde(default)]
    pub ledger_inclusion_state: Option<LedgerInclusionState>,
    #[serde(default)]
    pub should_promote: Option<bool>,
    #[serde(default)]
    pub should_reattach: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputResponse {
    pub output_id: OutputId,
    pub message_id: MessageId,
    pub output: Output,
    pub is_spent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressBalance {
    pub address: Address,
    pub balance: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneResponse {
    pub index: u32,
    pub message_id: MessageId,
    pub timestamp: u64,
}
