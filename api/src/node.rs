//! The per-node request/response contract.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use quorum_types::{Address, Message, MessageId, OutputId};

use crate::error::ApiError;
use crate::responses::{AddressBalance, MessageMetadata, MilestoneResponse, NodeInfo, OutputResponse};

/// One node endpoint. Implementations must be cheap to share across tasks.
#[async_trait]
pub trait NodeApi: Send + Sync {
    /// The node's identity.
    fn url(&self) -> &str;

    async fn get_health(&self) -> Result<bool, ApiError>;

    async fn get_info(&self) -> Result<NodeInfo, ApiError>;

    async fn get_tips(&self) -> Result<Vec<MessageId>, ApiError>;

    /// Submit a fully built message; returns the id the node computed.
    async fn post_message(&self, message: &Message) -> Result<MessageId, ApiError>;

    async fn get_message(&self, message_id: &MessageId) -> Result<Message, ApiError>;

    async fn get_message_metadata(
        &self,
        message_id: &MessageId,
    ) -> Result<MessageMetadata, ApiError>;

    /// Ids of messages carrying an indexation payload with this index.
    async fn find_message_ids(&self, index: &[u8]) -> Result<Vec<MessageId>, ApiError>;

    async fn get_output(&self, output_id: &OutputId) -> Result<OutputResponse, ApiError>;

    async fn get_address_balance(&self, address: &Address) -> Result<AddressBalance, ApiError>;

    async fn get_address_output_ids(
        &self,
        address: &Address,
        include_spent: bool,
    ) -> Result<Vec<OutputId>, ApiError>;

    async fn get_milestone(&self, index: u32) -> Result<MilestoneResponse, ApiError>;

    /// Ask the node to search for a nonce reaching `target_score`.
    async fn work_generate(&self, pow_bytes: &[u8], target_score: f64) -> Result<u64, ApiError>;
}

/// Node operations, used to key per-operation timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Api {
    GetHealth,
    GetInfo,
    GetTips,
    PostMessage,
    GetMessage,
    GetMessageMetadata,
    FindMessages,
    GetOutput,
    GetBalance,
    GetAddressOutputs,
    GetMilestone,
    PowGenerate,
}

impl Api {
    pub const ALL: [Api; 12] = [
        Api::GetHealth,
        Api::GetInfo,
        Api::GetTips,
        Api::PostMessage,
        Api::GetMessage,
        Api::GetMessageMetadata,
        Api::FindMessages,
        Api::GetOutput,
        Api::GetBalance,
        Api::GetAddressOutputs,
        Api::GetMilestone,
        Api::PowGenerate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Api::GetHealth => "get_health",
            Api::GetInfo => "get_info",
            Api::GetTips => "get_tips",
            Api::PostMessage => "post_message",
            Api::GetMessage => "get_message",
            Api::GetMessageMetadata => "get_message_metadata",
            Api::FindMessages => "find_messages",
            Api::GetOutput => "get_output",
            Api::GetBalance => "get_balance",
            Api::GetAddressOutputs => "get_address_outputs",
            Api::GetMilestone => "get_milestone",
            Api::PowGenerate => "pow_generate",
        }
    }
}

impl fmt::Display for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Api {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Api::ALL
            .into_iter()
            .find(|api| api.as_str() == s)
            .ok_or_else(|| format!("unknown api {s:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_names_roundtrip() {
        for api in Api::ALL {
            assert_eq!(api.as_str().parse::<Api>(), Ok(api));
        }
        assert!("get_everything".parse::<Api>().is_err());
    }
}
