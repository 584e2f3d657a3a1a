//! [`NodeApi`] over a node's REST interface.
//!
//! Every successful response is wrapped as `{"data": ...}`; failures carry
//! `{"error": {"code": ..., "message": ...}}` with a non-2xx status.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::trace;

use quorum_types::{Address, Message, MessageId, OutputId};

use crate::error::ApiError;
use crate::node::NodeApi;
use crate::responses::{AddressBalance, MessageMetadata, MilestoneResponse, NodeInfo, OutputResponse};

const API_PREFIX: &str = "/api/v1";

/// HTTP client for one node.
///
/// Wraps `reqwest::Client` with the node's base URL. The client-level timeout
/// is a backstop; callers bound each call with their own per-operation timeout.
#[derive(Clone)]
pub struct HttpNode {
    http: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TipsData {
    tip_message_ids: Vec<MessageId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageIdData {
    message_id: MessageId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageIdsData {
    message_ids: Vec<MessageId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutputIdsData {
    output_ids: Vec<OutputId>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PowRequest {
    pow_bytes: String,
    target_score: f64,
}

#[derive(Deserialize)]
struct PowData {
    nonce: u64,
}

impl HttpNode {
    /// Create a client for the node at `url` (e.g. `http://127.0.0.1:14265`).
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| ApiError::Transport(format!("failed to create HTTP client: {e}")))?;
        let url = url.into().trim_end_matches('/').to_string();
        Ok(Self { http, url })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}{}", self.url, API_PREFIX, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.endpoint(path);
        trace!(%url, "GET");
        let response = self.http.get(&url).send().await?;
        read_data(response).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.endpoint(path);
        trace!(%url, "POST");
        let response = self.http.post(&url).json(body).send().await?;
        read_data(response).await
    }
}

/// Map the status, then parse the `data` envelope.
async fn read_data<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.bytes().await?;

    if !status.is_success() {
        let message = serde_json::from_slice::<ErrorEnvelope>(&body)
            .map(|e| {
                if e.error.code.is_empty() {
                    e.error.message
                } else {
                    format!("{}: {}", e.error.code, e.error.message)
                }
            })
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
        return Err(match status {
            StatusCode::NOT_FOUND => ApiError::NotFound(message),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                ApiError::Rejected(message)
            }
            _ => ApiError::Status {
                status: status.as_u16(),
                message,
            },
        });
    }

    serde_json::from_slice::<Envelope<T>>(&body)
        .map(|envelope| envelope.data)
        .map_err(|e| ApiError::Malformed(e.to_string()))
}

#[async_trait]
impl NodeApi for HttpNode {
    fn url(&self) -> &str {
        &self.url
    }

    async fn get_health(&self) -> Result<bool, ApiError> {
        let response = self.http.get(format!("{}/health", self.url)).send().await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::SERVICE_UNAVAILABLE => Ok(false),
            status => Err(ApiError::Status {
                status: status.as_u16(),
                message: "unexpected health status".into(),
            }),
        }
    }

    async fn get_info(&self) -> Result<NodeInfo, ApiError> {
        self.get("/info").await
    }

    async fn get_tips(&self) -> Result<Vec<MessageId>, ApiError> {
        let data: TipsData = self.get("/tips").await?;
        Ok(data.tip_message_ids)
    }

    async fn post_message(&self, message: &Message) -> Result<MessageId, ApiError> {
        let data: MessageIdData = self.post("/messages", message).await?;
        Ok(data.message_id)
    }

    async fn get_message(&self, message_id: &MessageId) -> Result<Message, ApiError> {
        self.get(&format!("/messages/{message_id}")).await
    }

    async fn get_message_metadata(
        &self,
        message_id: &MessageId,
    ) -> Result<MessageMetadata, ApiError> {
        self.get(&format!("/messages/{message_id}/metadata")).await
    }

    async fn find_message_ids(&self, index: &[u8]) -> Result<Vec<MessageId>, ApiError> {
        let data: MessageIdsData = self
            .get(&format!("/messages?index={}", hex::encode(index)))
            .await?;
        Ok(data.message_ids)
    }

    async fn get_output(&self, output_id: &OutputId) -> Result<OutputResponse, ApiError> {
        self.get(&format!("/outputs/{output_id}")).await
    }

    async fn get_address_balance(&self, address: &Address) -> Result<AddressBalance, ApiError> {
        self.get(&format!("/addresses/{address}")).await
    }

    async fn get_address_output_ids(
        &self,
        address: &Address,
        include_spent: bool,
    ) -> Result<Vec<OutputId>, ApiError> {
        let data: OutputIdsData = self
            .get(&format!(
                "/addresses/{address}/outputs?include-spent={include_spent}"
            ))
            .await?;
        Ok(data.output_ids)
    }

    async fn get_milestone(&self, index: u32) -> Result<MilestoneResponse, ApiError> {
        self.get(&format!("/milestones/{index}")).await
    }

    async fn work_generate(&self, pow_bytes: &[u8], target_score: f64) -> Result<u64, ApiError> {
        let request = PowRequest {
            pow_bytes: hex::encode(pow_bytes),
            target_score,
        };
        let data: PowData = self.post("/pow", &request).await?;
        Ok(data.nonce)
    }
}
