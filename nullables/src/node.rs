//! Nullable node: answers from a [`NullLedger`] unless told to misbehave.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use quorum_api::{
    AddressBalance, ApiError, MessageMetadata, MilestoneResponse, NodeApi, NodeInfo,
    OutputResponse,
};
use quorum_types::{Address, Message, MessageId, OutputId};
use quorum_work::{validate_work, WorkBudget, WorkGenerator};

use crate::ledger::NullLedger;

/// How a [`NullNode`] answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeMode {
    /// Answers from the ledger.
    Honest,
    /// Every call fails with a transport error.
    Offline,
    /// Every call sleeps far past any timeout.
    Hanging,
    /// Every call returns an unparsable response.
    Malformed,
    /// Reads are honest; message submission is rejected.
    Rejecting,
    /// Reads are honest; delegated proof-of-work returns a nonce that fails.
    DishonestPow,
}

struct Behaviour {
    mode: NodeMode,
    latency: Duration,
    network: String,
    milestone: u32,
    min_pow_score: f64,
    healthy: bool,
    outputs: HashMap<OutputId, OutputResponse>,
    output_ids: HashMap<Address, Vec<OutputId>>,
    balances: HashMap<Address, u64>,
}

/// An in-memory node for tests.
pub struct NullNode {
    url: String,
    ledger: NullLedger,
    behaviour: Mutex<Behaviour>,
    calls: Mutex<Vec<String>>,
    queried_addresses: Mutex<Vec<Address>>,
    posted: Mutex<Vec<Message>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl NullNode {
    pub fn new(url: impl Into<String>, ledger: NullLedger) -> Self {
        Self {
            url: url.into(),
            ledger,
            behaviour: Mutex::new(Behaviour {
                mode: NodeMode::Honest,
                latency: Duration::ZERO,
                network: "devnet".into(),
                milestone: 0,
                min_pow_score: 0.0,
                healthy: true,
                outputs: HashMap::new(),
                output_ids: HashMap::new(),
                balances: HashMap::new(),
            }),
            calls: Mutex::new(Vec::new()),
            queried_addresses: Mutex::new(Vec::new()),
            posted: Mutex::new(Vec::new()),
        }
    }

    pub fn with_mode(self, mode: NodeMode) -> Self {
        self.set_mode(mode);
        self
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        lock(&self.behaviour).latency = latency;
        self
    }

    pub fn with_network(self, network: impl Into<String>) -> Self {
        lock(&self.behaviour).network = network.into();
        self
    }

    pub fn with_milestone(self, index: u32) -> Self {
        self.set_milestone(index);
        self
    }

    pub fn with_min_pow_score(self, score: f64) -> Self {
        lock(&self.behaviour).min_pow_score = score;
        self
    }

    pub fn with_health(self, healthy: bool) -> Self {
        lock(&self.behaviour).healthy = healthy;
        self
    }

    /// Report `response` for `id` instead of the ledger's answer.
    pub fn with_output(self, id: OutputId, response: OutputResponse) -> Self {
        lock(&self.behaviour).outputs.insert(id, response);
        self
    }

    /// Report `ids` as the outputs of `address` instead of the ledger's answer.
    pub fn with_output_ids(self, address: Address, ids: Vec<OutputId>) -> Self {
        lock(&self.behaviour).output_ids.insert(address, ids);
        self
    }

    pub fn with_balance(self, address: Address, balance: u64) -> Self {
        lock(&self.behaviour).balances.insert(address, balance);
        self
    }

    pub fn set_mode(&self, mode: NodeMode) {
        lock(&self.behaviour).mode = mode;
    }

    pub fn set_milestone(&self, index: u32) {
        lock(&self.behaviour).milestone = index;
    }

    pub fn ledger(&self) -> &NullLedger {
        &self.ledger
    }

    /// Names of the calls made so far, in order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        lock(&self.calls).iter().filter(|c| *c == name).count()
    }

    /// Addresses passed to address queries, in order.
    pub fn queried_addresses(&self) -> Vec<Address> {
        lock(&self.queried_addresses).clone()
    }

    /// Messages this node accepted.
    pub fn posted(&self) -> Vec<Message> {
        lock(&self.posted).clone()
    }

    /// Record the call, wait out the latency and apply the failure modes that
    /// affect every call.
    async fn enter(&self, call: &str) -> Result<NodeMode, ApiError> {
        lock(&self.calls).push(call.to_string());
        let (mode, latency) = {
            let behaviour = lock(&self.behaviour);
            (behaviour.mode, behaviour.latency)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match mode {
            NodeMode::Offline => Err(ApiError::Transport(format!("{} is offline", self.url))),
            NodeMode::Hanging => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ApiError::Timeout(self.url.clone()))
            }
            NodeMode::Malformed => Err(ApiError::Malformed(format!(
                "{} returned garbage",
                self.url
            ))),
            mode => Ok(mode),
        }
    }

    fn not_found(what: impl std::fmt::Display) -> ApiError {
        ApiError::NotFound(what.to_string())
    }
}

#[async_trait]
impl NodeApi for NullNode {
    fn url(&self) -> &str {
        &self.url
    }

    async fn get_health(&self) -> Result<bool, ApiError> {
        self.enter("get_health").await?;
        Ok(lock(&self.behaviour).healthy)
    }

    async fn get_info(&self) -> Result<NodeInfo, ApiError> {
        self.enter("get_info").await?;
        let behaviour = lock(&self.behaviour);
        Ok(NodeInfo {
            name: self.url.clone(),
            version: "0.0.0-null".into(),
            network: behaviour.network.clone(),
            is_healthy: behaviour.healthy,
            min_pow_score: behaviour.min_pow_score,
            latest_milestone_index: behaviour.milestone,
            confirmed_milestone_index: behaviour.milestone,
        })
    }

    async fn get_tips(&self) -> Result<Vec<MessageId>, ApiError> {
        self.enter("get_tips").await?;
        Ok(self.ledger.tips())
    }

    async fn post_message(&self, message: &Message) -> Result<MessageId, ApiError> {
        let mode = self.enter("post_message").await?;
        if mode == NodeMode::Rejecting {
            return Err(ApiError::Rejected(format!("{} refuses messages", self.url)));
        }
        message
            .validate()
            .map_err(|e| ApiError::Rejected(e.to_string()))?;
        if let Some(missing) = message.parents.iter().find(|p| !self.ledger.contains(p)) {
            return Err(ApiError::Rejected(format!("unknown parent {missing}")));
        }
        let min_pow_score = lock(&self.behaviour).min_pow_score;
        if !validate_work(&message.pow_bytes(), message.nonce, min_pow_score) {
            return Err(ApiError::Rejected("insufficient pow score".into()));
        }
        lock(&self.posted).push(message.clone());
        Ok(self.ledger.attach(message.clone()))
    }

    async fn get_message(&self, message_id: &MessageId) -> Result<Message, ApiError> {
        self.enter("get_message").await?;
        self.ledger
            .message(message_id)
            .ok_or_else(|| Self::not_found(message_id))
    }

    async fn get_message_metadata(
        &self,
        message_id: &MessageId,
    ) -> Result<MessageMetadata, ApiError> {
        self.enter("get_message_metadata").await?;
        self.ledger
            .metadata(message_id)
            .ok_or_else(|| Self::not_found(message_id))
    }

    async fn find_message_ids(&self, index: &[u8]) -> Result<Vec<MessageId>, ApiError> {
        self.enter("find_message_ids").await?;
        Ok(self.ledger.indexed(index))
    }

    async fn get_output(&self, output_id: &OutputId) -> Result<OutputResponse, ApiError> {
        self.enter("get_output").await?;
        if let Some(response) = lock(&self.behaviour).outputs.get(output_id) {
            return Ok(response.clone());
        }
        self.ledger
            .output(output_id)
            .ok_or_else(|| Self::not_found(output_id))
    }

    async fn get_address_balance(&self, address: &Address) -> Result<AddressBalance, ApiError> {
        lock(&self.queried_addresses).push(*address);
        self.enter("get_address_balance").await?;
        let balance = lock(&self.behaviour)
            .balances
            .get(address)
            .copied()
            .unwrap_or_else(|| self.ledger.balance(address));
        Ok(AddressBalance {
            address: *address,
            balance,
        })
    }

    async fn get_address_output_ids(
        &self,
        address: &Address,
        include_spent: bool,
    ) -> Result<Vec<OutputId>, ApiError> {
        lock(&self.queried_addresses).push(*address);
        self.enter("get_address_output_ids").await?;
        if let Some(ids) = lock(&self.behaviour).output_ids.get(address) {
            return Ok(ids.clone());
        }
        Ok(self.ledger.output_ids(address, include_spent))
    }

    async fn get_milestone(&self, index: u32) -> Result<MilestoneResponse, ApiError> {
        self.enter("get_milestone").await?;
        self.ledger
            .milestone(index)
            .ok_or_else(|| Self::not_found(format!("milestone {index}")))
    }

    async fn work_generate(&self, pow_bytes: &[u8], target_score: f64) -> Result<u64, ApiError> {
        let mode = self.enter("work_generate").await?;
        if mode == NodeMode::DishonestPow {
            let bad = (0..u64::MAX)
                .find(|&n| !validate_work(pow_bytes, n, target_score))
                .unwrap_or(0);
            return Ok(bad);
        }
        WorkGenerator
            .generate(pow_bytes, target_score, &WorkBudget::unlimited())
            .map(|nonce| nonce.0)
            .map_err(|e| ApiError::Rejected(e.to_string()))
    }
}
