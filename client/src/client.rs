//! The client facade.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures_util::future::{join_all, try_join_all};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use quorum_api::{
    Api, ApiError, HttpNode, LedgerInclusionState, MessageMetadata, MilestoneResponse, NodeApi,
    NodeInfo, OutputResponse,
};
use quorum_pubsub::{BrokerTransport, Event, Topic, TopicSubscriber};
use quorum_types::{Address, Message, MessageId, OutputId, Seed};
use quorum_utils::StatsCounter;

use crate::addresses::{AddressFinder, UnspentAddressGetter};
use crate::balance::BalanceGetter;
use crate::config::ClientConfig;
use crate::error::{ClientError, NodeFailure};
use crate::message::MessageBuilder;
use crate::node_pool::{NodePool, NodeStatus};
use crate::pow::PowEngine;
use crate::quorum::QuorumResolver;
use crate::sender::MessageSender;

/// Node info together with the node that reported it.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeInfoWrapper {
    pub url: String,
    pub info: NodeInfo,
}

/// Map the failures of a one-node-at-a-time call to the caller's error.
fn single_node_error(failures: Vec<NodeFailure>) -> ClientError {
    match failures.into_iter().last() {
        Some(NodeFailure { node, error }) => ClientError::from_node(&node, error),
        None => ClientError::NoHealthyNodes,
    }
}

/// Entry point for every query and submission. Built by
/// [`ClientBuilder`](crate::ClientBuilder).
pub struct Client {
    config: Arc<ClientConfig>,
    pool: Arc<NodePool>,
    resolver: Arc<QuorumResolver>,
    pow: PowEngine,
    stats: Arc<StatsCounter>,
    broker: Option<Arc<dyn BrokerTransport>>,
    subscriber: Mutex<Option<Arc<TopicSubscriber>>>,
    shutdown_tx: broadcast::Sender<()>,
    sync_handle: Option<JoinHandle<()>>,
}

impl Client {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: Arc<ClientConfig>,
        pool: Arc<NodePool>,
        resolver: Arc<QuorumResolver>,
        pow: PowEngine,
        stats: Arc<StatsCounter>,
        broker: Option<Arc<dyn BrokerTransport>>,
        shutdown_tx: broadcast::Sender<()>,
        sync_handle: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            config,
            pool,
            resolver,
            pow,
            stats,
            broker,
            subscriber: Mutex::new(None),
            shutdown_tx,
            sync_handle,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn resolver(&self) -> &QuorumResolver {
        &self.resolver
    }

    pub fn pool(&self) -> &NodePool {
        &self.pool
    }

    /// Health, height and latency of every configured node.
    pub async fn nodes(&self) -> Vec<NodeStatus> {
        self.pool.statuses().await
    }

    /// Resolver outcome counters.
    pub fn stats(&self) -> BTreeMap<&'static str, u64> {
        self.stats.snapshot()
    }

    /// Re-check every node now instead of waiting for the sync task.
    pub async fn sync_nodes(&self) -> crate::node_pool::PoolState {
        self.pool
            .refresh(
                &self.config.network,
                self.config.sync_height_tolerance,
                self.config.timeout_for(Api::GetInfo),
            )
            .await
    }

    // ── Single-node reads ─────────────────────────────────────────────

    /// Ask one node directly whether it is healthy. Nodes outside the pool
    /// are reached over HTTP.
    pub async fn get_health(&self, url: &str) -> Result<bool, ClientError> {
        let node: Arc<dyn NodeApi> = match self.pool.find(url).await {
            Some(node) => node,
            None => Arc::new(HttpNode::new(url, self.config.timeout_for(Api::GetHealth))?),
        };
        let timeout = self.config.timeout_for(Api::GetHealth);
        match tokio::time::timeout(timeout, node.get_health()).await {
            Ok(result) => result.map_err(|e| ClientError::from_node(url, e)),
            Err(_) => Err(ClientError::NetworkTimeout {
                node: url.to_string(),
            }),
        }
    }

    /// Info from the fastest healthy node that answers.
    pub async fn get_info(&self) -> Result<NodeInfoWrapper, ClientError> {
        self.resolver
            .first_ok(Api::GetInfo, |node| async move { node.get_info().await }, |_| Ok(()))
            .await
            .map(|answer| NodeInfoWrapper {
                url: answer.node,
                info: answer.value,
            })
            .map_err(single_node_error)
    }

    /// Tips from the fastest healthy node. Tips differ between honest nodes,
    /// so they are not put to a quorum; parents are verified before use.
    pub async fn get_tips(&self) -> Result<Vec<MessageId>, ClientError> {
        self.resolver
            .first_ok(
                Api::GetTips,
                |node| async move { node.get_tips().await },
                |tips: &Vec<MessageId>| {
                    if tips.is_empty() {
                        Err("no tips".to_string())
                    } else {
                        Ok(())
                    }
                },
            )
            .await
            .map(|answer| answer.value)
            .map_err(single_node_error)
    }

    // ── Quorum reads ──────────────────────────────────────────────────

    pub async fn get_message(&self, message_id: &MessageId) -> Result<Message, ClientError> {
        let id = *message_id;
        Ok(self
            .resolver
            .resolve(Api::GetMessage, |node| async move { node.get_message(&id).await })
            .await?
            .value)
    }

    pub async fn get_message_metadata(
        &self,
        message_id: &MessageId,
    ) -> Result<MessageMetadata, ClientError> {
        let id = *message_id;
        Ok(self
            .resolver
            .resolve(Api::GetMessageMetadata, |node| async move {
                node.get_message_metadata(&id).await
            })
            .await?
            .value)
    }

    pub async fn get_output(&self, output_id: &OutputId) -> Result<OutputResponse, ClientError> {
        let id = *output_id;
        Ok(self
            .resolver
            .resolve(Api::GetOutput, |node| async move { node.get_output(&id).await })
            .await?
            .value)
    }

    pub async fn get_milestone(&self, index: u32) -> Result<MilestoneResponse, ClientError> {
        Ok(self
            .resolver
            .resolve(Api::GetMilestone, |node| async move {
                node.get_milestone(index).await
            })
            .await?
            .value)
    }

    pub async fn get_address_balance(&self, address: &Address) -> Result<u64, ClientError> {
        let address = *address;
        Ok(self
            .resolver
            .resolve(Api::GetBalance, |node| async move {
                node.get_address_balance(&address).await
            })
            .await?
            .value
            .balance)
    }

    /// Output ids of `address`, sorted.
    pub async fn get_address_outputs(
        &self,
        address: &Address,
        include_spent: bool,
    ) -> Result<Vec<OutputId>, ClientError> {
        let address = *address;
        let result = self
            .resolver
            .resolve_optional(Api::GetAddressOutputs, |node| async move {
                let mut ids = node.get_address_output_ids(&address, include_spent).await?;
                ids.sort_unstable();
                Ok::<_, ApiError>(ids)
            })
            .await?;
        Ok(result.value.unwrap_or_default())
    }

    /// Messages filed under any of `indexation_keys`, plus `message_ids`.
    /// Duplicates are fetched once.
    pub async fn find_messages(
        &self,
        indexation_keys: &[Vec<u8>],
        message_ids: &[MessageId],
    ) -> Result<Vec<Message>, ClientError> {
        let mut ids: BTreeSet<MessageId> = message_ids.iter().copied().collect();
        for key in indexation_keys {
            let result = self
                .resolver
                .resolve_optional(Api::FindMessages, |node| {
                    let key = key.clone();
                    async move {
                        let mut ids = node.find_message_ids(&key).await?;
                        ids.sort_unstable();
                        Ok::<_, ApiError>(ids)
                    }
                })
                .await?;
            ids.extend(result.value.unwrap_or_default());
        }
        try_join_all(ids.iter().map(|id| self.get_message(id))).await
    }

    /// The given outputs plus the unspent outputs of `addresses`.
    pub async fn find_outputs(
        &self,
        output_ids: &[OutputId],
        addresses: &[Address],
    ) -> Result<Vec<OutputResponse>, ClientError> {
        let mut ids: BTreeSet<OutputId> = output_ids.iter().copied().collect();
        let per_address =
            try_join_all(addresses.iter().map(|a| self.get_address_outputs(a, false))).await?;
        ids.extend(per_address.into_iter().flatten());
        try_join_all(ids.iter().map(|id| self.get_output(id))).await
    }

    // ── Writes ────────────────────────────────────────────────────────

    /// Broadcast a finished message; the first node to accept it wins.
    pub async fn post_message(&self, message: &Message) -> Result<MessageId, ClientError> {
        message.validate()?;
        let local_id = message.id();
        let shared = Arc::new(message.clone());
        let (node_id, node) = self
            .resolver
            .broadcast(Api::PostMessage, move |api| {
                let message = shared.clone();
                async move { api.post_message(&message).await }
            })
            .await?;
        if node_id != local_id {
            warn!(node = %node, %node_id, %local_id, "node reported a different message id");
        }
        debug!(node = %node, message_id = %local_id, "message posted");
        Ok(local_id)
    }

    /// Proof-of-work target: the strictest a healthy node asked for, or the
    /// configured fallback when no node reported one.
    async fn target_score(&self) -> f64 {
        self.pool
            .min_pow_score()
            .await
            .unwrap_or(self.config.min_pow_score)
    }

    /// Every parent must be known to a quorum of nodes.
    async fn check_parents(&self, parents: &[MessageId]) -> Result<(), ClientError> {
        let checks = join_all(parents.iter().map(|&parent| async move {
            let result = self
                .resolver
                .resolve_optional(Api::GetMessage, |node| async move {
                    node.get_message(&parent).await
                })
                .await;
            match result {
                Ok(found) if found.value.is_some() => Ok(()),
                Ok(_) => Err(ClientError::InvalidParent(parent)),
                Err(e) => Err(e),
            }
        }))
        .await;
        checks.into_iter().collect()
    }

    /// Run the `PayloadAssembled -> NonceComputed -> Submitted` tail.
    pub(crate) async fn submit(&self, mut builder: MessageBuilder) -> Result<Message, ClientError> {
        self.check_parents(builder.parents()).await?;
        let pow_bytes = builder.pow_bytes()?;
        let target = self.target_score().await;
        let nonce = self.pow.compute(&pow_bytes, target).await?;
        let message = builder.set_nonce(nonce)?.clone();
        let id = self.post_message(&message).await?;
        builder.mark_submitted(id)?;
        Ok(message)
    }

    /// Wrap the payload of `message_id` in a new message on fresh tips.
    pub async fn reattach(&self, message_id: &MessageId) -> Result<(MessageId, Message), ClientError> {
        let original = self.get_message(message_id).await?;
        let builder = MessageBuilder::from_payload(
            self.config.network_id(),
            self.get_tips().await?,
            original.payload,
        )?;
        let message = self.submit(builder).await?;
        info!(original = %message_id, reattached = %message.id(), "message reattached");
        Ok((message.id(), message))
    }

    /// Attach an empty message that approves both a tip and `message_id`.
    pub async fn promote(&self, message_id: &MessageId) -> Result<(MessageId, Message), ClientError> {
        let mut parents = self.get_tips().await?;
        parents.truncate(quorum_types::message::PARENTS_MAX - 1);
        parents.push(*message_id);
        let builder = MessageBuilder::from_payload(self.config.network_id(), parents, None)?;
        let message = self.submit(builder).await?;
        info!(original = %message_id, promoter = %message.id(), "message promoted");
        Ok((message.id(), message))
    }

    /// Promote or reattach as the nodes advise.
    pub async fn retry(&self, message_id: &MessageId) -> Result<(MessageId, Message), ClientError> {
        let metadata = self.get_message_metadata(message_id).await?;
        if metadata.ledger_inclusion_state == Some(LedgerInclusionState::Included) {
            return Err(ClientError::NoNeedPromoteOrReattach(*message_id));
        }
        if metadata.should_reattach == Some(true) {
            self.reattach(message_id).await
        } else if metadata.should_promote == Some(true) {
            self.promote(message_id).await
        } else {
            Err(ClientError::NoNeedPromoteOrReattach(*message_id))
        }
    }

    // ── Flows ─────────────────────────────────────────────────────────

    pub fn send(&self) -> MessageSender<'_> {
        MessageSender::new(self)
    }

    pub fn get_unspent_address<'a>(&'a self, seed: &'a Seed) -> UnspentAddressGetter<'a> {
        UnspentAddressGetter::new(self, seed)
    }

    pub fn get_addresses<'a>(&self, seed: &'a Seed) -> AddressFinder<'a> {
        AddressFinder::new(seed)
    }

    pub fn get_balance<'a>(&'a self, seed: &'a Seed) -> BalanceGetter<'a> {
        BalanceGetter::new(self, seed)
    }

    // ── Topics ────────────────────────────────────────────────────────

    /// The broker connection, opened on first use.
    pub async fn subscriber(&self) -> Result<Arc<TopicSubscriber>, ClientError> {
        let mut slot = self.subscriber.lock().await;
        if let Some(subscriber) = slot.as_ref() {
            return Ok(subscriber.clone());
        }
        let transport = self
            .broker
            .clone()
            .ok_or_else(|| ClientError::Config("no broker configured".into()))?;
        let subscriber = Arc::new(TopicSubscriber::connect(transport).await?);
        *slot = Some(subscriber.clone());
        Ok(subscriber)
    }

    pub async fn subscribe<F>(&self, topics: &[Topic], callback: F) -> Result<(), ClientError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        Ok(self.subscriber().await?.subscribe(topics, callback).await?)
    }

    pub async fn unsubscribe(&self, topics: &[Topic]) -> Result<(), ClientError> {
        Ok(self.subscriber().await?.unsubscribe(topics).await?)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        debug!(stats = %self.stats, "client shutting down");
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.sync_handle.take() {
            handle.abort();
        }
    }
}
