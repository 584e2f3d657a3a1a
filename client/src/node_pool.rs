//! Node registry, health tracking and selection.
//!
//! The pool is the only owner of node health. Other components read
//! snapshots ([`Node`]) and report outcomes back through
//! [`NodePool::report_success`], [`NodePool::report_timeout`] and
//! [`NodePool::mark_unhealthy`]; every mutation goes through one lock.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use quorum_api::{NodeApi, NodeInfo};

use crate::error::ClientError;

// ---------------------------------------------------------------------------
// Node state
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeHealth {
    Healthy,
    Unhealthy(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolState {
    Ready,
    /// The last refresh found no healthy node; queries fail fast.
    Degraded,
}

struct NodeEntry {
    api: Arc<dyn NodeApi>,
    health: NodeHealth,
    height: Option<u32>,
    latency: Option<Duration>,
    strikes: u32,
    min_pow_score: Option<f64>,
}

/// A read-only snapshot of one node, handed out for dispatch.
#[derive(Clone)]
pub struct Node {
    pub api: Arc<dyn NodeApi>,
    pub latency: Option<Duration>,
    pub height: Option<u32>,
}

impl Node {
    pub fn url(&self) -> &str {
        self.api.url()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("url", &self.url())
            .field("latency", &self.latency)
            .field("height", &self.height)
            .finish()
    }
}

/// Diagnostic view of a node, healthy or not.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeStatus {
    pub url: String,
    pub health: NodeHealth,
    pub height: Option<u32>,
    pub latency: Option<Duration>,
    pub strikes: u32,
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

pub struct NodePool {
    entries: RwLock<Vec<NodeEntry>>,
    cursor: AtomicUsize,
    degraded: AtomicBool,
    timeout_strikes: u32,
    /// Without background sync nothing would restore a struck-out node, so
    /// timeouts are only counted.
    strike_out: bool,
}

/// Weight of a new latency sample in the running estimate, out of 4.
const LATENCY_SAMPLE_WEIGHT: u32 = 1;

fn blend_latency(previous: Option<Duration>, sample: Duration) -> Duration {
    match previous {
        Some(prev) => (prev * (4 - LATENCY_SAMPLE_WEIGHT) + sample * LATENCY_SAMPLE_WEIGHT) / 4,
        None => sample,
    }
}

impl NodePool {
    pub fn new(timeout_strikes: u32) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            degraded: AtomicBool::new(false),
            timeout_strikes: timeout_strikes.max(1),
            strike_out: true,
        }
    }

    /// A pool whose nodes stay healthy however often they time out. Used
    /// when node sync is disabled.
    pub fn without_strike_out(mut self) -> Self {
        self.strike_out = false;
        self
    }

    /// Register nodes as healthy. Nodes already present (same URL) are kept
    /// as they are.
    pub async fn add_nodes(&self, nodes: impl IntoIterator<Item = Arc<dyn NodeApi>>) {
        let mut entries = self.entries.write().await;
        for api in nodes {
            if entries.iter().any(|e| e.api.url() == api.url()) {
                continue;
            }
            debug!(node = %api.url(), "node added");
            entries.push(NodeEntry {
                api,
                health: NodeHealth::Healthy,
                height: None,
                latency: None,
                strikes: 0,
                min_pow_score: None,
            });
        }
        self.degraded.store(false, Ordering::Relaxed);
    }

    pub fn state(&self) -> PoolState {
        if self.degraded.load(Ordering::Relaxed) {
            PoolState::Degraded
        } else {
            PoolState::Ready
        }
    }

    /// Healthy nodes, lowest known latency first; nodes without a latency
    /// estimate follow in registration order.
    pub async fn list_healthy(&self) -> Vec<Node> {
        let entries = self.entries.read().await;
        let mut healthy: Vec<Node> = entries
            .iter()
            .filter(|e| e.health == NodeHealth::Healthy)
            .map(|e| Node {
                api: e.api.clone(),
                latency: e.latency,
                height: e.height,
            })
            .collect();
        healthy.sort_by_key(|n| (n.latency.is_none(), n.latency));
        healthy
    }

    /// Pick `count` healthy nodes: the fastest node first, the rest taken
    /// round-robin from the remaining healthy nodes.
    pub async fn select(&self, count: usize) -> Result<Vec<Node>, ClientError> {
        if self.state() == PoolState::Degraded {
            return Err(ClientError::NoHealthyNodes);
        }
        let mut healthy = self.list_healthy().await;
        if healthy.is_empty() {
            return Err(ClientError::NoHealthyNodes);
        }
        if healthy.len() < count {
            return Err(ClientError::InsufficientNodes {
                required: count,
                available: healthy.len(),
            });
        }
        let fastest = healthy.remove(0);
        let mut selected = Vec::with_capacity(count);
        selected.push(fastest);
        if !healthy.is_empty() {
            let start = self.cursor.fetch_add(1, Ordering::Relaxed) % healthy.len();
            selected.extend(
                healthy
                    .iter()
                    .cycle()
                    .skip(start)
                    .take(count.saturating_sub(1))
                    .cloned(),
            );
        }
        Ok(selected)
    }

    /// The node registered under `url`, healthy or not.
    pub async fn find(&self, url: &str) -> Option<Arc<dyn NodeApi>> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.api.url() == url)
            .map(|e| e.api.clone())
    }

    pub async fn mark_unhealthy(&self, url: &str, reason: impl Into<String>) {
        let reason = reason.into();
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.api.url() == url) {
            warn!(node = %url, %reason, "node marked unhealthy");
            entry.health = NodeHealth::Unhealthy(reason);
        }
    }

    /// Record a successful call and its round-trip time.
    pub async fn report_success(&self, url: &str, latency: Duration) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.api.url() == url) {
            entry.strikes = 0;
            entry.latency = Some(blend_latency(entry.latency, latency));
        }
    }

    /// Record a timeout (or other failure counted against the node). Returns
    /// whether the node has now been marked unhealthy.
    pub async fn report_timeout(&self, url: &str) -> bool {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.iter_mut().find(|e| e.api.url() == url) else {
            return false;
        };
        entry.strikes += 1;
        if self.strike_out
            && entry.strikes >= self.timeout_strikes
            && entry.health == NodeHealth::Healthy
        {
            warn!(node = %url, strikes = entry.strikes, "node marked unhealthy after repeated timeouts");
            entry.health = NodeHealth::Unhealthy(format!("{} consecutive timeouts", entry.strikes));
            return true;
        }
        false
    }

    /// Highest proof-of-work score any healthy node asked for at the last
    /// refresh.
    pub async fn min_pow_score(&self) -> Option<f64> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.health == NodeHealth::Healthy)
            .filter_map(|e| e.min_pow_score)
            .reduce(f64::max)
    }

    pub async fn statuses(&self) -> Vec<NodeStatus> {
        self.entries
            .read()
            .await
            .iter()
            .map(|e| NodeStatus {
                url: e.api.url().to_string(),
                health: e.health.clone(),
                height: e.height,
                latency: e.latency,
                strikes: e.strikes,
            })
            .collect()
    }

    /// Query every node (healthy or not), then keep only nodes that answered,
    /// report themselves healthy, run `network`, and sit within `tolerance`
    /// milestones of the median height.
    pub async fn refresh(&self, network: &str, tolerance: u32, timeout: Duration) -> PoolState {
        let apis: Vec<Arc<dyn NodeApi>> = self
            .entries
            .read()
            .await
            .iter()
            .map(|e| e.api.clone())
            .collect();

        let reports = join_all(apis.iter().map(|api| async move {
            let started = Instant::now();
            let result = match tokio::time::timeout(timeout, api.get_info()).await {
                Ok(Ok(info)) => Ok(info),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err("timed out".to_string()),
            };
            (api.url().to_string(), result, started.elapsed())
        }))
        .await;

        let verdicts = judge(&reports, network, tolerance);

        let mut entries = self.entries.write().await;
        for ((url, result, latency), verdict) in reports.iter().zip(verdicts) {
            let Some(entry) = entries.iter_mut().find(|e| e.api.url() == url.as_str()) else {
                continue;
            };
            if let Ok(info) = result {
                entry.height = Some(info.latest_milestone_index);
                entry.min_pow_score = Some(info.min_pow_score);
                entry.latency = Some(blend_latency(entry.latency, *latency));
            }
            if entry.health != verdict {
                match &verdict {
                    NodeHealth::Healthy => info!(node = %url, "node healthy again"),
                    NodeHealth::Unhealthy(reason) => warn!(node = %url, %reason, "node dropped at sync"),
                }
            }
            if verdict == NodeHealth::Healthy {
                entry.strikes = 0;
            }
            entry.health = verdict;
        }

        let healthy = entries
            .iter()
            .filter(|e| e.health == NodeHealth::Healthy)
            .count();
        self.degraded.store(healthy == 0, Ordering::Relaxed);
        if healthy == 0 {
            warn!("node sync found no healthy nodes; pool degraded");
            PoolState::Degraded
        } else {
            debug!(healthy, total = entries.len(), "node sync complete");
            PoolState::Ready
        }
    }
}

type SyncReport = (String, Result<NodeInfo, String>, Duration);

fn judge(reports: &[SyncReport], network: &str, tolerance: u32) -> Vec<NodeHealth> {
    let mut heights: Vec<u32> = reports
        .iter()
        .filter_map(|(_, result, _)| result.as_ref().ok())
        .filter(|info| info.is_healthy && info.network == network)
        .map(|info| info.latest_milestone_index)
        .collect();
    heights.sort_unstable();
    let median = heights.get(heights.len().saturating_sub(1) / 2).copied();

    reports
        .iter()
        .map(|(_, result, _)| match result {
            Err(e) => NodeHealth::Unhealthy(format!("unreachable: {e}")),
            Ok(info) if info.network != network => NodeHealth::Unhealthy(format!(
                "on network {:?}, expected {network:?}",
                info.network
            )),
            Ok(info) if !info.is_healthy => NodeHealth::Unhealthy("reports itself unhealthy".into()),
            Ok(info) => match median {
                Some(m) if info.latest_milestone_index.abs_diff(m) > tolerance => {
                    NodeHealth::Unhealthy(format!(
                        "milestone {} is more than {tolerance} from median {m}",
                        info.latest_milestone_index
                    ))
                }
                _ => NodeHealth::Healthy,
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_nullables::{NodeMode, NullLedger, NullNode};

    async fn pool_of(nodes: Vec<NullNode>) -> (NodePool, Vec<Arc<NullNode>>) {
        let nodes: Vec<Arc<NullNode>> = nodes.into_iter().map(Arc::new).collect();
        let pool = NodePool::new(3);
        let apis: Vec<Arc<dyn NodeApi>> = nodes.iter().map(|n| n.clone() as Arc<dyn NodeApi>).collect();
        pool.add_nodes(apis).await;
        (pool, nodes)
    }

    fn node(url: &str, milestone: u32) -> NullNode {
        NullNode::new(url, NullLedger::new()).with_milestone(milestone)
    }

    #[tokio::test]
    async fn add_nodes_deduplicates_by_url() {
        let (pool, nodes) = pool_of(vec![node("http://a", 0), node("http://b", 0)]).await;
        pool.add_nodes([nodes[0].clone() as Arc<dyn NodeApi>]).await;
        assert_eq!(pool.list_healthy().await.len(), 2);
    }

    #[tokio::test]
    async fn refresh_drops_nodes_far_from_median() {
        let (pool, _) = pool_of(vec![
            node("http://a", 100),
            node("http://b", 101),
            node("http://c", 99),
            node("http://lagging", 90),
        ])
        .await;
        let state = pool.refresh("devnet", 2, Duration::from_secs(1)).await;
        assert_eq!(state, PoolState::Ready);

        let healthy: Vec<String> = pool
            .list_healthy()
            .await
            .iter()
            .map(|n| n.url().to_string())
            .collect();
        assert_eq!(healthy.len(), 3);
        assert!(!healthy.contains(&"http://lagging".to_string()));
    }

    #[tokio::test]
    async fn refresh_drops_wrong_network_and_unreachable() {
        let (pool, _) = pool_of(vec![
            node("http://a", 5),
            node("http://main", 5).with_network("mainnet"),
            node("http://down", 5).with_mode(NodeMode::Offline),
            node("http://sick", 5).with_health(false),
        ])
        .await;
        pool.refresh("devnet", 2, Duration::from_secs(1)).await;
        let statuses = pool.statuses().await;
        let healthy: Vec<&str> = statuses
            .iter()
            .filter(|s| s.health == NodeHealth::Healthy)
            .map(|s| s.url.as_str())
            .collect();
        assert_eq!(healthy, vec!["http://a"]);
    }

    #[tokio::test]
    async fn degraded_pool_fails_fast() {
        let (pool, nodes) = pool_of(vec![node("http://a", 1).with_mode(NodeMode::Offline)]).await;
        assert_eq!(
            pool.refresh("devnet", 2, Duration::from_secs(1)).await,
            PoolState::Degraded
        );
        assert!(matches!(pool.select(1).await, Err(ClientError::NoHealthyNodes)));

        nodes[0].set_mode(NodeMode::Honest);
        assert_eq!(
            pool.refresh("devnet", 2, Duration::from_secs(1)).await,
            PoolState::Ready
        );
        assert_eq!(pool.select(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn hanging_node_is_dropped_at_refresh() {
        let (pool, _) = pool_of(vec![
            node("http://a", 1),
            node("http://hang", 1).with_mode(NodeMode::Hanging),
        ])
        .await;
        pool.refresh("devnet", 2, Duration::from_millis(50)).await;
        assert_eq!(pool.list_healthy().await.len(), 1);
    }

    #[tokio::test]
    async fn timeouts_strike_out_a_node() {
        let (pool, _) = pool_of(vec![node("http://a", 0), node("http://b", 0)]).await;
        assert!(!pool.report_timeout("http://a").await);
        assert!(!pool.report_timeout("http://a").await);
        pool.report_success("http://a", Duration::from_millis(5)).await;
        assert!(!pool.report_timeout("http://a").await);
        assert!(!pool.report_timeout("http://a").await);
        assert!(pool.report_timeout("http://a").await);
        let healthy = pool.list_healthy().await;
        assert_eq!(healthy.len(), 1);
        assert_eq!(healthy[0].url(), "http://b");
    }

    #[tokio::test]
    async fn without_strike_out_timeouts_never_exclude() {
        let (pool, _) = pool_of(vec![node("http://a", 0), node("http://b", 0)]).await;
        let pool = pool.without_strike_out();
        for _ in 0..5 {
            assert!(!pool.report_timeout("http://a").await);
        }
        assert_eq!(pool.list_healthy().await.len(), 2);
        assert!(pool.select(2).await.is_ok());
    }

    #[tokio::test]
    async fn select_prefers_fastest_and_rotates_the_rest() {
        let (pool, _) = pool_of(vec![
            node("http://slow", 0),
            node("http://fast", 0),
            node("http://mid", 0),
            node("http://other", 0),
        ])
        .await;
        pool.report_success("http://slow", Duration::from_millis(90)).await;
        pool.report_success("http://fast", Duration::from_millis(5)).await;
        pool.report_success("http://mid", Duration::from_millis(40)).await;

        let first = pool.select(2).await.unwrap();
        let second = pool.select(2).await.unwrap();
        assert_eq!(first[0].url(), "http://fast");
        assert_eq!(second[0].url(), "http://fast");
        assert_ne!(first[1].url(), second[1].url());
    }

    #[tokio::test]
    async fn select_never_returns_unhealthy_or_too_few() {
        let (pool, _) = pool_of(vec![node("http://a", 0), node("http://b", 0)]).await;
        pool.mark_unhealthy("http://b", "test").await;
        let selected = pool.select(1).await.unwrap();
        assert_eq!(selected[0].url(), "http://a");
        assert!(matches!(
            pool.select(2).await,
            Err(ClientError::InsufficientNodes {
                required: 2,
                available: 1
            })
        ));
    }
}
