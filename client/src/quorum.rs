//! Quorum resolution: fan a query out to several nodes and accept a value
//! only when enough of the responding nodes agree on it.
//!
//! Responses are grouped by exact equality. A "not found" answer is a response
//! like any other, so nodes can agree that something does not exist. The
//! decision is re-evaluated after every response; the resolver returns as soon
//! as the outcome can no longer change, dropping (and so cancelling) the calls
//! still in flight.

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, warn};

use quorum_api::{Api, ApiError, NodeApi};
use quorum_utils::StatsCounter;

use crate::config::{ClientConfig, QuorumConfig};
use crate::error::{ClientError, Disagreement, NodeFailure, ValueGroup};
use crate::node_pool::NodePool;

pub(crate) const STATS: &[&str] = &[
    "quorum_reached",
    "quorum_failed",
    "node_timeouts",
    "malformed_responses",
    "broadcasts",
];

/// An accepted value and the nodes that vouched for it.
#[derive(Clone, Debug, PartialEq)]
pub struct QuorumResult<T> {
    pub value: T,
    /// Nodes in the winning group.
    pub nodes: Vec<String>,
    pub responded: usize,
    pub queried: usize,
}

struct Group<T> {
    value: Option<T>,
    nodes: Vec<String>,
    latency: Duration,
}

enum Decision {
    Accept(usize),
    Reject,
    Wait,
}

/// Index of the best group: most members, then lowest aggregate latency.
fn best_group<T>(groups: &[Group<T>]) -> Option<usize> {
    (0..groups.len()).min_by_key(|&i| (std::cmp::Reverse(groups[i].nodes.len()), groups[i].latency))
}

/// Decide given the groups so far and `pending` calls in flight. Early
/// answers are only given when no combination of the pending responses could
/// change them.
fn decide<T>(quorum: &QuorumConfig, groups: &[Group<T>], pending: usize) -> Decision {
    let received: usize = groups.iter().map(|g| g.nodes.len()).sum();
    let enough = quorum.min_responses();
    if received + pending < enough {
        return Decision::Reject;
    }
    let Some(best) = best_group(groups) else {
        return if pending == 0 {
            Decision::Reject
        } else {
            Decision::Wait
        };
    };
    let best_size = groups[best].nodes.len();
    let runner_up = groups
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != best)
        .map(|(_, g)| g.nodes.len())
        .max()
        .unwrap_or(0);

    if pending == 0 {
        return if received >= enough && best_size >= quorum.required(received) {
            Decision::Accept(best)
        } else {
            Decision::Reject
        };
    }

    if received >= enough
        && best_size >= quorum.required(received + pending)
        && best_size > runner_up + pending
    {
        return Decision::Accept(best);
    }
    if best_size + pending < quorum.required(received) {
        return Decision::Reject;
    }
    Decision::Wait
}

/// The first acceptable answer of a sequential fallback, plus the nodes
/// tried before it.
#[derive(Debug)]
pub struct FirstAnswer<T> {
    pub value: T,
    pub node: String,
    pub skipped: Vec<NodeFailure>,
}

pub struct QuorumResolver {
    pool: Arc<NodePool>,
    config: Arc<ClientConfig>,
    stats: Arc<StatsCounter>,
}

impl QuorumResolver {
    pub fn new(pool: Arc<NodePool>, config: Arc<ClientConfig>, stats: Arc<StatsCounter>) -> Self {
        Self {
            pool,
            config,
            stats,
        }
    }

    pub fn quorum(&self) -> QuorumConfig {
        self.config.quorum()
    }

    pub fn pool(&self) -> &Arc<NodePool> {
        &self.pool
    }

    /// Resolve a read. Agreement that the item does not exist is returned as
    /// `ClientError::Api(ApiError::NotFound)`.
    pub async fn resolve<T, F, Fut>(&self, api: Api, call: F) -> Result<QuorumResult<T>, ClientError>
    where
        T: PartialEq + Debug,
        F: Fn(Arc<dyn NodeApi>) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let QuorumResult {
            value,
            nodes,
            responded,
            queried,
        } = self.resolve_optional(api, call).await?;
        match value {
            Some(value) => Ok(QuorumResult {
                value,
                nodes,
                responded,
                queried,
            }),
            None => Err(ClientError::Api(ApiError::NotFound(format!(
                "{api}: {} nodes agree the item does not exist",
                nodes.len()
            )))),
        }
    }

    /// Resolve a read where agreed absence is a valid answer (`None`).
    pub async fn resolve_optional<T, F, Fut>(
        &self,
        api: Api,
        call: F,
    ) -> Result<QuorumResult<Option<T>>, ClientError>
    where
        T: PartialEq + Debug,
        F: Fn(Arc<dyn NodeApi>) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let quorum = self.config.quorum();
        let nodes = self.pool.select(quorum.size).await?;
        let timeout = self.config.timeout_for(api);
        let queried = nodes.len();

        let mut pending: FuturesUnordered<_> = nodes
            .into_iter()
            .map(|node| {
                let call = call(node.api.clone());
                async move {
                    let started = Instant::now();
                    let result = tokio::time::timeout(timeout, call).await;
                    (node.url().to_string(), result, started.elapsed())
                }
            })
            .collect();

        let mut groups: Vec<Group<T>> = Vec::new();
        let mut failures: Vec<NodeFailure> = Vec::new();

        while let Some((url, result, elapsed)) = pending.next().await {
            let value = match result {
                Ok(Ok(value)) => Some(value),
                Ok(Err(ApiError::NotFound(_))) => None,
                Ok(Err(error)) => {
                    self.record_failure(&url, &error).await;
                    failures.push(NodeFailure { node: url, error });
                    if let Decision::Reject = decide(&quorum, &groups, pending.len()) {
                        break;
                    }
                    continue;
                }
                Err(_) => {
                    let error = ApiError::Timeout(format!("no response within {timeout:?}"));
                    self.record_failure(&url, &error).await;
                    failures.push(NodeFailure { node: url, error });
                    if let Decision::Reject = decide(&quorum, &groups, pending.len()) {
                        break;
                    }
                    continue;
                }
            };

            self.pool.report_success(&url, elapsed).await;
            match groups.iter_mut().find(|g| g.value == value) {
                Some(group) => {
                    group.nodes.push(url);
                    group.latency += elapsed;
                }
                None => groups.push(Group {
                    value,
                    nodes: vec![url],
                    latency: elapsed,
                }),
            }

            match decide(&quorum, &groups, pending.len()) {
                Decision::Accept(index) => return Ok(self.accept(api, groups, index, queried)),
                Decision::Reject => break,
                Decision::Wait => {}
            }
        }

        // Either every call finished or the outcome was settled early.
        if pending.is_empty() {
            if let Decision::Accept(index) = decide(&quorum, &groups, 0) {
                return Ok(self.accept(api, groups, index, queried));
            }
        }
        Err(self.reject(api, &quorum, groups, failures, queried))
    }

    /// Send a write to a quorum of nodes at once and return the first
    /// acceptance with the accepting node. Answers that arrive later are
    /// drained in the background, where rejections are only logged.
    pub async fn broadcast<T, F, Fut>(&self, api: Api, call: F) -> Result<(T, String), ClientError>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn NodeApi>) -> Fut,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        self.stats.increment("broadcasts");
        let nodes = self.pool.select(self.config.quorum().size).await?;
        let timeout = self.config.timeout_for(api);

        let mut pending: FuturesUnordered<_> = nodes
            .into_iter()
            .map(|node| {
                let url = node.url().to_string();
                let call = call(node.api);
                async move {
                    let started = Instant::now();
                    let result = match tokio::time::timeout(timeout, call).await {
                        Ok(result) => result,
                        Err(_) => Err(ApiError::Timeout(format!("no response within {timeout:?}"))),
                    };
                    (url, result, started.elapsed())
                }
            })
            .collect();

        let mut failures = Vec::new();
        while let Some((url, result, elapsed)) = pending.next().await {
            match result {
                Ok(value) => {
                    self.pool.report_success(&url, elapsed).await;
                    debug!(api = %api, node = %url, "accepted");
                    if !pending.is_empty() {
                        let pool = self.pool.clone();
                        tokio::spawn(async move {
                            while let Some((url, result, elapsed)) = pending.next().await {
                                match result {
                                    Ok(_) => pool.report_success(&url, elapsed).await,
                                    Err(error) => {
                                        if error.is_timeout() {
                                            pool.report_timeout(&url).await;
                                        }
                                        warn!(api = %api, node = %url, %error, "late rejection");
                                    }
                                }
                            }
                        });
                    }
                    return Ok((value, url));
                }
                Err(error) => {
                    self.record_failure(&url, &error).await;
                    warn!(api = %api, node = %url, %error, "rejected");
                    failures.push(NodeFailure { node: url, error });
                }
            }
        }
        Err(ClientError::SubmissionRejected { failures })
    }

    /// Ask healthy nodes one at a time, fastest first, until one returns an
    /// answer `accept` approves. On failure the error lists every node tried;
    /// an empty list means no node was healthy.
    pub async fn first_ok<T, F, Fut, V>(
        &self,
        api: Api,
        call: F,
        accept: V,
    ) -> Result<FirstAnswer<T>, Vec<NodeFailure>>
    where
        F: Fn(Arc<dyn NodeApi>) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
        V: Fn(&T) -> Result<(), String>,
    {
        let timeout = self.config.timeout_for(api);
        let mut failures = Vec::new();
        for node in self.pool.list_healthy().await {
            let url = node.url().to_string();
            let started = Instant::now();
            let result = match tokio::time::timeout(timeout, call(node.api)).await {
                Ok(result) => result,
                Err(_) => Err(ApiError::Timeout(format!("no response within {timeout:?}"))),
            };
            match result.and_then(|value| match accept(&value) {
                Ok(()) => Ok(value),
                Err(reason) => Err(ApiError::Rejected(reason)),
            }) {
                Ok(value) => {
                    self.pool.report_success(&url, started.elapsed()).await;
                    return Ok(FirstAnswer {
                        value,
                        node: url,
                        skipped: failures,
                    });
                }
                Err(error) => {
                    self.record_failure(&url, &error).await;
                    failures.push(NodeFailure { node: url, error });
                }
            }
        }
        Err(failures)
    }

    async fn record_failure(&self, url: &str, error: &ApiError) {
        match error {
            ApiError::Timeout(_) => {
                self.stats.increment("node_timeouts");
                self.pool.report_timeout(url).await;
            }
            ApiError::Malformed(_) => {
                self.stats.increment("malformed_responses");
                self.pool.report_timeout(url).await;
            }
            _ => {}
        }
        debug!(node = %url, %error, "node excluded from quorum");
    }

    fn accept<T>(&self, api: Api, mut groups: Vec<Group<T>>, index: usize, queried: usize) -> QuorumResult<Option<T>> {
        self.stats.increment("quorum_reached");
        let responded = groups.iter().map(|g| g.nodes.len()).sum();
        let winner = groups.swap_remove(index);
        debug!(api = %api, agreeing = winner.nodes.len(), responded, queried, "quorum reached");
        QuorumResult {
            value: winner.value,
            nodes: winner.nodes,
            responded,
            queried,
        }
    }

    fn reject<T: Debug>(
        &self,
        api: Api,
        quorum: &QuorumConfig,
        mut groups: Vec<Group<T>>,
        failures: Vec<NodeFailure>,
        queried: usize,
    ) -> ClientError {
        self.stats.increment("quorum_failed");
        let responded: usize = groups.iter().map(|g| g.nodes.len()).sum();
        groups.sort_by_key(|g| (std::cmp::Reverse(g.nodes.len()), g.latency));
        let disagreement = Disagreement {
            api,
            queried,
            responded,
            required: quorum.required(responded),
            groups: groups
                .into_iter()
                .map(|g| ValueGroup {
                    value: match &g.value {
                        Some(v) => format!("{v:?}"),
                        None => "not found".to_string(),
                    },
                    nodes: g.nodes,
                    latency_ms: g.latency.as_millis() as u64,
                })
                .collect(),
            failures,
        };
        warn!(api = %api, responded, queried, "quorum not reached");
        ClientError::QuorumNotReached(Box::new(disagreement))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_nullables::{NodeMode, NullLedger, NullNode};
    use quorum_types::Address;

    const ADDRESS: Address = Address::new([7; 32]);

    struct Fixture {
        resolver: QuorumResolver,
        nodes: Vec<Arc<NullNode>>,
        stats: Arc<StatsCounter>,
    }

    async fn fixture(nodes: Vec<NullNode>, threshold: f64, timeouts: &[(&str, u64)]) -> Fixture {
        let nodes: Vec<Arc<NullNode>> = nodes.into_iter().map(Arc::new).collect();
        let mut config = ClientConfig {
            nodes: nodes.iter().map(|n| n.url().to_string()).collect(),
            quorum_size: nodes.len(),
            quorum_threshold: threshold,
            timeout_strikes: 1,
            ..ClientConfig::default()
        };
        for (api, ms) in timeouts {
            config.api_timeouts_ms.insert(api.to_string(), *ms);
        }
        let pool = Arc::new(NodePool::new(config.timeout_strikes));
        pool.add_nodes(nodes.iter().map(|n| n.clone() as Arc<dyn NodeApi>))
            .await;
        let stats = Arc::new(StatsCounter::new(STATS));
        Fixture {
            resolver: QuorumResolver::new(pool, Arc::new(config), stats.clone()),
            nodes,
            stats,
        }
    }

    fn group(value: u64, members: usize, latency_ms: u64) -> Group<u64> {
        Group {
            value: Some(value),
            nodes: (0..members).map(|i| format!("http://{value}-{i}")).collect(),
            latency: Duration::from_millis(latency_ms),
        }
    }

    #[test]
    fn decide_waits_while_pending_answers_could_flip_the_result() {
        let quorum = QuorumConfig {
            size: 5,
            threshold: 0.6,
        };
        // 2 vs 1 with 2 pending: the runner-up could still catch up.
        let groups = [group(1, 2, 10), group(2, 1, 10)];
        assert!(matches!(decide(&quorum, &groups, 2), Decision::Wait));
        // 3 vs 1 with 1 pending: 3 of 5 already meets 60%.
        let groups = [group(1, 3, 10), group(2, 1, 10)];
        assert!(matches!(decide(&quorum, &groups, 1), Decision::Accept(0)));
        // Five singletons can never reach 3 of 5.
        let groups: Vec<_> = (0..4).map(|v| group(v, 1, 10)).collect();
        assert!(matches!(decide(&quorum, &groups, 1), Decision::Reject));
    }

    #[test]
    fn decide_needs_half_the_quorum_to_answer() {
        let quorum = QuorumConfig {
            size: 4,
            threshold: 0.5,
        };
        assert!(matches!(decide(&quorum, &[group(1, 1, 5)], 0), Decision::Reject));
        assert!(matches!(decide::<u64>(&quorum, &[], 1), Decision::Reject));
        assert!(matches!(decide(&quorum, &[group(1, 2, 5)], 0), Decision::Accept(0)));
    }

    #[test]
    fn equal_groups_are_ranked_by_latency() {
        let groups = [group(1, 2, 90), group(2, 2, 30), group(3, 1, 1)];
        assert_eq!(best_group(&groups), Some(1));
        assert_eq!(best_group::<u64>(&[]), None);
    }

    fn node(url: &str, balance: u64) -> NullNode {
        NullNode::new(url, NullLedger::new()).with_balance(ADDRESS, balance)
    }

    async fn balance(f: &Fixture) -> Result<QuorumResult<u64>, ClientError> {
        f.resolver
            .resolve(Api::GetBalance, |node| async move {
                node.get_address_balance(&ADDRESS).await.map(|b| b.balance)
            })
            .await
    }

    #[tokio::test]
    async fn two_of_three_agree() {
        let f = fixture(
            vec![node("http://a", 50), node("http://b", 50), node("http://c", 60)],
            0.66,
            &[],
        )
        .await;
        let result = balance(&f).await.unwrap();
        assert_eq!(result.value, 50);
        assert_eq!(result.nodes.len(), 2);
        assert_eq!(f.stats.get("quorum_reached"), 1);
    }

    #[tokio::test]
    async fn three_different_answers_fail() {
        let f = fixture(
            vec![node("http://a", 50), node("http://b", 60), node("http://c", 70)],
            0.66,
            &[],
        )
        .await;
        match balance(&f).await {
            Err(ClientError::QuorumNotReached(d)) => {
                assert_eq!(d.api, Api::GetBalance);
                assert_eq!(d.responded, 3);
                assert_eq!(d.groups.len(), 3);
                assert!(d.groups.iter().all(|g| g.nodes.len() == 1));
            }
            other => panic!("expected QuorumNotReached, got {other:?}"),
        }
        assert_eq!(f.stats.get("quorum_failed"), 1);
    }

    #[tokio::test]
    async fn agreement_is_measured_against_responders() {
        let f = fixture(
            vec![
                node("http://a", 50),
                node("http://b", 50),
                node("http://c", 50).with_mode(NodeMode::Offline),
            ],
            0.66,
            &[],
        )
        .await;
        let result = balance(&f).await.unwrap();
        assert_eq!((result.value, result.responded, result.queried), (50, 2, 3));
    }

    #[tokio::test]
    async fn too_few_responses_fail() {
        let f = fixture(
            vec![
                node("http://a", 50),
                node("http://b", 50).with_mode(NodeMode::Offline),
                node("http://c", 50).with_mode(NodeMode::Malformed),
            ],
            0.5,
            &[],
        )
        .await;
        match balance(&f).await {
            Err(ClientError::QuorumNotReached(d)) => {
                assert!(d.responded <= 1);
                assert_eq!(d.failures.len(), 2);
            }
            other => panic!("expected QuorumNotReached, got {other:?}"),
        }
        assert_eq!(f.stats.get("malformed_responses"), 1);
    }

    #[tokio::test]
    async fn decides_without_waiting_for_a_hanging_node() {
        let f = fixture(
            vec![
                node("http://a", 50),
                node("http://b", 50),
                node("http://c", 50).with_mode(NodeMode::Hanging),
            ],
            0.66,
            &[],
        )
        .await;
        let result = tokio::time::timeout(Duration::from_secs(5), balance(&f))
            .await
            .expect("resolver waited for the hanging node")
            .unwrap();
        assert_eq!(result.value, 50);
        assert_eq!(f.stats.get("node_timeouts"), 0);
    }

    #[tokio::test]
    async fn timeout_strikes_mark_node_unhealthy() {
        let f = fixture(
            vec![
                node("http://a", 50),
                node("http://b", 60),
                node("http://c", 50).with_mode(NodeMode::Hanging),
            ],
            0.66,
            &[("get_balance", 50)],
        )
        .await;
        let result = balance(&f).await;
        assert!(matches!(result, Err(ClientError::QuorumNotReached(_))));
        assert_eq!(f.stats.get("node_timeouts"), 1);
        let healthy: Vec<_> = f
            .resolver
            .pool()
            .list_healthy()
            .await
            .iter()
            .map(|n| n.url().to_string())
            .collect();
        assert!(!healthy.contains(&"http://c".to_string()));
    }

    #[tokio::test]
    async fn tie_goes_to_the_faster_group() {
        let f = fixture(
            vec![
                node("http://slow", 60).with_latency(Duration::from_millis(40)),
                node("http://fast", 50),
            ],
            0.5,
            &[],
        )
        .await;
        assert_eq!(balance(&f).await.unwrap().value, 50);
    }

    #[tokio::test]
    async fn agreed_absence() {
        let f = fixture(
            vec![node("http://a", 0), node("http://b", 0), node("http://c", 0)],
            0.66,
            &[],
        )
        .await;
        let missing = quorum_types::MessageId::new([1; 32]);
        let result = f
            .resolver
            .resolve_optional(Api::GetMessage, |node| async move {
                node.get_message(&missing).await
            })
            .await
            .unwrap();
        assert_eq!(result.value, None);
        // Two matching answers already decide a quorum of three.
        assert!((2..=3).contains(&result.nodes.len()), "{:?}", result.nodes);

        let err = f
            .resolver
            .resolve(Api::GetMessage, |node| async move {
                node.get_message(&missing).await
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Api(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn broadcast_returns_first_acceptance() {
        let f = fixture(
            vec![
                node("http://a", 0).with_mode(NodeMode::Offline),
                node("http://b", 0),
            ],
            0.5,
            &[],
        )
        .await;
        let (value, url) = f
            .resolver
            .broadcast(Api::GetTips, |node| async move { node.get_tips().await })
            .await
            .unwrap();
        assert_eq!(value.len(), 1);
        assert_eq!(url, "http://b");
    }

    #[tokio::test]
    async fn broadcast_collects_every_rejection() {
        let f = fixture(
            vec![
                node("http://a", 0).with_mode(NodeMode::Offline),
                node("http://b", 0).with_mode(NodeMode::Offline),
            ],
            0.5,
            &[],
        )
        .await;
        match f
            .resolver
            .broadcast(Api::GetTips, |node| async move { node.get_tips().await })
            .await
        {
            Err(ClientError::SubmissionRejected { failures }) => assert_eq!(failures.len(), 2),
            other => panic!("expected SubmissionRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn first_ok_skips_failing_and_unacceptable_answers() {
        let f = fixture(
            vec![
                node("http://a", 1).with_mode(NodeMode::Offline),
                node("http://b", 2),
                node("http://c", 3),
            ],
            0.5,
            &[],
        )
        .await;
        let answer = f
            .resolver
            .first_ok(
                Api::GetBalance,
                |node| async move { node.get_address_balance(&ADDRESS).await.map(|b| b.balance) },
                |&balance| {
                    if balance == 3 {
                        Ok(())
                    } else {
                        Err(format!("balance {balance} refused"))
                    }
                },
            )
            .await
            .unwrap();
        assert_eq!((answer.value, answer.node.as_str()), (3, "http://c"));
        assert_eq!(f.nodes[1].call_count("get_address_balance"), 1);
        let skipped: Vec<_> = answer.skipped.iter().map(|f| f.node.as_str()).collect();
        assert_eq!(skipped, ["http://a", "http://b"]);
        assert!(matches!(answer.skipped[1].error, ApiError::Rejected(_)));
    }
}
