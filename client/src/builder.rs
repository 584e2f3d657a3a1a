//! Chained construction of a [`Client`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use quorum_api::{Api, HttpNode, NodeApi};
use quorum_pubsub::{BrokerTransport, WsBroker};
use quorum_utils::{try_init_logging, LogFormat, StatsCounter};

use crate::client::Client;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::node_pool::{NodePool, PoolState};
use crate::pow::PowEngine;
use crate::quorum::{QuorumResolver, STATS};
use crate::sync::{spawn_sync_task, SyncSettings};

/// Collects settings and validates them all at once in [`finish`](Self::finish).
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    node_apis: Vec<Arc<dyn NodeApi>>,
    broker: Option<Arc<dyn BrokerTransport>>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, ClientError> {
        Ok(Self::from_config(ClientConfig::from_toml_str(toml)?))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        Ok(Self::from_config(ClientConfig::from_toml_file(path)?))
    }

    pub fn with_node(mut self, url: &str) -> Self {
        self.config.nodes.push(url.to_string());
        self
    }

    pub fn with_nodes(mut self, urls: &[&str]) -> Self {
        self.config.nodes.extend(urls.iter().map(|u| u.to_string()));
        self
    }

    /// Use a ready-made node implementation instead of HTTP for its URL.
    pub fn with_node_api(mut self, api: Arc<dyn NodeApi>) -> Self {
        self.config.nodes.push(api.url().to_string());
        self.node_apis.push(api);
        self
    }

    pub fn with_network(mut self, network: &str) -> Self {
        self.config.network = network.to_string();
        self
    }

    pub fn with_quorum_size(mut self, size: usize) -> Self {
        self.config.quorum_size = size;
        self
    }

    /// Fraction of answers that must agree. Agreement ratios are rounded to
    /// whole percent before comparison, so 2 of 3 meets anything up to 0.67
    /// (and 0.674, which also rounds to 67%).
    pub fn with_quorum_threshold(mut self, threshold: f64) -> Self {
        self.config.quorum_threshold = threshold;
        self
    }

    /// Treat every configured node as healthy without checking. Timeouts
    /// are still counted but never take a node out of rotation.
    pub fn with_node_sync_disabled(mut self) -> Self {
        self.config.node_sync_enabled = false;
        self
    }

    pub fn with_node_sync_interval(mut self, interval: Duration) -> Self {
        self.config.node_sync_interval_secs = interval.as_secs();
        self
    }

    pub fn with_sync_height_tolerance(mut self, tolerance: u32) -> Self {
        self.config.sync_height_tolerance = tolerance;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_api_timeout(mut self, api: Api, timeout: Duration) -> Self {
        self.config
            .api_timeouts_ms
            .insert(api.as_str().to_string(), timeout.as_millis() as u64);
        self
    }

    pub fn with_timeout_strikes(mut self, strikes: u32) -> Self {
        self.config.timeout_strikes = strikes;
        self
    }

    pub fn with_local_pow(mut self, local: bool) -> Self {
        self.config.local_pow = local;
        self
    }

    pub fn with_pow_timeout(mut self, timeout: Duration) -> Self {
        self.config.pow_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_pow_max_iterations(mut self, iterations: u64) -> Self {
        self.config.pow_max_iterations = Some(iterations);
        self
    }

    pub fn with_min_pow_score(mut self, score: f64) -> Self {
        self.config.min_pow_score = score;
        self
    }

    pub fn with_gap_limit(mut self, gap_limit: u32) -> Self {
        self.config.gap_limit = gap_limit;
        self
    }

    pub fn with_broker_url(mut self, url: &str) -> Self {
        self.config.broker_url = Some(url.to_string());
        self
    }

    pub fn with_broker(mut self, broker: Arc<dyn BrokerTransport>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Install a global tracing subscriber when the client is built.
    pub fn with_logging(mut self, format: LogFormat, level: &str) -> Self {
        self.config.log_format = match format {
            LogFormat::Human => "human".into(),
            LogFormat::Json => "json".into(),
        };
        self.config.log_level = Some(level.to_string());
        self
    }

    /// Validate, connect the node pool, run the first sync and start the
    /// background sync task. Nothing touches the network before validation.
    pub async fn finish(self) -> Result<Client, ClientError> {
        let Self {
            config,
            node_apis,
            broker,
        } = self;
        config.validate()?;
        if let Some(level) = &config.log_level {
            let format = config
                .log_format
                .parse::<LogFormat>()
                .map_err(|e| ClientError::Config(e.to_string()))?;
            if let Err(e) = try_init_logging(format, level) {
                debug!(error = %e, "keeping the existing tracing subscriber");
            }
        }
        let config = Arc::new(config);

        let mut apis: Vec<Arc<dyn NodeApi>> = Vec::with_capacity(config.nodes.len());
        for url in &config.nodes {
            match node_apis.iter().find(|api| api.url() == url.as_str()) {
                Some(api) => apis.push(api.clone()),
                None => apis.push(Arc::new(HttpNode::new(url.as_str(), config.longest_timeout())?)),
            }
        }
        let pool = NodePool::new(config.timeout_strikes);
        let pool = Arc::new(if config.node_sync_enabled {
            pool
        } else {
            pool.without_strike_out()
        });
        pool.add_nodes(apis).await;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let sync_handle = if config.node_sync_enabled {
            let settings = SyncSettings {
                network: config.network.clone(),
                tolerance: config.sync_height_tolerance,
                timeout: config.timeout_for(Api::GetInfo),
                interval: config.node_sync_interval(),
            };
            let state = pool
                .refresh(&settings.network, settings.tolerance, settings.timeout)
                .await;
            if state == PoolState::Degraded {
                warn!("initial node sync found no healthy node");
            }
            Some(spawn_sync_task(pool.clone(), settings, shutdown_rx))
        } else {
            None
        };

        let stats = Arc::new(StatsCounter::new(STATS));
        let resolver = Arc::new(QuorumResolver::new(
            pool.clone(),
            config.clone(),
            stats.clone(),
        ));
        let pow = PowEngine::new(resolver.clone(), config.local_pow, config.pow_budget());
        let broker = broker.or_else(|| {
            config
                .broker_url
                .as_deref()
                .map(|url| Arc::new(WsBroker::new(url)) as Arc<dyn BrokerTransport>)
        });

        info!(
            nodes = config.nodes.len(),
            quorum_size = config.quorum_size,
            network = %config.network,
            "client ready"
        );
        Ok(Client::new(
            config,
            pool,
            resolver,
            pow,
            stats,
            broker,
            shutdown_tx,
            sync_handle,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_node_list_is_rejected_before_any_io() {
        let err = ClientBuilder::new().finish().await.err().unwrap();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[tokio::test]
    async fn quorum_larger_than_node_list_is_rejected() {
        let result = ClientBuilder::new()
            .with_nodes(&["http://a:1", "http://b:1"])
            .with_quorum_size(3)
            .finish()
            .await;
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[tokio::test]
    async fn toml_builder_without_sync_needs_no_network() {
        let client = ClientBuilder::from_toml_str(
            r#"
nodes = ["http://127.0.0.1:1", "http://127.0.0.1:2"]
quorum_size = 2
node_sync_enabled = false
"#,
        )
        .unwrap()
        .with_api_timeout(Api::GetOutput, Duration::from_millis(250))
        .finish()
        .await
        .unwrap();
        assert_eq!(client.nodes().await.len(), 2);
        assert_eq!(
            client.config().timeout_for(Api::GetOutput),
            Duration::from_millis(250)
        );
    }

    #[tokio::test]
    async fn logging_can_be_requested_twice() {
        for _ in 0..2 {
            ClientBuilder::new()
                .with_node("http://127.0.0.1:1")
                .with_node_sync_disabled()
                .with_logging(LogFormat::Json, "warn")
                .finish()
                .await
                .unwrap();
        }
    }

    #[test]
    fn unknown_log_format_is_a_config_error() {
        let config = ClientConfig {
            nodes: vec!["http://a:1".into()],
            log_format: "xml".into(),
            ..ClientConfig::default()
        };
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));
    }
}
