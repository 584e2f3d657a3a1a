//! Client configuration with TOML file support.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use quorum_api::Api;
use quorum_utils::LogFormat;
use quorum_work::WorkBudget;

use crate::error::ClientError;

/// Configuration for a [`Client`](crate::Client).
///
/// Can be loaded from a TOML file via [`ClientConfig::from_toml_file`] or
/// assembled with [`ClientBuilder`](crate::ClientBuilder).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Node endpoint URLs.
    #[serde(default)]
    pub nodes: Vec<String>,

    /// Expected network name. Nodes reporting another network are dropped
    /// at sync.
    #[serde(default = "default_network")]
    pub network: String,

    /// Nodes asked per quorum query.
    #[serde(default = "default_quorum_size")]
    pub quorum_size: usize,

    /// Fraction of responding nodes that must agree, in (0, 1]. Compared
    /// at whole-percent precision: 0.674 and 0.67 behave the same.
    #[serde(default = "default_quorum_threshold")]
    pub quorum_threshold: f64,

    /// Whether nodes are health-checked and synced in the background.
    #[serde(default = "default_true")]
    pub node_sync_enabled: bool,

    #[serde(default = "default_node_sync_interval_secs")]
    pub node_sync_interval_secs: u64,

    /// Largest distance (in milestones) a node may lag or lead the pool median.
    #[serde(default = "default_sync_height_tolerance")]
    pub sync_height_tolerance: u32,

    /// Default per-call timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Per-operation timeout overrides keyed by [`Api::as_str`].
    #[serde(default)]
    pub api_timeouts_ms: BTreeMap<String, u64>,

    /// Consecutive timeouts after which a node is marked unhealthy.
    #[serde(default = "default_timeout_strikes")]
    pub timeout_strikes: u32,

    /// Compute proof-of-work locally instead of delegating to nodes.
    #[serde(default = "default_true")]
    pub local_pow: bool,

    #[serde(default = "default_pow_timeout_secs")]
    pub pow_timeout_secs: u64,

    #[serde(default)]
    pub pow_max_iterations: Option<u64>,

    /// Target score used when no node reported one.
    #[serde(default = "default_min_pow_score")]
    pub min_pow_score: f64,

    /// Consecutive unused addresses after which a scan stops.
    #[serde(default = "default_gap_limit")]
    pub gap_limit: u32,

    /// Pub/sub broker endpoint, e.g. `ws://127.0.0.1:1888`.
    #[serde(default)]
    pub broker_url: Option<String>,

    /// When set, the builder installs a global tracing subscriber at this
    /// level (`RUST_LOG` still wins).
    #[serde(default)]
    pub log_level: Option<String>,

    /// `"human"` or `"json"`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_network() -> String {
    "devnet".to_string()
}

fn default_quorum_size() -> usize {
    1
}

fn default_quorum_threshold() -> f64 {
    0.66
}

fn default_true() -> bool {
    true
}

fn default_node_sync_interval_secs() -> u64 {
    60
}

fn default_sync_height_tolerance() -> u32 {
    2
}

fn default_log_format() -> String {
    "human".into()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_timeout_strikes() -> u32 {
    3
}

fn default_pow_timeout_secs() -> u64 {
    60
}

fn default_min_pow_score() -> f64 {
    4000.0
}

fn default_gap_limit() -> u32 {
    20
}

/// Quorum size and agreement threshold.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuorumConfig {
    pub size: usize,
    pub threshold: f64,
}

impl QuorumConfig {
    /// Smallest number of agreeing responses, out of `responses`, that meets
    /// the threshold. Ratios are compared at percent precision, so 2 of 3
    /// (67%) meets a threshold of 0.67.
    pub fn required(&self, responses: usize) -> usize {
        if responses == 0 {
            return 1;
        }
        let threshold_pct = (self.threshold * 100.0).round() as usize;
        (1..=responses)
            .find(|&agreeing| (200 * agreeing + responses) / (2 * responses) >= threshold_pct)
            .unwrap_or(responses)
    }

    /// Fewest responses that still allow a decision.
    pub fn min_responses(&self) -> usize {
        self.size.div_ceil(2)
    }
}

// ── Impl ───────────────────────────────────────────────────────────────

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            network: default_network(),
            quorum_size: default_quorum_size(),
            quorum_threshold: default_quorum_threshold(),
            node_sync_enabled: true,
            node_sync_interval_secs: default_node_sync_interval_secs(),
            sync_height_tolerance: default_sync_height_tolerance(),
            request_timeout_ms: default_request_timeout_ms(),
            api_timeouts_ms: BTreeMap::new(),
            timeout_strikes: default_timeout_strikes(),
            local_pow: true,
            pow_timeout_secs: default_pow_timeout_secs(),
            pow_max_iterations: None,
            min_pow_score: default_min_pow_score(),
            gap_limit: default_gap_limit(),
            broker_url: None,
            log_level: None,
            log_format: default_log_format(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ClientError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ClientError> {
        toml::from_str(s).map_err(|e| ClientError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, ClientError> {
        toml::to_string_pretty(self).map_err(|e| ClientError::Config(e.to_string()))
    }

    /// Reject incomplete or contradictory settings.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.nodes.is_empty() {
            return Err(ClientError::Config("no nodes configured".into()));
        }
        if self.quorum_size == 0 {
            return Err(ClientError::Config("quorum size must be at least 1".into()));
        }
        if self.quorum_size > self.nodes.len() {
            return Err(ClientError::Config(format!(
                "quorum size {} exceeds the {} configured nodes",
                self.quorum_size,
                self.nodes.len()
            )));
        }
        if !(self.quorum_threshold > 0.0 && self.quorum_threshold <= 1.0) {
            return Err(ClientError::Config(format!(
                "quorum threshold {} is not in (0, 1]",
                self.quorum_threshold
            )));
        }
        if (self.quorum_threshold * self.quorum_size as f64).round() < 1.0 {
            return Err(ClientError::Config(format!(
                "threshold {} of {} nodes rounds to zero agreeing nodes",
                self.quorum_threshold, self.quorum_size
            )));
        }
        for key in self.api_timeouts_ms.keys() {
            key.parse::<Api>().map_err(ClientError::Config)?;
        }
        if self.api_timeouts_ms.values().any(|&ms| ms == 0)
            || self.request_timeout_ms == 0
            || self.pow_timeout_secs == 0
        {
            return Err(ClientError::Config("timeouts must be positive".into()));
        }
        if self.node_sync_enabled && self.node_sync_interval_secs == 0 {
            return Err(ClientError::Config("node sync interval must be positive".into()));
        }
        self.log_format
            .parse::<LogFormat>()
            .map_err(|e| ClientError::Config(e.to_string()))?;
        if self.timeout_strikes == 0 {
            return Err(ClientError::Config("timeout strikes must be at least 1".into()));
        }
        if self.gap_limit == 0 {
            return Err(ClientError::Config("gap limit must be at least 1".into()));
        }
        if !self.min_pow_score.is_finite() || self.min_pow_score < 0.0 {
            return Err(ClientError::Config(format!(
                "invalid minimum pow score {}",
                self.min_pow_score
            )));
        }
        Ok(())
    }

    pub fn quorum(&self) -> QuorumConfig {
        QuorumConfig {
            size: self.quorum_size,
            threshold: self.quorum_threshold,
        }
    }

    pub fn timeout_for(&self, api: Api) -> Duration {
        let ms = self
            .api_timeouts_ms
            .get(api.as_str())
            .copied()
            .unwrap_or(self.request_timeout_ms);
        Duration::from_millis(ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// The largest per-call timeout any API may use. HTTP clients take this
    /// as their own limit so an override above the default is not cut short.
    pub fn longest_timeout(&self) -> Duration {
        let ms = self
            .api_timeouts_ms
            .values()
            .copied()
            .fold(self.request_timeout_ms, u64::max);
        Duration::from_millis(ms)
    }

    pub fn node_sync_interval(&self) -> Duration {
        Duration::from_secs(self.node_sync_interval_secs)
    }

    pub fn network_id(&self) -> u64 {
        quorum_types::message::network_id(&self.network)
    }

    pub fn pow_budget(&self) -> WorkBudget {
        let mut budget =
            WorkBudget::unlimited().with_timeout(Duration::from_secs(self.pow_timeout_secs));
        budget.max_iterations = self.pow_max_iterations;
        budget
    }
}
