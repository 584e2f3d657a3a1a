use std::fmt;

use thiserror::Error;

use quorum_api::{Api, ApiError};
use quorum_crypto::DerivationError;
use quorum_pubsub::PubsubError;
use quorum_types::{Address, MessageId, OutputId, TypesError};
use quorum_work::WorkError;

/// One node's failure during a fan-out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeFailure {
    pub node: String,
    pub error: ApiError,
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.node, self.error)
    }
}

/// Nodes that returned the same value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValueGroup {
    /// Debug rendering of the value.
    pub value: String,
    pub nodes: Vec<String>,
    /// Sum of the members' response times.
    pub latency_ms: u64,
}

/// Why a quorum query was not accepted: who answered what, and who failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Disagreement {
    pub api: Api,
    pub queried: usize,
    pub responded: usize,
    /// Agreeing responses the best group needed.
    pub required: usize,
    /// Largest first.
    pub groups: Vec<ValueGroup>,
    pub failures: Vec<NodeFailure>,
}

impl fmt::Display for Disagreement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} of {} nodes responded, {} had to agree",
            self.api, self.responded, self.queried, self.required
        )?;
        for group in &self.groups {
            write!(f, "; {} -> [{}]", group.value, group.nodes.join(", "))?;
        }
        for failure in &self.failures {
            write!(f, "; {failure}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no healthy nodes available")]
    NoHealthyNodes,

    #[error("quorum needs {required} nodes but only {available} are healthy")]
    InsufficientNodes { required: usize, available: usize },

    #[error("quorum not reached: {0}")]
    QuorumNotReached(Box<Disagreement>),

    #[error("proof-of-work did not reach the target after {iterations} hashes")]
    ProofOfWorkTimeout { iterations: u64 },

    #[error("proof-of-work unavailable: {attempts} delegate nodes failed")]
    ProofOfWorkUnavailable { attempts: usize },

    #[error("outputs need {required} but inputs only hold {available}")]
    UnderfundedTransaction { required: u64, available: u64 },

    #[error("parent {0} is not retrievable")]
    InvalidParent(MessageId),

    #[error("{node} timed out")]
    NetworkTimeout { node: String },

    #[error("{node} returned a malformed response: {reason}")]
    MalformedResponse { node: String, reason: String },

    #[error("no node accepted the message: {}", join(.failures))]
    SubmissionRejected { failures: Vec<NodeFailure> },

    #[error("message {0} is already included, no need to promote or reattach")]
    NoNeedPromoteOrReattach(MessageId),

    #[error("input {0} does not exist")]
    InputNotFound(OutputId),

    #[error("input {0} is already spent")]
    InputSpent(OutputId),

    #[error("output {output_id} was listed for {expected} but belongs to {actual}")]
    OutputAddressMismatch {
        output_id: OutputId,
        expected: Address,
        actual: Address,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("message builder is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("amount overflow")]
    Overflow,

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Derivation(#[from] DerivationError),

    #[error("node error: {0}")]
    Api(#[from] ApiError),

    #[error(transparent)]
    Pubsub(#[from] PubsubError),
}

fn join(failures: &[NodeFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ClientError {
    /// Map a single-node failure, keeping timeouts and garbage distinguishable.
    pub fn from_node(node: &str, error: ApiError) -> Self {
        match error {
            ApiError::Timeout(_) => Self::NetworkTimeout {
                node: node.to_string(),
            },
            ApiError::Malformed(reason) => Self::MalformedResponse {
                node: node.to_string(),
                reason,
            },
            other => Self::Api(other),
        }
    }
}

impl From<TypesError> for ClientError {
    fn from(e: TypesError) -> Self {
        Self::InvalidMessage(e.to_string())
    }
}

impl From<WorkError> for ClientError {
    fn from(e: WorkError) -> Self {
        match e {
            WorkError::Timeout { iterations } => Self::ProofOfWorkTimeout { iterations },
            WorkError::Cancelled => Self::Cancelled,
            WorkError::InvalidTarget(target) => {
                Self::InvalidMessage(format!("invalid proof-of-work target {target}"))
            }
        }
    }
}
