//! Proof-of-work for outgoing messages, computed locally or delegated.
//!
//! Local work runs on the blocking pool so the async runtime keeps serving
//! node calls. Delegated work is never trusted: every nonce a node returns is
//! re-scored locally and a node that lies is dropped from the pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use quorum_api::{Api, ApiError};
use quorum_work::{score, validate_work, WorkBudget, WorkGenerator};

use crate::error::{ClientError, NodeFailure};
use crate::quorum::QuorumResolver;

const BELOW_TARGET: &str = "returned a nonce below the target score";

/// Sets the flag when dropped, stopping a search whose caller went away.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

pub struct PowEngine {
    resolver: Arc<QuorumResolver>,
    local: bool,
    budget: WorkBudget,
}

impl PowEngine {
    pub fn new(resolver: Arc<QuorumResolver>, local: bool, budget: WorkBudget) -> Self {
        Self {
            resolver,
            local,
            budget,
        }
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    /// Find a nonce for `pow_bytes` whose score reaches `target_score`.
    pub async fn compute(&self, pow_bytes: &[u8], target_score: f64) -> Result<u64, ClientError> {
        if self.local {
            self.compute_local(pow_bytes, target_score).await
        } else {
            self.compute_remote(pow_bytes, target_score).await
        }
    }

    async fn compute_local(&self, pow_bytes: &[u8], target_score: f64) -> Result<u64, ClientError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let _guard = CancelOnDrop(cancel.clone());
        let bytes = pow_bytes.to_vec();
        let budget = self.budget;
        let nonce = tokio::task::spawn_blocking(move || {
            WorkGenerator.generate_with_cancel(&bytes, target_score, &budget, &cancel)
        })
        .await
        .map_err(|_| ClientError::Cancelled)??;
        debug!(nonce = nonce.0, target_score, "local proof-of-work done");
        Ok(nonce.0)
    }

    async fn compute_remote(&self, pow_bytes: &[u8], target_score: f64) -> Result<u64, ClientError> {
        let result = self
            .resolver
            .first_ok(
                Api::PowGenerate,
                |node| async move { node.work_generate(pow_bytes, target_score).await },
                |&nonce| {
                    if validate_work(pow_bytes, nonce, target_score) {
                        Ok(())
                    } else {
                        Err(format!(
                            "{BELOW_TARGET} ({} < {target_score})",
                            score(pow_bytes, nonce)
                        ))
                    }
                },
            )
            .await;

        match result {
            Ok(answer) => {
                self.drop_liars(&answer.skipped).await;
                debug!(
                    node = %answer.node,
                    nonce = answer.value,
                    target_score,
                    "delegated proof-of-work verified"
                );
                Ok(answer.value)
            }
            Err(failures) if failures.is_empty() => Err(ClientError::NoHealthyNodes),
            Err(failures) => {
                self.drop_liars(&failures).await;
                warn!(attempts = failures.len(), "no node produced valid proof-of-work");
                Err(ClientError::ProofOfWorkUnavailable {
                    attempts: failures.len(),
                })
            }
        }
    }

    /// Nodes whose nonce failed local verification are not asked again.
    async fn drop_liars(&self, failures: &[NodeFailure]) {
        for failure in failures {
            if matches!(&failure.error, ApiError::Rejected(r) if r.starts_with(BELOW_TARGET)) {
                self.resolver
                    .pool()
                    .mark_unhealthy(&failure.node, "returned invalid proof-of-work")
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::node_pool::{NodeHealth, NodePool};
    use crate::quorum::STATS;
    use quorum_api::NodeApi;
    use quorum_nullables::{NodeMode, NullLedger, NullNode};
    use quorum_utils::StatsCounter;

    async fn engine(local: bool, budget: WorkBudget, nodes: Vec<NullNode>) -> (PowEngine, Arc<NodePool>) {
        let config = ClientConfig {
            nodes: nodes.iter().map(|n| n.url().to_string()).collect(),
            ..ClientConfig::default()
        };
        let pool = Arc::new(NodePool::new(3));
        pool.add_nodes(nodes.into_iter().map(|n| Arc::new(n) as Arc<dyn NodeApi>))
            .await;
        let resolver = QuorumResolver::new(
            pool.clone(),
            Arc::new(config),
            Arc::new(StatsCounter::new(STATS)),
        );
        (PowEngine::new(Arc::new(resolver), local, budget), pool)
    }

    #[tokio::test]
    async fn local_nonce_meets_target() {
        let (engine, _) = engine(true, WorkBudget::unlimited(), vec![]).await;
        let bytes = b"message bytes for local work";
        let nonce = engine.compute(bytes, 200.0).await.unwrap();
        assert!(score(bytes, nonce) >= 200.0);
    }

    #[tokio::test]
    async fn local_budget_exhaustion_is_a_timeout() {
        let budget = WorkBudget::unlimited().with_max_iterations(1);
        let (engine, _) = engine(true, budget, vec![]).await;
        let err = engine.compute(b"bytes", 1e15).await.unwrap_err();
        assert!(matches!(err, ClientError::ProofOfWorkTimeout { .. }));
    }

    #[tokio::test]
    async fn dishonest_delegate_is_skipped_and_dropped() {
        let ledger = NullLedger::new();
        let (engine, pool) = engine(
            false,
            WorkBudget::unlimited(),
            vec![
                NullNode::new("http://liar", ledger.clone()).with_mode(NodeMode::DishonestPow),
                NullNode::new("http://honest", ledger),
            ],
        )
        .await;
        let bytes = b"delegated";
        let nonce = engine.compute(bytes, 100.0).await.unwrap();
        assert!(validate_work(bytes, nonce, 100.0));
        let liar = pool
            .statuses()
            .await
            .into_iter()
            .find(|s| s.url == "http://liar")
            .unwrap();
        assert!(matches!(liar.health, NodeHealth::Unhealthy(_)));
    }

    #[tokio::test]
    async fn all_delegates_failing_is_reported() {
        let (engine, _) = engine(
            false,
            WorkBudget::unlimited(),
            vec![
                NullNode::new("http://a", NullLedger::new()).with_mode(NodeMode::Offline),
                NullNode::new("http://b", NullLedger::new()).with_mode(NodeMode::DishonestPow),
            ],
        )
        .await;
        let err = engine.compute(b"bytes", 100.0).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::ProofOfWorkUnavailable { attempts: 2 }
        ));
    }

    #[tokio::test]
    async fn no_delegates_at_all() {
        let (engine, _) = engine(false, WorkBudget::unlimited(), vec![]).await;
        assert!(matches!(
            engine.compute(b"bytes", 1.0).await,
            Err(ClientError::NoHealthyNodes)
        ));
    }
}
