//! Background node synchronisation.
//!
//! Periodically re-runs [`NodePool::refresh`] so that lagging nodes drop out
//! and recovered nodes come back. The task stops when the shutdown channel
//! fires or its sender is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::node_pool::{NodePool, PoolState};

#[derive(Clone, Debug)]
pub struct SyncSettings {
    pub network: String,
    pub tolerance: u32,
    /// Per-node deadline for the info query.
    pub timeout: Duration,
    pub interval: Duration,
}

/// Spawn the refresh loop. The first refresh happens one `interval` from now;
/// the caller is expected to have synced once already.
pub fn spawn_sync_task(
    pool: Arc<NodePool>,
    settings: SyncSettings,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval_at(Instant::now() + settings.interval, settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    tracing::info!("node sync task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let state = pool
                        .refresh(&settings.network, settings.tolerance, settings.timeout)
                        .await;
                    if state == PoolState::Degraded {
                        tracing::warn!("no healthy nodes after sync, retrying next interval");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_api::NodeApi;
    use quorum_nullables::{NullLedger, NullNode};

    fn settings(interval_ms: u64) -> SyncSettings {
        SyncSettings {
            network: "devnet".into(),
            tolerance: 2,
            timeout: Duration::from_millis(200),
            interval: Duration::from_millis(interval_ms),
        }
    }

    async fn healthy_urls(pool: &NodePool) -> Vec<String> {
        pool.list_healthy()
            .await
            .iter()
            .map(|n| n.url().to_string())
            .collect()
    }

    #[tokio::test]
    async fn lagging_node_rejoins_after_catching_up() {
        let ledger = NullLedger::new();
        let a = Arc::new(NullNode::new("http://a", ledger.clone()).with_milestone(10));
        let b = Arc::new(NullNode::new("http://b", ledger.clone()).with_milestone(10));
        let c = Arc::new(NullNode::new("http://c", ledger).with_milestone(1));
        let pool = Arc::new(NodePool::new(3));
        let apis: Vec<Arc<dyn NodeApi>> = vec![a, b, c.clone()];
        pool.add_nodes(apis).await;
        let s = settings(20);
        pool.refresh(&s.network, s.tolerance, s.timeout).await;
        assert_eq!(healthy_urls(&pool).await.len(), 2);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = spawn_sync_task(pool.clone(), s, shutdown_rx);
        c.set_milestone(10);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(healthy_urls(&pool).await.len(), 3);

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sync task did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn dropped_sender_stops_the_task() {
        let pool = Arc::new(NodePool::new(3));
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        let handle = spawn_sync_task(pool, settings(10_000), shutdown_rx);
        drop(shutdown_tx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sync task did not stop")
            .unwrap();
    }
}
