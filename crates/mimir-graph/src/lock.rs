//! Optimistic node locks for multi-agent coordination.
//!
//! Acquisition is a compare-and-set on the node's lock fields through the
//! driver, so transitions are linearizable per node: of any set of
//! concurrent acquirers exactly one wins.

use crate::driver::is_lock_available;
use mimir_core::{GraphDriver, Node, NodeType, Properties, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const DEFAULT_LOCK_TIMEOUT_MS: i64 = 300_000;

pub struct LockService {
    driver: Arc<dyn GraphDriver>,
}

impl LockService {
    pub fn new(driver: Arc<dyn GraphDriver>) -> Self {
        Self { driver }
    }

    /// True iff the node was unlocked or expired at the moment of the call.
    pub async fn acquire(
        &self,
        node_id: &str,
        agent_id: &str,
        timeout_ms: Option<i64>,
    ) -> Result<bool> {
        let timeout = timeout_ms.unwrap_or(DEFAULT_LOCK_TIMEOUT_MS);
        let acquired = self.driver.try_lock(node_id, agent_id, timeout).await?;
        debug!(node = node_id, agent = agent_id, acquired, "lock acquire");
        Ok(acquired)
    }

    /// Clears the lock only when held by `agent_id`.
    pub async fn release(&self, node_id: &str, agent_id: &str) -> Result<bool> {
        self.driver.release_lock(node_id, agent_id).await
    }

    /// Nodes whose lock is absent or expired, optionally narrowed by type
    /// and flat equality filters.
    pub async fn query_available(
        &self,
        node_type: Option<NodeType>,
        filters: Option<&Properties>,
    ) -> Result<Vec<Node>> {
        let nodes = self.driver.scan_nodes(node_type).await?;
        Ok(nodes
            .into_iter()
            .filter(|node| {
                is_lock_available(node)
                    && filters.map_or(true, |f| {
                        f.iter().all(|(k, v)| node.properties.get(k) == Some(v))
                    })
            })
            .collect())
    }

    /// Clears every expired lock; also run on a timer.
    pub async fn cleanup(&self) -> Result<usize> {
        self.driver.clear_expired_locks().await
    }

    pub fn spawn_cleanup_task(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("lock cleanup task stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        match service.cleanup().await {
                            Ok(0) => {}
                            Ok(n) => info!(cleared = n, "expired locks cleared"),
                            Err(e) => tracing::warn!("lock cleanup failed: {}", e),
                        }
                    }
                }
            }
        })
    }
}
