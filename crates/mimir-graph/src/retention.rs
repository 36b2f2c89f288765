//! Age-based data retention.
//!
//! Types named in the policy map are swept with their configured horizon;
//! execution-telemetry types fall back to the default horizon. Everything
//! else is never touched by retention.

use crate::store::GraphStore;
use chrono::{Duration as ChronoDuration, Utc};
use mimir_core::{MimirError, NodeType, RetentionSettings, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Types swept with `default_days` when no explicit policy entry names them.
const DEFAULT_SWEPT_TYPES: [NodeType; 3] = [
    NodeType::ChainExecution,
    NodeType::AgentStep,
    NodeType::FailurePattern,
];

pub struct RetentionSweeper {
    store: Arc<GraphStore>,
    settings: RetentionSettings,
}

impl RetentionSweeper {
    pub fn new(store: Arc<GraphStore>, settings: RetentionSettings) -> Self {
        Self { store, settings }
    }

    fn horizon_days(&self, node_type: NodeType) -> Option<u32> {
        if let Some(days) = self.settings.policy.get(&node_type) {
            return Some(*days);
        }
        if DEFAULT_SWEPT_TYPES.contains(&node_type) {
            return Some(self.settings.default_days);
        }
        None
    }

    /// One pass: deletes nodes older than their type's horizon. Deletions
    /// go through the store so edge cascades and index removal hold.
    pub async fn sweep(&self) -> Result<usize> {
        if !self.settings.enabled {
            return Ok(0);
        }
        let now = Utc::now();
        let mut deleted = 0;
        for node in self.store.driver().scan_nodes(None).await? {
            let Some(days) = self.horizon_days(node.node_type) else {
                continue;
            };
            let horizon = ChronoDuration::days(days as i64);
            if now - node.updated > horizon {
                match self.store.delete_node_unchecked(&node.id).await {
                    Ok(_) => deleted += 1,
                    Err(MimirError::NotFound(_)) => {}
                    Err(e) => warn!(node = %node.id, "retention delete failed: {}", e),
                }
            }
        }
        if deleted > 0 {
            info!(deleted, "retention sweep removed expired nodes");
        }
        Ok(deleted)
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let interval = Duration::from_secs(self.settings.sweep_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("retention sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            warn!("retention sweep failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}
