//! Confirmation-gated clear: preview first, then a second call carrying the
//! token actually deletes. Type-scoped or everything.

use crate::store::{GraphStore, ACTION_CLEAR};
use mimir_core::confirm::Confirmation;
use mimir_core::{MimirError, NodeType, Result};
use serde::Serialize;
use serde_json::json;
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    Type(NodeType),
    All,
}

impl ClearScope {
    pub fn as_str(&self) -> String {
        match self {
            ClearScope::Type(ty) => ty.as_str().to_string(),
            ClearScope::All => "ALL".to_string(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        if raw == "ALL" {
            return Ok(ClearScope::All);
        }
        NodeType::from_str(raw)
            .map(ClearScope::Type)
            .map_err(MimirError::Validation)
    }
}

#[derive(Debug, Serialize)]
pub struct ClearPreview {
    pub scope: String,
    #[serde(rename = "nodeCount")]
    pub node_count: usize,
    #[serde(rename = "edgeCount")]
    pub edge_count: usize,
}

#[derive(Debug)]
pub enum ClearOutcome {
    NeedsConfirmation {
        preview: ClearPreview,
        confirmation: Confirmation,
    },
    Cleared {
        deleted_nodes: usize,
        deleted_edges: usize,
    },
}

impl GraphStore {
    /// Always two-phase: without a token this returns a preview and issues
    /// one; with a valid token it deletes and consumes it.
    pub async fn clear(
        &self,
        scope: ClearScope,
        confirmation: Option<&str>,
    ) -> Result<ClearOutcome> {
        let params = json!({ "type": scope.as_str() });
        let Some(token) = confirmation else {
            let preview = self.clear_preview(scope).await?;
            let confirmation = self.ledger().issue(ACTION_CLEAR, &params);
            return Ok(ClearOutcome::NeedsConfirmation {
                preview,
                confirmation,
            });
        };

        if !self.ledger().validate(token, ACTION_CLEAR, &params) {
            return Err(MimirError::ConfirmationInvalid(
                "confirmation does not match this clear".into(),
            ));
        }
        self.ledger().consume(token)?;

        let node_type = match scope {
            ClearScope::Type(ty) => Some(ty),
            ClearScope::All => None,
        };
        let targets = self.driver().scan_nodes(node_type).await?;
        let mut deleted_nodes = 0;
        let mut deleted_edges = 0;
        for node in targets {
            // a previous iteration may have cascaded this node away already
            match self.delete_node_unchecked(&node.id).await {
                Ok((edges, chunks)) => {
                    deleted_nodes += 1 + chunks;
                    deleted_edges += edges;
                }
                Err(MimirError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        info!(scope = %scope.as_str(), deleted_nodes, deleted_edges, "clear complete");
        Ok(ClearOutcome::Cleared {
            deleted_nodes,
            deleted_edges,
        })
    }

    async fn clear_preview(&self, scope: ClearScope) -> Result<ClearPreview> {
        let node_type = match scope {
            ClearScope::Type(ty) => Some(ty),
            ClearScope::All => None,
        };
        let nodes = self.driver().scan_nodes(node_type).await?;
        let mut edge_ids = std::collections::HashSet::new();
        for node in &nodes {
            for edge in self
                .driver()
                .edges_of(&node.id, mimir_core::Direction::Both)
                .await?
            {
                edge_ids.insert(edge.id);
            }
        }
        Ok(ClearPreview {
            scope: scope.as_str(),
            node_count: nodes.len(),
            edge_count: edge_ids.len(),
        })
    }
}
