use crate::{new_edge_id, new_node_id, EdgeType, NodeType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Property bag shared by nodes and edges. Keys are flat (see `properties`
/// module); values are JSON scalars, primitive arrays, or `_raw_json` strings.
pub type Properties = Map<String, Value>;

/// Lock bookkeeping keys. Written only by the lock service.
pub const LOCKED_BY: &str = "lockedBy";
pub const LOCKED_AT: &str = "lockedAt";
pub const LOCK_EXPIRES_AT: &str = "lockExpiresAt";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub properties: Properties,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Node {
    pub fn new(node_type: NodeType, properties: Properties) -> Self {
        let now = Utc::now();
        Self {
            id: new_node_id(node_type),
            node_type,
            properties,
            created: now,
            updated: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Partial property replacement: keys present in `partial` overwrite,
    /// keys absent are preserved. A JSON `null` removes the key. `updated`
    /// advances strictly even within one clock tick.
    pub fn merge_properties(&mut self, partial: Properties) {
        for (key, value) in partial {
            if value.is_null() {
                self.properties.remove(&key);
            } else {
                self.properties.insert(key, value);
            }
        }
        let now = Utc::now();
        self.updated = if now > self.updated {
            now
        } else {
            self.updated + chrono::Duration::microseconds(1)
        };
    }

    pub fn prop_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    pub fn prop_i64(&self, key: &str) -> Option<i64> {
        self.properties.get(key).and_then(Value::as_i64)
    }

    pub fn prop_bool(&self, key: &str) -> Option<bool> {
        self.properties.get(key).and_then(Value::as_bool)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Properties,
    pub created: DateTime<Utc>,
}

impl Edge {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        edge_type: EdgeType,
        properties: Option<Properties>,
    ) -> Self {
        Self {
            id: new_edge_id(),
            source: source.into(),
            target: target.into(),
            edge_type,
            properties: properties.unwrap_or_default(),
            created: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(pairs: &[(&str, Value)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn merge_preserves_unspecified_keys() {
        let mut node = Node::new(
            NodeType::Memory,
            props(&[("title", json!("A")), ("content", json!("auth"))]),
        );
        node.merge_properties(props(&[("title", json!("B"))]));
        assert_eq!(node.prop_str("title"), Some("B"));
        assert_eq!(node.prop_str("content"), Some("auth"));
    }

    #[test]
    fn merge_null_removes_key() {
        let mut node = Node::new(NodeType::Memory, props(&[("stale", json!(1))]));
        node.merge_properties(props(&[("stale", Value::Null)]));
        assert!(!node.properties.contains_key("stale"));
    }

    #[test]
    fn updated_is_strictly_increasing() {
        let mut node = Node::new(NodeType::Memory, Properties::new());
        let t0 = node.updated;
        node.merge_properties(props(&[("a", json!(1))]));
        let t1 = node.updated;
        node.merge_properties(props(&[("a", json!(2))]));
        assert!(t1 > t0);
        assert!(node.updated > t1);
    }

    #[test]
    fn edge_serializes_type_field() {
        let edge = Edge::new("a", "b", EdgeType::DependsOn, None);
        let v = serde_json::to_value(&edge).unwrap();
        assert_eq!(v["type"], "depends_on");
        assert_eq!(v["source"], "a");
    }
}
