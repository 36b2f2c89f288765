use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Node type discriminator. The set is closed; free-form kinds go through
/// `Custom` with a `kind` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    #[serde(rename = "todo")]
    Todo,
    #[serde(rename = "todoList")]
    TodoList,
    #[serde(rename = "memory")]
    Memory,
    #[serde(rename = "file")]
    File,
    #[serde(rename = "fileChunk")]
    FileChunk,
    #[serde(rename = "function")]
    Function,
    #[serde(rename = "class")]
    Class,
    #[serde(rename = "module")]
    Module,
    #[serde(rename = "concept")]
    Concept,
    #[serde(rename = "person")]
    Person,
    #[serde(rename = "project")]
    Project,
    #[serde(rename = "preamble")]
    Preamble,
    #[serde(rename = "chain_execution")]
    ChainExecution,
    #[serde(rename = "agent_step")]
    AgentStep,
    #[serde(rename = "failure_pattern")]
    FailurePattern,
    #[serde(rename = "watchConfig")]
    WatchConfig,
    #[serde(rename = "custom")]
    Custom,
}

impl Default for NodeType {
    fn default() -> Self {
        NodeType::Memory
    }
}

impl NodeType {
    pub const ALL: [NodeType; 17] = [
        NodeType::Todo,
        NodeType::TodoList,
        NodeType::Memory,
        NodeType::File,
        NodeType::FileChunk,
        NodeType::Function,
        NodeType::Class,
        NodeType::Module,
        NodeType::Concept,
        NodeType::Person,
        NodeType::Project,
        NodeType::Preamble,
        NodeType::ChainExecution,
        NodeType::AgentStep,
        NodeType::FailurePattern,
        NodeType::WatchConfig,
        NodeType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Todo => "todo",
            NodeType::TodoList => "todoList",
            NodeType::Memory => "memory",
            NodeType::File => "file",
            NodeType::FileChunk => "fileChunk",
            NodeType::Function => "function",
            NodeType::Class => "class",
            NodeType::Module => "module",
            NodeType::Concept => "concept",
            NodeType::Person => "person",
            NodeType::Project => "project",
            NodeType::Preamble => "preamble",
            NodeType::ChainExecution => "chain_execution",
            NodeType::AgentStep => "agent_step",
            NodeType::FailurePattern => "failure_pattern",
            NodeType::WatchConfig => "watchConfig",
            NodeType::Custom => "custom",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(NodeType::Todo),
            "todoList" => Ok(NodeType::TodoList),
            "memory" => Ok(NodeType::Memory),
            "file" => Ok(NodeType::File),
            "fileChunk" => Ok(NodeType::FileChunk),
            "function" => Ok(NodeType::Function),
            "class" => Ok(NodeType::Class),
            "module" => Ok(NodeType::Module),
            "concept" => Ok(NodeType::Concept),
            "person" => Ok(NodeType::Person),
            "project" => Ok(NodeType::Project),
            "preamble" => Ok(NodeType::Preamble),
            "chain_execution" => Ok(NodeType::ChainExecution),
            "agent_step" => Ok(NodeType::AgentStep),
            "failure_pattern" => Ok(NodeType::FailurePattern),
            "watchConfig" => Ok(NodeType::WatchConfig),
            "custom" => Ok(NodeType::Custom),
            other => Err(format!("unknown node type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeType {
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "depends_on")]
    DependsOn,
    #[serde(rename = "relates_to")]
    RelatesTo,
    #[serde(rename = "implements")]
    Implements,
    #[serde(rename = "calls")]
    Calls,
    #[serde(rename = "imports")]
    Imports,
    #[serde(rename = "assigned_to")]
    AssignedTo,
    #[serde(rename = "parent_of")]
    ParentOf,
    #[serde(rename = "blocks")]
    Blocks,
    #[serde(rename = "references")]
    References,
    #[serde(rename = "belongs_to")]
    BelongsTo,
    #[serde(rename = "follows")]
    Follows,
    #[serde(rename = "occurred_in")]
    OccurredIn,
}

impl Default for EdgeType {
    fn default() -> Self {
        EdgeType::RelatesTo
    }
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Contains => "contains",
            EdgeType::DependsOn => "depends_on",
            EdgeType::RelatesTo => "relates_to",
            EdgeType::Implements => "implements",
            EdgeType::Calls => "calls",
            EdgeType::Imports => "imports",
            EdgeType::AssignedTo => "assigned_to",
            EdgeType::ParentOf => "parent_of",
            EdgeType::Blocks => "blocks",
            EdgeType::References => "references",
            EdgeType::BelongsTo => "belongs_to",
            EdgeType::Follows => "follows",
            EdgeType::OccurredIn => "occurred_in",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EdgeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contains" => Ok(EdgeType::Contains),
            "depends_on" => Ok(EdgeType::DependsOn),
            "relates_to" => Ok(EdgeType::RelatesTo),
            "implements" => Ok(EdgeType::Implements),
            "calls" => Ok(EdgeType::Calls),
            "imports" => Ok(EdgeType::Imports),
            "assigned_to" => Ok(EdgeType::AssignedTo),
            "parent_of" => Ok(EdgeType::ParentOf),
            "blocks" => Ok(EdgeType::Blocks),
            "references" => Ok(EdgeType::References),
            "belongs_to" => Ok(EdgeType::BelongsTo),
            "follows" => Ok(EdgeType::Follows),
            "occurred_in" => Ok(EdgeType::OccurredIn),
            other => Err(format!("unknown edge type: {}", other)),
        }
    }
}

/// Traversal direction for edge queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
    Both,
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Both
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            "both" => Ok(Direction::Both),
            other => Err(format!("unknown direction: {}", other)),
        }
    }
}

/// Agent scopes recognized by the context filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Pm,
    Worker,
    Qc,
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pm" => Ok(AgentType::Pm),
            "worker" => Ok(AgentType::Worker),
            "qc" => Ok(AgentType::Qc),
            other => Err(format!("unknown agent type: {}", other)),
        }
    }
}

/// Stable opaque id of the form `<type>-<uuid>`.
pub fn new_node_id(node_type: NodeType) -> String {
    format!("{}-{}", node_type.as_str(), Uuid::new_v4())
}

pub fn new_edge_id() -> String {
    format!("edge-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_type_round_trips_through_str() {
        for ty in NodeType::ALL {
            assert_eq!(ty.as_str().parse::<NodeType>().unwrap(), ty);
        }
    }

    #[test]
    fn edge_type_round_trips_through_str() {
        let all = [
            EdgeType::Contains,
            EdgeType::DependsOn,
            EdgeType::RelatesTo,
            EdgeType::Implements,
            EdgeType::Calls,
            EdgeType::Imports,
            EdgeType::AssignedTo,
            EdgeType::ParentOf,
            EdgeType::Blocks,
            EdgeType::References,
            EdgeType::BelongsTo,
            EdgeType::Follows,
            EdgeType::OccurredIn,
        ];
        for ty in all {
            assert_eq!(ty.as_str().parse::<EdgeType>().unwrap(), ty);
        }
    }

    #[test]
    fn node_ids_carry_type_prefix() {
        let id = new_node_id(NodeType::Todo);
        assert!(id.starts_with("todo-"));
        assert!(id.len() > "todo-".len() + 30);
    }

    #[test]
    fn serde_names_match_wire_format() {
        assert_eq!(
            serde_json::to_string(&NodeType::TodoList).unwrap(),
            "\"todoList\""
        );
        assert_eq!(
            serde_json::to_string(&EdgeType::DependsOn).unwrap(),
            "\"depends_on\""
        );
    }
}
