pub mod config;
pub mod confirm;
pub mod context;
pub mod error;
pub mod node;
pub mod properties;
pub mod traits;
pub mod types;

pub use config::{EmbeddingProviderKind, EmbeddingSettings, MimirConfig, RetentionSettings};
pub use error::{MimirError, Result};
pub use node::{Edge, Node, Properties, LOCKED_BY, LOCKED_AT, LOCK_EXPIRES_AT};
pub use traits::{
    EmbeddingProvider, FulltextBackend, GraphDriver, ScoredId, VectorBackend, VisionProvider,
};
pub use types::{new_edge_id, new_node_id, AgentType, Direction, EdgeType, NodeType};
