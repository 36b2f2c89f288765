pub mod clear;
pub mod driver;
pub mod lock;
pub mod retention;
pub mod snapshot;
pub mod store;
pub mod task_context;

pub use clear::{ClearOutcome, ClearPreview, ClearScope};
pub use driver::MemoryGraphDriver;
pub use lock::{LockService, DEFAULT_LOCK_TIMEOUT_MS};
pub use retention::RetentionSweeper;
pub use snapshot::GraphSnapshot;
pub use store::{
    BatchError, DeleteBatch, DeleteOutcome, EdgeBatch, EdgeSpec, GraphStats, GraphStore, NodeBatch,
    NodeSpec, NodeUpdate, Subgraph, CASCADE_CONFIRM_THRESHOLD,
};
pub use task_context::{get_task_context, TaskContext};
