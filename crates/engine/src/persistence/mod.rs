//! Persistence layer: entities, the store trait, and its implementations.

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryWorkflowStore;
pub use postgres::PostgresWorkflowStore;
pub use store::{
    ActivityLog, EventType, NewActivityLog, NewTask, StoreError, Task, TaskStatus,
    WorkflowInstance, WorkflowStatus, WorkflowStore,
};
