//! # Conveyor Execution Engine
//!
//! A database-backed engine for linear workflows: a workflow is a named,
//! ordered list of tasks, and an instance is driven through that list one
//! task at a time by a polling worker.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     WorkflowService                          │
//! │  (admission: validate against registry, seed first task)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowStore                           │
//! │  (PostgreSQL: workflow_instances, tasks, activity_logs)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Worker                               │
//! │  (leases pending tasks, runs executors, retries, advances)  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Execution is at-least-once: leases are atomic status flips, failed
//! steps are retried with exponential backoff up to a bound, and a
//! task's output payload is persisted before it is marked completed so
//! the next step always reads it from the store.
//!
//! ## Example
//!
//! ```ignore
//! use conveyor_engine::prelude::*;
//!
//! let mut registry = WorkflowRegistry::new();
//! registry
//!     .workflow("OrderProcess")
//!     .task("ValidateOrder", |ctx| async move {
//!         let input: serde_json::Value = ctx.input()?;
//!         Ok(Some(serde_json::json!({ "validated": true, "order": input })))
//!     })
//!     .task("SendEmail", |_ctx| async move { Ok(None) })
//!     .register()?;
//!
//! let store = Arc::new(InMemoryWorkflowStore::new());
//! let service = WorkflowService::new(store.clone(), Arc::new(registry));
//! let instance = service.start(StartWorkflowRequest {
//!     workflow_name: "OrderProcess".into(),
//!     input_payload: serde_json::json!({ "order_id": "ORD-1" }),
//! }).await?;
//! ```

pub mod persistence;
pub mod registry;
pub mod retry;
pub mod service;
pub mod task;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::persistence::{
        ActivityLog, EventType, InMemoryWorkflowStore, NewActivityLog, NewTask,
        PostgresWorkflowStore, StoreError, Task, TaskStatus, WorkflowInstance, WorkflowStatus,
        WorkflowStore,
    };
    pub use crate::registry::{RegistryError, WorkflowDefinition, WorkflowRegistry};
    pub use crate::retry::RetryPolicy;
    pub use crate::service::{ServiceError, StartWorkflowRequest, WorkflowService};
    pub use crate::task::{TaskContext, TaskError, TaskExecutor, TaskResult};
    pub use crate::worker::{Worker, WorkerConfig};
}

// Re-export key types at crate root
pub use persistence::{
    ActivityLog, EventType, InMemoryWorkflowStore, NewActivityLog, NewTask, PostgresWorkflowStore,
    StoreError, Task, TaskStatus, WorkflowInstance, WorkflowStatus, WorkflowStore,
};
pub use registry::{RegistryError, WorkflowDefinition, WorkflowRegistry};
pub use retry::RetryPolicy;
pub use service::{ServiceError, StartWorkflowRequest, WorkflowService};
pub use task::{TaskContext, TaskError, TaskExecutor, TaskResult};
pub use worker::{Worker, WorkerConfig};
