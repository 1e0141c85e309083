//! Workflow service: the admission path and control-plane reads

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::persistence::{
    ActivityLog, NewTask, StoreError, Task, WorkflowInstance, WorkflowStatus, WorkflowStore,
};
use crate::registry::WorkflowRegistry;

/// Errors from service operations
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Workflow name not present in the registry
    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    /// Registered workflow has no tasks (the registry rejects these at
    /// build time; kept as a guard)
    #[error("workflow {0} has no tasks")]
    EmptyWorkflow(String),

    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Input payload could not be serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Request to start a new workflow instance
#[derive(Debug, Clone, Deserialize)]
pub struct StartWorkflowRequest {
    pub workflow_name: String,
    pub input_payload: serde_json::Value,
}

/// Admission-time validation and read queries for the control plane
///
/// Holds the store and the (immutable) registry; all mutation beyond
/// admission happens in the worker.
pub struct WorkflowService {
    store: Arc<dyn WorkflowStore>,
    registry: Arc<WorkflowRegistry>,
}

impl WorkflowService {
    /// Create a new workflow service
    pub fn new(store: Arc<dyn WorkflowStore>, registry: Arc<WorkflowRegistry>) -> Self {
        Self { store, registry }
    }

    /// Names of all registered workflows
    pub fn available_workflows(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Admit a workflow request: validate it against the registry and
    /// seed the instance plus its first task.
    ///
    /// The instance is inserted before the task, so a crash between the
    /// two writes leaves an instance with no tasks — a retry
    /// opportunity for the client, never a dangling task.
    #[instrument(skip(self, request), fields(workflow_name = %request.workflow_name))]
    pub async fn start(
        &self,
        request: StartWorkflowRequest,
    ) -> Result<WorkflowInstance, ServiceError> {
        let definition = self
            .registry
            .definition(&request.workflow_name)
            .ok_or_else(|| ServiceError::UnknownWorkflow(request.workflow_name.clone()))?;
        let first_task = definition
            .task_names
            .first()
            .ok_or_else(|| ServiceError::EmptyWorkflow(request.workflow_name.clone()))?
            .clone();

        let input = serde_json::to_string(&request.input_payload)?;
        let instance = WorkflowInstance {
            id: Uuid::now_v7(),
            workflow_name: request.workflow_name,
            status: WorkflowStatus::Pending,
            current_input: Some(input.clone()),
            created_at: Utc::now(),
        };

        self.store.create_workflow(&instance).await?;
        self.store
            .create_task(NewTask {
                workflow_instance_id: instance.id,
                task_name: first_task.clone(),
                input_payload: Some(input),
            })
            .await?;

        info!(
            workflow_id = %instance.id,
            first_task = %first_task,
            "workflow started"
        );
        Ok(instance)
    }

    /// List workflow instances, newest first
    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<WorkflowInstance>, ServiceError> {
        Ok(self.store.list_workflows(limit, offset).await?)
    }

    /// Total number of workflow instances
    pub async fn count(&self) -> Result<i64, ServiceError> {
        Ok(self.store.count_workflows().await?)
    }

    /// Fetch one workflow instance
    pub async fn by_id(&self, id: Uuid) -> Result<WorkflowInstance, ServiceError> {
        Ok(self.store.workflow_by_id(id).await?)
    }

    /// Tasks of one workflow instance, in execution order
    pub async fn tasks_by_workflow(&self, id: Uuid) -> Result<Vec<Task>, ServiceError> {
        Ok(self.store.tasks_by_workflow(id).await?)
    }

    /// Activity log of one workflow instance, oldest first
    pub async fn logs_by_workflow(&self, id: Uuid) -> Result<Vec<ActivityLog>, ServiceError> {
        Ok(self.store.activity_logs_by_workflow(id).await?)
    }

    /// Store connectivity probe
    pub async fn ping(&self) -> Result<(), ServiceError> {
        Ok(self.store.ping().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{InMemoryWorkflowStore, TaskStatus};

    fn registry_with(name: &str, tasks: &[&str]) -> Arc<WorkflowRegistry> {
        let mut registry = WorkflowRegistry::new();
        let mut builder = registry.workflow(name);
        for task in tasks {
            let task = task.to_string();
            builder = builder.task(task, |_ctx| async { Ok(None) });
        }
        builder.register().unwrap();
        Arc::new(registry)
    }

    fn service(
        registry: Arc<WorkflowRegistry>,
    ) -> (Arc<InMemoryWorkflowStore>, WorkflowService) {
        let store = Arc::new(InMemoryWorkflowStore::new());
        let service = WorkflowService::new(store.clone(), registry);
        (store, service)
    }

    #[tokio::test]
    async fn test_start_seeds_instance_and_first_task() {
        let (store, service) = service(registry_with("Order", &["validate", "pay"]));

        let instance = service
            .start(StartWorkflowRequest {
                workflow_name: "Order".to_string(),
                input_payload: serde_json::json!({"order_id": "ORD-1"}),
            })
            .await
            .unwrap();

        assert_eq!(instance.status, WorkflowStatus::Pending);
        assert_eq!(instance.workflow_name, "Order");

        let tasks = store.tasks_by_workflow(instance.id).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_name, "validate");
        assert_eq!(tasks[0].status, TaskStatus::Pending);
        // Instance input and first task input are the same serialized document
        assert_eq!(tasks[0].input_payload, instance.current_input);
    }

    #[tokio::test]
    async fn test_unknown_workflow_inserts_nothing() {
        let (store, service) = service(registry_with("Order", &["validate"]));

        let result = service
            .start(StartWorkflowRequest {
                workflow_name: "Nope".to_string(),
                input_payload: serde_json::json!({}),
            })
            .await;

        match result {
            Err(ServiceError::UnknownWorkflow(name)) => assert_eq!(name, "Nope"),
            other => panic!("expected UnknownWorkflow, got {other:?}"),
        }
        assert_eq!(store.workflow_count(), 0);
        assert_eq!(store.pending_task_count(), 0);
    }

    #[tokio::test]
    async fn test_error_message_names_the_workflow() {
        let err = ServiceError::UnknownWorkflow("Nope".to_string());
        assert_eq!(err.to_string(), "unknown workflow: Nope");
    }

    #[tokio::test]
    async fn test_read_passthroughs() {
        let (_store, service) = service(registry_with("Order", &["validate"]));

        let instance = service
            .start(StartWorkflowRequest {
                workflow_name: "Order".to_string(),
                input_payload: serde_json::json!({}),
            })
            .await
            .unwrap();

        assert_eq!(service.count().await.unwrap(), 1);
        assert_eq!(service.list(20, 0).await.unwrap().len(), 1);
        assert_eq!(service.by_id(instance.id).await.unwrap().id, instance.id);
        assert_eq!(service.tasks_by_workflow(instance.id).await.unwrap().len(), 1);
        assert!(service.logs_by_workflow(instance.id).await.unwrap().is_empty());
        assert_eq!(service.available_workflows(), vec!["Order"]);
        service.ping().await.unwrap();
    }
}
