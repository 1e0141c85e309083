//! WorkflowStore trait definition and persisted entities

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Workflow instance not found
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    /// Task not found
    #[error("task not found: {0}")]
    TaskNotFound(i64),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Workflow instance status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    /// Instance admitted but no task has started yet
    Pending,

    /// At least one task has left PENDING
    InProgress,

    /// Every declared task completed
    Completed,

    /// A task exhausted its retries
    Failed,
}

impl WorkflowStatus {
    /// Wire representation, as stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Parse the wire representation
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(StoreError::Serialization(format!(
                "unknown workflow status: {other}"
            ))),
        }
    }

    /// Whether the instance can make no further progress
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task status
///
/// FAILED is terminal only once the owning workflow is FAILED; while a
/// retry backoff is pending it serves as a transient marker that the
/// retry path (or the stuck-task reaper) returns to PENDING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Retrying,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Wire representation, as stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Retrying => "RETRYING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Parse the wire representation
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "RETRYING" => Ok(Self::Retrying),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(StoreError::Serialization(format!(
                "unknown task status: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Activity log event type
///
/// New values require a version bump: readers treat the set as closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    TaskStarted,
    TaskCompleted,
    TaskRetry,
    TaskFailed,
    WorkflowCompleted,
}

impl EventType {
    /// Wire representation, as stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskStarted => "TASK_STARTED",
            Self::TaskCompleted => "TASK_COMPLETED",
            Self::TaskRetry => "TASK_RETRY",
            Self::TaskFailed => "TASK_FAILED",
            Self::WorkflowCompleted => "WORKFLOW_COMPLETED",
        }
    }

    /// Parse the wire representation
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "TASK_STARTED" => Ok(Self::TaskStarted),
            "TASK_COMPLETED" => Ok(Self::TaskCompleted),
            "TASK_RETRY" => Ok(Self::TaskRetry),
            "TASK_FAILED" => Ok(Self::TaskFailed),
            "WORKFLOW_COMPLETED" => Ok(Self::WorkflowCompleted),
            other => Err(StoreError::Serialization(format!(
                "unknown event type: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One concrete run of a registered workflow
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub workflow_name: String,
    pub status: WorkflowStatus,
    /// Opaque JSON document the instance was started with; immutable
    pub current_input: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One step within a workflow instance
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Task {
    pub id: i64,
    pub workflow_instance_id: Uuid,
    pub task_name: String,
    pub status: TaskStatus,
    /// Opaque JSON; equals the instance input for the first task and the
    /// previous task's output for every later one
    pub input_payload: Option<String>,
    /// Opaque JSON written by the executor, persisted before COMPLETED
    pub output_payload: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for inserting a task; the store assigns id and timestamps
#[derive(Debug, Clone)]
pub struct NewTask {
    pub workflow_instance_id: Uuid,
    pub task_name: String,
    pub input_payload: Option<String>,
}

/// Append-only audit record of a task or workflow lifecycle event
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ActivityLog {
    pub id: i64,
    pub workflow_instance_id: Uuid,
    /// Absent for workflow-level events
    pub task_name: Option<String>,
    pub event_type: EventType,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields for appending an activity log entry
#[derive(Debug, Clone)]
pub struct NewActivityLog {
    pub workflow_instance_id: Uuid,
    pub task_name: Option<String>,
    pub event_type: EventType,
    pub details: Option<String>,
}

/// Store for workflow instances, their task queue, and activity logs
///
/// Implementations must be thread-safe: the worker fans a batch of
/// leased tasks out to concurrent executors that all share one store.
#[async_trait]
pub trait WorkflowStore: Send + Sync + 'static {
    // =========================================================================
    // Workflow operations
    // =========================================================================

    /// Persist a new workflow instance
    async fn create_workflow(&self, instance: &WorkflowInstance) -> Result<(), StoreError>;

    /// Fetch a workflow instance by id
    async fn workflow_by_id(&self, id: Uuid) -> Result<WorkflowInstance, StoreError>;

    /// Update a workflow instance's status
    async fn update_workflow_status(
        &self,
        id: Uuid,
        status: WorkflowStatus,
    ) -> Result<(), StoreError>;

    /// List workflow instances, newest first
    async fn list_workflows(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WorkflowInstance>, StoreError>;

    /// Total number of workflow instances
    async fn count_workflows(&self) -> Result<i64, StoreError>;

    // =========================================================================
    // Task queue operations
    // =========================================================================

    /// Insert a pending task and return it with its assigned id
    async fn create_task(&self, task: NewTask) -> Result<Task, StoreError>;

    /// Atomically lease up to `limit` pending tasks in id order
    ///
    /// Flips PENDING to IN_PROGRESS (RETRYING when the task has already
    /// been retried) in the same statement, so concurrent pollers never
    /// lease the same task twice. Returned records carry the new status.
    async fn claim_pending_tasks(&self, limit: i64) -> Result<Vec<Task>, StoreError>;

    /// All tasks belonging to a workflow instance, in id order
    async fn tasks_by_workflow(&self, workflow_id: Uuid) -> Result<Vec<Task>, StoreError>;

    /// Update a task's status
    async fn update_task_status(&self, task_id: i64, status: TaskStatus) -> Result<(), StoreError>;

    /// Update a task's persisted retry count
    async fn update_task_retry_count(
        &self,
        task_id: i64,
        retry_count: i32,
    ) -> Result<(), StoreError>;

    /// Persist a task's output payload
    ///
    /// Must happen before the COMPLETED transition: the next task's input
    /// is read from this column.
    async fn update_task_output(&self, task_id: i64, output: &str) -> Result<(), StoreError>;

    /// Return abandoned tasks to PENDING
    ///
    /// Reclaims tasks older than `stale_after` that are IN_PROGRESS or
    /// RETRYING (worker died mid-execution), or FAILED while the owning
    /// workflow is still live (a retry marker whose backoff sleeper was
    /// cancelled). Returns the reclaimed task ids.
    async fn reclaim_stuck_tasks(&self, stale_after: Duration) -> Result<Vec<i64>, StoreError>;

    // =========================================================================
    // Activity log operations
    // =========================================================================

    /// Append an activity log entry
    async fn create_activity_log(&self, log: NewActivityLog) -> Result<(), StoreError>;

    /// All activity log entries for a workflow instance, oldest first
    async fn activity_logs_by_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<ActivityLog>, StoreError>;

    // =========================================================================
    // Health
    // =========================================================================

    /// Cheap connectivity probe for readiness checks
    async fn ping(&self) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            WorkflowStatus::Pending,
            WorkflowStatus::InProgress,
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
        ] {
            assert_eq!(WorkflowStatus::parse(status.as_str()).unwrap(), status);
        }

        for status in [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Retrying,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!(matches!(
            WorkflowStatus::parse("RUNNING"),
            Err(StoreError::Serialization(_))
        ));
        assert!(matches!(
            TaskStatus::parse(""),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn test_event_type_wire_format() {
        assert_eq!(EventType::TaskStarted.as_str(), "TASK_STARTED");
        assert_eq!(EventType::WorkflowCompleted.as_str(), "WORKFLOW_COMPLETED");
        assert_eq!(
            EventType::parse("TASK_RETRY").unwrap(),
            EventType::TaskRetry
        );
    }

    #[test]
    fn test_status_serde_matches_wire_format() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");

        let parsed: WorkflowStatus = serde_json::from_str("\"COMPLETED\"").unwrap();
        assert_eq!(parsed, WorkflowStatus::Completed);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(!WorkflowStatus::Pending.is_terminal());
        assert!(!WorkflowStatus::InProgress.is_terminal());
    }
}
