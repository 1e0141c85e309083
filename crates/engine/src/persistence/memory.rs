//! In-memory implementation of WorkflowStore for testing

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::*;

/// In-memory implementation of WorkflowStore
///
/// Primarily for tests. Tasks live in a BTreeMap so leasing naturally
/// observes id order, and every status flip happens under one write
/// lock, giving the same atomic-lease semantics as the PostgreSQL
/// implementation.
///
/// # Example
///
/// ```
/// use conveyor_engine::InMemoryWorkflowStore;
///
/// let store = InMemoryWorkflowStore::new();
/// ```
pub struct InMemoryWorkflowStore {
    workflows: RwLock<HashMap<Uuid, WorkflowInstance>>,
    tasks: RwLock<BTreeMap<i64, Task>>,
    logs: RwLock<Vec<ActivityLog>>,
    next_task_id: AtomicI64,
    next_log_id: AtomicI64,
}

impl InMemoryWorkflowStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            tasks: RwLock::new(BTreeMap::new()),
            logs: RwLock::new(Vec::new()),
            next_task_id: AtomicI64::new(1),
            next_log_id: AtomicI64::new(1),
        }
    }

    /// Number of stored workflow instances
    pub fn workflow_count(&self) -> usize {
        self.workflows.read().len()
    }

    /// Number of tasks currently pending
    pub fn pending_task_count(&self) -> usize {
        self.tasks
            .read()
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .count()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.workflows.write().clear();
        self.tasks.write().clear();
        self.logs.write().clear();
    }
}

impl Default for InMemoryWorkflowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn create_workflow(&self, instance: &WorkflowInstance) -> Result<(), StoreError> {
        self.workflows
            .write()
            .insert(instance.id, instance.clone());
        Ok(())
    }

    async fn workflow_by_id(&self, id: Uuid) -> Result<WorkflowInstance, StoreError> {
        self.workflows
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::WorkflowNotFound(id))
    }

    async fn update_workflow_status(
        &self,
        id: Uuid,
        status: WorkflowStatus,
    ) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write();
        let workflow = workflows.get_mut(&id).ok_or(StoreError::WorkflowNotFound(id))?;
        workflow.status = status;
        Ok(())
    }

    async fn list_workflows(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WorkflowInstance>, StoreError> {
        let mut instances: Vec<_> = self.workflows.read().values().cloned().collect();
        instances.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(instances
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_workflows(&self) -> Result<i64, StoreError> {
        Ok(self.workflows.read().len() as i64)
    }

    async fn create_task(&self, task: NewTask) -> Result<Task, StoreError> {
        let now = Utc::now();
        let record = Task {
            id: self.next_task_id.fetch_add(1, Ordering::SeqCst),
            workflow_instance_id: task.workflow_instance_id,
            task_name: task.task_name,
            status: TaskStatus::Pending,
            input_payload: task.input_payload,
            output_payload: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.tasks.write().insert(record.id, record.clone());
        Ok(record)
    }

    async fn claim_pending_tasks(&self, limit: i64) -> Result<Vec<Task>, StoreError> {
        let mut tasks = self.tasks.write();
        let mut claimed = Vec::new();

        // BTreeMap iteration is id-ascending, matching the SQL lease order
        for task in tasks.values_mut() {
            if claimed.len() as i64 >= limit {
                break;
            }
            if task.status == TaskStatus::Pending {
                task.status = if task.retry_count > 0 {
                    TaskStatus::Retrying
                } else {
                    TaskStatus::InProgress
                };
                task.updated_at = Utc::now();
                claimed.push(task.clone());
            }
        }

        Ok(claimed)
    }

    async fn tasks_by_workflow(&self, workflow_id: Uuid) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .tasks
            .read()
            .values()
            .filter(|t| t.workflow_instance_id == workflow_id)
            .cloned()
            .collect())
    }

    async fn update_task_status(&self, task_id: i64, status: TaskStatus) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(&task_id).ok_or(StoreError::TaskNotFound(task_id))?;
        task.status = status;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn update_task_retry_count(
        &self,
        task_id: i64,
        retry_count: i32,
    ) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(&task_id).ok_or(StoreError::TaskNotFound(task_id))?;
        task.retry_count = retry_count;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn update_task_output(&self, task_id: i64, output: &str) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(&task_id).ok_or(StoreError::TaskNotFound(task_id))?;
        task.output_payload = Some(output.to_string());
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn reclaim_stuck_tasks(&self, stale_after: Duration) -> Result<Vec<i64>, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(stale_after).unwrap_or_else(|_| chrono::Duration::zero());
        let workflows = self.workflows.read();
        let mut tasks = self.tasks.write();
        let mut reclaimed = Vec::new();

        for task in tasks.values_mut() {
            if task.updated_at >= cutoff {
                continue;
            }
            let workflow_live = workflows
                .get(&task.workflow_instance_id)
                .map(|w| !w.status.is_terminal())
                .unwrap_or(false);
            let abandoned = matches!(task.status, TaskStatus::InProgress | TaskStatus::Retrying)
                || (task.status == TaskStatus::Failed && workflow_live);
            if abandoned && workflow_live {
                task.status = TaskStatus::Pending;
                task.updated_at = Utc::now();
                reclaimed.push(task.id);
            }
        }

        Ok(reclaimed)
    }

    async fn create_activity_log(&self, log: NewActivityLog) -> Result<(), StoreError> {
        let record = ActivityLog {
            id: self.next_log_id.fetch_add(1, Ordering::SeqCst),
            workflow_instance_id: log.workflow_instance_id,
            task_name: log.task_name,
            event_type: log.event_type,
            details: log.details,
            created_at: Utc::now(),
        };
        self.logs.write().push(record);
        Ok(())
    }

    async fn activity_logs_by_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<ActivityLog>, StoreError> {
        // insertion order == created_at ascending
        Ok(self
            .logs
            .read()
            .iter()
            .filter(|l| l.workflow_instance_id == workflow_id)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(name: &str) -> WorkflowInstance {
        WorkflowInstance {
            id: Uuid::now_v7(),
            workflow_name: name.to_string(),
            status: WorkflowStatus::Pending,
            current_input: Some("{}".to_string()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_workflow() {
        let store = InMemoryWorkflowStore::new();
        let wf = instance("test_workflow");

        store.create_workflow(&wf).await.unwrap();

        let fetched = store.workflow_by_id(wf.id).await.unwrap();
        assert_eq!(fetched.workflow_name, "test_workflow");
        assert_eq!(fetched.status, WorkflowStatus::Pending);
    }

    #[tokio::test]
    async fn test_missing_workflow() {
        let store = InMemoryWorkflowStore::new();
        let result = store.workflow_by_id(Uuid::now_v7()).await;
        assert!(matches!(result, Err(StoreError::WorkflowNotFound(_))));
    }

    #[tokio::test]
    async fn test_claim_flips_status_in_id_order() {
        let store = InMemoryWorkflowStore::new();
        let wf = instance("test");
        store.create_workflow(&wf).await.unwrap();

        for name in ["a", "b", "c"] {
            store
                .create_task(NewTask {
                    workflow_instance_id: wf.id,
                    task_name: name.to_string(),
                    input_payload: None,
                })
                .await
                .unwrap();
        }

        let claimed = store.claim_pending_tasks(2).await.unwrap();
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].task_name, "a");
        assert_eq!(claimed[1].task_name, "b");
        assert!(claimed.iter().all(|t| t.status == TaskStatus::InProgress));
        assert_eq!(store.pending_task_count(), 1);

        // A second claim must not see the already-leased tasks
        let claimed = store.claim_pending_tasks(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].task_name, "c");
    }

    #[tokio::test]
    async fn test_claim_marks_retried_task_as_retrying() {
        let store = InMemoryWorkflowStore::new();
        let wf = instance("test");
        store.create_workflow(&wf).await.unwrap();

        let task = store
            .create_task(NewTask {
                workflow_instance_id: wf.id,
                task_name: "a".to_string(),
                input_payload: None,
            })
            .await
            .unwrap();

        store.update_task_retry_count(task.id, 1).await.unwrap();

        let claimed = store.claim_pending_tasks(1).await.unwrap();
        assert_eq!(claimed[0].status, TaskStatus::Retrying);
        assert_eq!(claimed[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_output_persists() {
        let store = InMemoryWorkflowStore::new();
        let wf = instance("test");
        store.create_workflow(&wf).await.unwrap();

        let task = store
            .create_task(NewTask {
                workflow_instance_id: wf.id,
                task_name: "a".to_string(),
                input_payload: Some("{\"k\":1}".to_string()),
            })
            .await
            .unwrap();

        store
            .update_task_output(task.id, "{\"out\":true}")
            .await
            .unwrap();
        store
            .update_task_status(task.id, TaskStatus::Completed)
            .await
            .unwrap();

        let tasks = store.tasks_by_workflow(wf.id).await.unwrap();
        assert_eq!(tasks[0].output_payload.as_deref(), Some("{\"out\":true}"));
        assert_eq!(tasks[0].status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_reclaim_returns_abandoned_tasks() {
        let store = InMemoryWorkflowStore::new();
        let wf = instance("test");
        store.create_workflow(&wf).await.unwrap();
        store
            .update_workflow_status(wf.id, WorkflowStatus::InProgress)
            .await
            .unwrap();

        let task = store
            .create_task(NewTask {
                workflow_instance_id: wf.id,
                task_name: "a".to_string(),
                input_payload: None,
            })
            .await
            .unwrap();

        // Simulate a worker dying mid-execution
        store.claim_pending_tasks(1).await.unwrap();
        let reclaimed = store.reclaim_stuck_tasks(Duration::ZERO).await.unwrap();
        assert_eq!(reclaimed, vec![task.id]);
        assert_eq!(store.pending_task_count(), 1);
    }

    #[tokio::test]
    async fn test_reclaim_skips_terminal_workflows() {
        let store = InMemoryWorkflowStore::new();
        let wf = instance("test");
        store.create_workflow(&wf).await.unwrap();

        let task = store
            .create_task(NewTask {
                workflow_instance_id: wf.id,
                task_name: "a".to_string(),
                input_payload: None,
            })
            .await
            .unwrap();
        store
            .update_task_status(task.id, TaskStatus::Failed)
            .await
            .unwrap();
        store
            .update_workflow_status(wf.id, WorkflowStatus::Failed)
            .await
            .unwrap();

        let reclaimed = store.reclaim_stuck_tasks(Duration::ZERO).await.unwrap();
        assert!(reclaimed.is_empty());
    }

    #[tokio::test]
    async fn test_list_workflows_newest_first() {
        let store = InMemoryWorkflowStore::new();
        let mut first = instance("first");
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        let second = instance("second");

        store.create_workflow(&first).await.unwrap();
        store.create_workflow(&second).await.unwrap();

        let listed = store.list_workflows(10, 0).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].workflow_name, "second");

        let page = store.list_workflows(1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].workflow_name, "first");

        assert_eq!(store.count_workflows().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_activity_logs_in_append_order() {
        let store = InMemoryWorkflowStore::new();
        let wf = instance("test");
        store.create_workflow(&wf).await.unwrap();

        for event_type in [EventType::TaskStarted, EventType::TaskCompleted] {
            store
                .create_activity_log(NewActivityLog {
                    workflow_instance_id: wf.id,
                    task_name: Some("a".to_string()),
                    event_type,
                    details: None,
                })
                .await
                .unwrap();
        }

        let logs = store.activity_logs_by_workflow(wf.id).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].event_type, EventType::TaskStarted);
        assert_eq!(logs[1].event_type, EventType::TaskCompleted);
    }
}
