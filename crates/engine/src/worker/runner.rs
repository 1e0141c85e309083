//! Per-task execution: timeout enforcement, the success path, and the
//! retry/backoff failure path.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::persistence::{
    EventType, NewActivityLog, Task, TaskStatus, WorkflowStatus, WorkflowStore,
};
use crate::registry::WorkflowRegistry;
use crate::retry::RetryPolicy;
use crate::task::TaskContext;

use super::orchestrator;

/// Runs one leased task end-to-end
///
/// The lease already flipped the task to IN_PROGRESS (or RETRYING), so
/// the runner starts at the activity log and ends either in the
/// orchestrator or in the retry path. Store errors abort the current
/// task — the reclamation sweep picks it up later.
pub(super) struct TaskRunner {
    store: Arc<dyn WorkflowStore>,
    registry: Arc<WorkflowRegistry>,
    task_timeout: Duration,
    retry: RetryPolicy,
    shutdown: watch::Receiver<bool>,
}

impl TaskRunner {
    pub(super) fn new(
        store: Arc<dyn WorkflowStore>,
        registry: Arc<WorkflowRegistry>,
        task_timeout: Duration,
        retry: RetryPolicy,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            registry,
            task_timeout,
            retry,
            shutdown,
        }
    }

    pub(super) async fn execute(&self, task: Task) {
        let retry_count = task.retry_count;
        info!(
            task_name = %task.task_name,
            workflow_id = %task.workflow_instance_id,
            task_id = task.id,
            retry_count,
            "executing task"
        );

        self.append_log(
            &task,
            EventType::TaskStarted,
            json!({
                "task_id": task.id,
                "task_name": task.task_name,
                "workflow_id": task.workflow_instance_id,
                "retry_count": retry_count,
            }),
        )
        .await;

        let workflow = match self.store.workflow_by_id(task.workflow_instance_id).await {
            Ok(workflow) => workflow,
            Err(e) => {
                error!(error = %e, task_id = task.id, "failed to load owning workflow, aborting task");
                return;
            }
        };

        // First task leaving PENDING moves the instance to IN_PROGRESS
        if workflow.status == WorkflowStatus::Pending {
            if let Err(e) = self
                .store
                .update_workflow_status(workflow.id, WorkflowStatus::InProgress)
                .await
            {
                warn!(error = %e, workflow_id = %workflow.id, "failed to mark workflow in progress");
            }
        }

        let Some(executor) = self
            .registry
            .executor(&workflow.workflow_name, &task.task_name)
        else {
            // Not retryable: the registry is immutable for the process lifetime
            error!(
                workflow_name = %workflow.workflow_name,
                task_name = %task.task_name,
                "no executor registered"
            );
            self.fail_terminally(
                &task,
                retry_count,
                &format!("no executor registered for task: {}", task.task_name),
                "Executor not registered",
            )
            .await;
            return;
        };

        let ctx = TaskContext::new(
            workflow.id,
            task.id,
            task.task_name.clone(),
            retry_count,
            task.input_payload.clone(),
            self.shutdown.clone(),
        );

        match tokio::time::timeout(self.task_timeout, executor(ctx)).await {
            Ok(Ok(output)) => self.handle_success(&task, retry_count, output).await,
            Ok(Err(e)) => {
                error!(
                    task_name = %task.task_name,
                    task_id = task.id,
                    error = %e,
                    "task execution failed"
                );
                self.handle_failure(&task, retry_count, &e.to_string()).await;
            }
            Err(_) => {
                error!(
                    task_name = %task.task_name,
                    task_id = task.id,
                    timeout_ms = self.task_timeout.as_millis() as u64,
                    "task execution timed out"
                );
                self.handle_failure(&task, retry_count, "task execution timed out")
                    .await;
            }
        }
    }

    async fn handle_success(
        &self,
        task: &Task,
        retry_count: i32,
        output: Option<serde_json::Value>,
    ) {
        let output_payload = output.map(|v| v.to_string());

        // The output must be durable before COMPLETED: the orchestrator
        // threads it into the next task's input.
        if let Some(ref payload) = output_payload {
            if let Err(e) = self.store.update_task_output(task.id, payload).await {
                error!(error = %e, task_id = task.id, "failed to persist task output, aborting task");
                return;
            }
        }

        if let Err(e) = self
            .store
            .update_task_status(task.id, TaskStatus::Completed)
            .await
        {
            error!(error = %e, task_id = task.id, "failed to complete task");
            return;
        }

        self.append_log(
            task,
            EventType::TaskCompleted,
            json!({
                "task_id": task.id,
                "task_name": task.task_name,
                "workflow_id": task.workflow_instance_id,
                "status": "success",
                "retry_count": retry_count,
            }),
        )
        .await;

        let mut completed = task.clone();
        completed.status = TaskStatus::Completed;
        completed.output_payload = output_payload;
        orchestrator::advance(self.store.as_ref(), &self.registry, &completed).await;
    }

    async fn handle_failure(&self, task: &Task, retry_count: i32, error_message: &str) {
        if self.retry.attempts_exhausted(retry_count.max(0) as u32) {
            warn!(
                task_id = task.id,
                retry_count, "task failed after max retries"
            );
            self.fail_terminally(task, retry_count, error_message, "Max retries exceeded")
                .await;
            return;
        }

        let new_retry_count = retry_count + 1;
        if let Err(e) = self
            .store
            .update_task_retry_count(task.id, new_retry_count)
            .await
        {
            error!(error = %e, task_id = task.id, "failed to update retry count");
            return;
        }

        let backoff = self.retry.delay_for_retry(new_retry_count as u32);

        // FAILED here is a transient marker; the task goes back to
        // PENDING once the backoff elapses.
        if let Err(e) = self
            .store
            .update_task_status(task.id, TaskStatus::Failed)
            .await
        {
            error!(error = %e, task_id = task.id, "failed to mark task for retry");
            return;
        }

        info!(
            task_id = task.id,
            retry_count = new_retry_count,
            backoff_ms = backoff.as_millis() as u64,
            error = error_message,
            "task failed, scheduling retry with exponential backoff"
        );

        self.append_log(
            task,
            EventType::TaskRetry,
            json!({
                "task_id": task.id,
                "task_name": task.task_name,
                "retry_count": new_retry_count,
                "backoff_delay": format!("{backoff:?}"),
                "error": error_message,
            }),
        )
        .await;

        // The backoff holds this runner's batch slot. Shutdown
        // short-circuits the sleep and leaves the FAILED marker for the
        // reclamation sweep after restart.
        if self.sleep_cancellable(backoff).await {
            debug!(task_id = task.id, "shutdown during retry backoff");
            return;
        }

        if let Err(e) = self
            .store
            .update_task_status(task.id, TaskStatus::Pending)
            .await
        {
            error!(error = %e, task_id = task.id, "failed to requeue task after backoff");
        }
    }

    async fn fail_terminally(
        &self,
        task: &Task,
        retry_count: i32,
        error_message: &str,
        reason: &str,
    ) {
        if let Err(e) = self
            .store
            .update_task_status(task.id, TaskStatus::Failed)
            .await
        {
            error!(error = %e, task_id = task.id, "failed to mark task failed");
            return;
        }

        self.append_log(
            task,
            EventType::TaskFailed,
            json!({
                "task_id": task.id,
                "task_name": task.task_name,
                "retry_count": retry_count,
                "reason": reason,
                "error": error_message,
            }),
        )
        .await;

        // A single exhausted task fails the whole instance; linear
        // execution means no sibling is in flight.
        if let Err(e) = self
            .store
            .update_workflow_status(task.workflow_instance_id, WorkflowStatus::Failed)
            .await
        {
            error!(
                error = %e,
                workflow_id = %task.workflow_instance_id,
                "failed to mark workflow failed"
            );
        }
    }

    /// Sleep respecting cancellation; returns true if shutdown fired
    async fn sleep_cancellable(&self, duration: Duration) -> bool {
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = shutdown.changed() => true,
        }
    }

    async fn append_log(&self, task: &Task, event_type: EventType, details: serde_json::Value) {
        let log = NewActivityLog {
            workflow_instance_id: task.workflow_instance_id,
            task_name: Some(task.task_name.clone()),
            event_type,
            details: Some(details.to_string()),
        };
        if let Err(e) = self.store.create_activity_log(log).await {
            error!(error = %e, task_id = task.id, event = %event_type, "failed to append activity log");
        }
    }
}
