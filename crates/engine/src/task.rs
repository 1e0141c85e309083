//! Task execution surface: the context handed to executors and the
//! executor function type.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::watch;
use uuid::Uuid;

/// Error returned by a task executor
///
/// Every executor error is treated as transient by the engine and is
/// subject to the retry policy; idempotency is the executor author's
/// responsibility.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TaskError {
    pub message: String,
}

impl TaskError {
    /// Create a new task error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// Result of one executor invocation
///
/// `Ok(Some(value))` becomes the task's output payload, threaded into
/// the next task's input; `Ok(None)` propagates an absent payload.
pub type TaskResult = Result<Option<serde_json::Value>, TaskError>;

/// Boxed executor future
pub type TaskFuture = Pin<Box<dyn Future<Output = TaskResult> + Send>>;

/// User-supplied function that performs the work of one task
pub type TaskExecutor = Arc<dyn Fn(TaskContext) -> TaskFuture + Send + Sync>;

/// Context provided to an executor for one invocation
///
/// Carries the task's identity, the raw input payload, and a shutdown
/// receiver so long-running executors can observe cancellation:
///
/// ```ignore
/// tokio::select! {
///     result = do_work() => result,
///     _ = ctx.cancelled() => Err(TaskError::new("cancelled")),
/// }
/// ```
#[derive(Clone)]
pub struct TaskContext {
    /// Workflow instance that owns this task
    pub workflow_id: Uuid,

    /// Persisted task id
    pub task_id: i64,

    /// Task name within the workflow definition
    pub task_name: String,

    /// Retry count at lease time (0 on the first attempt)
    pub retry_count: i32,

    input: Option<String>,
    shutdown: watch::Receiver<bool>,
}

impl TaskContext {
    /// Create a new task context
    pub fn new(
        workflow_id: Uuid,
        task_id: i64,
        task_name: String,
        retry_count: i32,
        input: Option<String>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            workflow_id,
            task_id,
            task_name,
            retry_count,
            input,
            shutdown,
        }
    }

    /// The raw input payload, exactly as stored
    pub fn input_raw(&self) -> Option<&str> {
        self.input.as_deref()
    }

    /// Deserialize the input payload
    pub fn input<T: DeserializeOwned>(&self) -> Result<T, TaskError> {
        let raw = self
            .input
            .as_deref()
            .ok_or_else(|| TaskError::new("task has no input payload"))?;
        Ok(serde_json::from_str(raw)?)
    }

    /// Whether shutdown has been requested
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves when shutdown is requested
    pub async fn cancelled(&self) {
        let mut shutdown = self.shutdown.clone();
        loop {
            if *shutdown.borrow() {
                return;
            }
            // A closed channel means the worker is gone; treat as cancelled
            if shutdown.changed().await.is_err() {
                return;
            }
        }
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("workflow_id", &self.workflow_id)
            .field("task_id", &self.task_id)
            .field("task_name", &self.task_name)
            .field("retry_count", &self.retry_count)
            .field("input", &self.input)
            .finish()
    }
}
