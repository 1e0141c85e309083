//! Worker: the polling loop that drives workflow instances
//!
//! One worker runs per process. Every tick it leases a batch of pending
//! tasks (an atomic status flip in the store), fans them out to
//! concurrent task runners, and joins the whole batch before the next
//! tick — bounding in-flight work to `batch_size` and giving the store
//! natural backpressure.

mod orchestrator;
mod runner;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument};

use crate::persistence::WorkflowStore;
use crate::registry::WorkflowRegistry;
use crate::retry::RetryPolicy;

use runner::TaskRunner;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Time between polls of the pending queue
    pub poll_interval: Duration,

    /// Maximum tasks leased (and run concurrently) per tick
    pub batch_size: usize,

    /// Deadline for a single executor invocation
    pub task_timeout: Duration,

    /// Retry policy applied to transient executor failures
    pub retry: RetryPolicy,

    /// Time between stuck-task reclamation sweeps
    pub stale_reclaim_interval: Duration,

    /// Age at which an abandoned task becomes reclaimable
    pub stale_threshold: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            task_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            stale_reclaim_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(60),
        }
    }
}

impl WorkerConfig {
    /// Set the poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the batch size (minimum 1)
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Set the per-task execution timeout
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the reclamation sweep interval
    pub fn with_stale_reclaim_interval(mut self, interval: Duration) -> Self {
        self.stale_reclaim_interval = interval;
        self
    }

    /// Set the abandoned-task age threshold
    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }
}

/// The polling worker
///
/// # Example
///
/// ```ignore
/// let worker = Arc::new(Worker::new(store, registry, WorkerConfig::default()));
/// let handle = tokio::spawn({
///     let worker = worker.clone();
///     async move { worker.run().await }
/// });
///
/// // ... later, graceful shutdown
/// worker.shutdown();
/// handle.await?;
/// ```
pub struct Worker {
    store: Arc<dyn WorkflowStore>,
    registry: Arc<WorkflowRegistry>,
    config: WorkerConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Worker {
    /// Create a new worker
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        registry: Arc<WorkflowRegistry>,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            store,
            registry,
            config,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Request a graceful shutdown
    ///
    /// The poll loop stops leasing immediately; in-flight runners observe
    /// the signal and `run()` returns once the current batch joins.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Run the poll loop until shutdown
    #[instrument(skip(self))]
    pub async fn run(&self) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            task_timeout_ms = self.config.task_timeout.as_millis() as u64,
            max_retries = self.config.retry.max_retries,
            "worker started, waiting for tasks"
        );

        let mut poll = tokio::time::interval(self.config.poll_interval);
        // The first reclaim tick fires immediately, recovering tasks a
        // previous process left behind before any new lease happens.
        let mut reclaim = tokio::time::interval(self.config.stale_reclaim_interval);
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                _ = reclaim.tick() => self.reclaim().await,
                _ = poll.tick() => self.process_batch().await,
                _ = shutdown_rx.changed() => {
                    info!("worker stopping");
                    break;
                }
            }
        }
    }

    /// Lease one batch and run it to completion
    async fn process_batch(&self) {
        let tasks = match self
            .store
            .claim_pending_tasks(self.config.batch_size as i64)
            .await
        {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "failed to lease pending tasks");
                return;
            }
        };

        if tasks.is_empty() {
            return;
        }

        info!(count = tasks.len(), "leased pending tasks");

        let mut batch = JoinSet::new();
        for task in tasks {
            let runner = TaskRunner::new(
                Arc::clone(&self.store),
                Arc::clone(&self.registry),
                self.config.task_timeout,
                self.config.retry.clone(),
                self.shutdown_rx.clone(),
            );
            batch.spawn(async move { runner.execute(task).await });
        }

        // Join the whole batch before the next lease
        while let Some(result) = batch.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "task runner panicked");
            }
        }
    }

    /// Return abandoned tasks to the pending queue
    async fn reclaim(&self) {
        match self
            .store
            .reclaim_stuck_tasks(self.config.stale_threshold)
            .await
        {
            Ok(reclaimed) if !reclaimed.is_empty() => {
                info!(count = reclaimed.len(), "reclaimed stuck tasks");
            }
            Ok(_) => debug!("no stuck tasks to reclaim"),
            Err(e) => error!(error = %e, "stuck task reclamation failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.task_timeout, Duration::from_secs(30));
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_config_builder() {
        let config = WorkerConfig::default()
            .with_poll_interval(Duration::from_millis(100))
            .with_batch_size(0)
            .with_task_timeout(Duration::from_secs(5))
            .with_stale_threshold(Duration::from_secs(10));

        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.batch_size, 1, "batch size is clamped to 1");
        assert_eq!(config.task_timeout, Duration::from_secs(5));
        assert_eq!(config.stale_threshold, Duration::from_secs(10));
    }
}
