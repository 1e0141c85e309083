//! PostgreSQL implementation of WorkflowStore
//!
//! Production persistence with:
//! - Atomic batch leasing via `FOR UPDATE SKIP LOCKED`, safe for
//!   multiple worker processes polling one table
//! - Output payloads persisted before the COMPLETED transition
//! - A reclaim query that returns abandoned tasks to PENDING

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;

/// DDL applied at startup; every statement is idempotent.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS workflow_instances (
        id UUID PRIMARY KEY,
        workflow_name TEXT NOT NULL,
        status TEXT NOT NULL,
        current_input TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id BIGSERIAL PRIMARY KEY,
        workflow_instance_id UUID NOT NULL REFERENCES workflow_instances(id),
        task_name TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'PENDING',
        input_payload TEXT,
        output_payload TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_tasks_status_id ON tasks (status, id)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_workflow ON tasks (workflow_instance_id, id)",
    r#"
    CREATE TABLE IF NOT EXISTS activity_logs (
        id BIGSERIAL PRIMARY KEY,
        workflow_instance_id UUID NOT NULL REFERENCES workflow_instances(id),
        task_name TEXT,
        event_type TEXT NOT NULL,
        details TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_activity_logs_workflow
        ON activity_logs (workflow_instance_id, created_at)
    "#,
];

/// PostgreSQL implementation of WorkflowStore
///
/// # Example
///
/// ```ignore
/// use conveyor_engine::PostgresWorkflowStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/conveyor").await?;
/// let store = PostgresWorkflowStore::new(pool);
/// store.ensure_schema().await?;
/// ```
#[derive(Clone)]
pub struct PostgresWorkflowStore {
    pool: PgPool,
}

impl PostgresWorkflowStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the tables and indexes this store requires
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    error!("Failed to apply schema statement: {}", e);
                    StoreError::Database(e.to_string())
                })?;
        }
        debug!("schema ensured");
        Ok(())
    }
}

fn workflow_from_row(row: &sqlx::postgres::PgRow) -> Result<WorkflowInstance, StoreError> {
    let status: String = row.get("status");
    Ok(WorkflowInstance {
        id: row.get("id"),
        workflow_name: row.get("workflow_name"),
        status: WorkflowStatus::parse(&status)?,
        current_input: row.get("current_input"),
        created_at: row.get("created_at"),
    })
}

fn task_from_row(row: &sqlx::postgres::PgRow) -> Result<Task, StoreError> {
    let status: String = row.get("status");
    Ok(Task {
        id: row.get("id"),
        workflow_instance_id: row.get("workflow_instance_id"),
        task_name: row.get("task_name"),
        status: TaskStatus::parse(&status)?,
        input_payload: row.get("input_payload"),
        output_payload: row.get("output_payload"),
        retry_count: row.get("retry_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn log_from_row(row: &sqlx::postgres::PgRow) -> Result<ActivityLog, StoreError> {
    let event_type: String = row.get("event_type");
    Ok(ActivityLog {
        id: row.get("id"),
        workflow_instance_id: row.get("workflow_instance_id"),
        task_name: row.get("task_name"),
        event_type: EventType::parse(&event_type)?,
        details: row.get("details"),
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl WorkflowStore for PostgresWorkflowStore {
    #[instrument(skip(self, instance), fields(workflow_id = %instance.id))]
    async fn create_workflow(&self, instance: &WorkflowInstance) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_instances (id, workflow_name, status, current_input, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(instance.id)
        .bind(&instance.workflow_name)
        .bind(instance.status.as_str())
        .bind(&instance.current_input)
        .bind(instance.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create workflow: {}", e);
            StoreError::Database(e.to_string())
        })?;

        debug!(workflow_name = %instance.workflow_name, "created workflow");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn workflow_by_id(&self, id: Uuid) -> Result<WorkflowInstance, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_name, status, current_input, created_at
            FROM workflow_instances
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get workflow: {}", e);
            StoreError::Database(e.to_string())
        })?
        .ok_or(StoreError::WorkflowNotFound(id))?;

        workflow_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn update_workflow_status(
        &self,
        id: Uuid,
        status: WorkflowStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE workflow_instances SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to update workflow status: {}", e);
                StoreError::Database(e.to_string())
            })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::WorkflowNotFound(id));
        }

        debug!(%status, "updated workflow status");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_workflows(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WorkflowInstance>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_name, status, current_input, created_at
            FROM workflow_instances
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list workflows: {}", e);
            StoreError::Database(e.to_string())
        })?;

        rows.iter().map(workflow_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn count_workflows(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM workflow_instances")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to count workflows: {}", e);
                StoreError::Database(e.to_string())
            })?;

        Ok(row.get("total"))
    }

    #[instrument(skip(self, task), fields(task_name = %task.task_name))]
    async fn create_task(&self, task: NewTask) -> Result<Task, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO tasks (workflow_instance_id, task_name, status, input_payload)
            VALUES ($1, $2, 'PENDING', $3)
            RETURNING id, workflow_instance_id, task_name, status, input_payload,
                      output_payload, retry_count, created_at, updated_at
            "#,
        )
        .bind(task.workflow_instance_id)
        .bind(&task.task_name)
        .bind(&task.input_payload)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create task: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let created = task_from_row(&row)?;
        debug!(task_id = created.id, "created task");
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn claim_pending_tasks(&self, limit: i64) -> Result<Vec<Task>, StoreError> {
        // SKIP LOCKED keeps concurrent pollers from blocking on (or
        // double-leasing) the same rows; the status flip and the read
        // happen in one statement.
        let rows = sqlx::query(
            r#"
            WITH leased AS (
                SELECT id
                FROM tasks
                WHERE status = 'PENDING'
                ORDER BY id
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE tasks t
            SET status = CASE WHEN t.retry_count > 0 THEN 'RETRYING' ELSE 'IN_PROGRESS' END,
                updated_at = NOW()
            FROM leased
            WHERE t.id = leased.id
            RETURNING t.id, t.workflow_instance_id, t.task_name, t.status, t.input_payload,
                      t.output_payload, t.retry_count, t.created_at, t.updated_at
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to lease tasks: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let mut claimed = rows
            .iter()
            .map(task_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        // UPDATE .. RETURNING does not guarantee row order
        claimed.sort_by_key(|t| t.id);

        if !claimed.is_empty() {
            debug!(count = claimed.len(), "leased tasks");
        }
        Ok(claimed)
    }

    #[instrument(skip(self))]
    async fn tasks_by_workflow(&self, workflow_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_instance_id, task_name, status, input_payload,
                   output_payload, retry_count, created_at, updated_at
            FROM tasks
            WHERE workflow_instance_id = $1
            ORDER BY id
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get tasks: {}", e);
            StoreError::Database(e.to_string())
        })?;

        rows.iter().map(task_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn update_task_status(&self, task_id: i64, status: TaskStatus) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE tasks SET status = $2, updated_at = NOW() WHERE id = $1")
                .bind(task_id)
                .bind(status.as_str())
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    error!("Failed to update task status: {}", e);
                    StoreError::Database(e.to_string())
                })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound(task_id));
        }

        debug!(%status, "updated task status");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_task_retry_count(
        &self,
        task_id: i64,
        retry_count: i32,
    ) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE tasks SET retry_count = $2, updated_at = NOW() WHERE id = $1")
                .bind(task_id)
                .bind(retry_count)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    error!("Failed to update retry count: {}", e);
                    StoreError::Database(e.to_string())
                })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound(task_id));
        }
        Ok(())
    }

    #[instrument(skip(self, output))]
    async fn update_task_output(&self, task_id: i64, output: &str) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE tasks SET output_payload = $2, updated_at = NOW() WHERE id = $1")
                .bind(task_id)
                .bind(output)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    error!("Failed to update task output: {}", e);
                    StoreError::Database(e.to_string())
                })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound(task_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn reclaim_stuck_tasks(&self, stale_after: Duration) -> Result<Vec<i64>, StoreError> {
        // FAILED counts as abandoned only while the workflow is live: a
        // retry marker whose in-process backoff sleeper never came back.
        let rows = sqlx::query(
            r#"
            UPDATE tasks t
            SET status = 'PENDING', updated_at = NOW()
            FROM workflow_instances w
            WHERE w.id = t.workflow_instance_id
              AND w.status NOT IN ('COMPLETED', 'FAILED')
              AND t.status IN ('IN_PROGRESS', 'RETRYING', 'FAILED')
              AND t.updated_at < NOW() - make_interval(secs => $1)
            RETURNING t.id
            "#,
        )
        .bind(stale_after.as_secs_f64())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to reclaim stuck tasks: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    #[instrument(skip(self, log), fields(event_type = %log.event_type))]
    async fn create_activity_log(&self, log: NewActivityLog) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO activity_logs (workflow_instance_id, task_name, event_type, details)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(log.workflow_instance_id)
        .bind(&log.task_name)
        .bind(log.event_type.as_str())
        .bind(&log.details)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create activity log: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn activity_logs_by_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<ActivityLog>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_instance_id, task_name, event_type, details, created_at
            FROM activity_logs
            WHERE workflow_instance_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get activity logs: {}", e);
            StoreError::Database(e.to_string())
        })?;

        rows.iter().map(log_from_row).collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }
}
