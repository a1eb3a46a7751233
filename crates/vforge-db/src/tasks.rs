//! Task repository over Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::debug;

use vforge_models::{JobId, Task, TaskId, TaskStatus, TaskType, WorkerId};

use crate::error::{DbError, DbResult};
use crate::store::TaskStore;

/// Task repository.
#[derive(Clone)]
pub struct PgTaskRepo {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    job_id: String,
    task_type: String,
    status: String,
    params: serde_json::Value,
    result: Option<serde_json::Value>,
    attempts: i32,
    max_attempts: i32,
    assigned_worker: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = DbError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let task_type: TaskType = row
            .task_type
            .parse()
            .map_err(|e| DbError::decode(format!("task type: {e}")))?;
        let status: TaskStatus = row
            .status
            .parse()
            .map_err(|e| DbError::decode(format!("task status: {e}")))?;

        Ok(Task {
            id: TaskId::from(row.id),
            job_id: JobId::from(row.job_id),
            task_type,
            status,
            params: row.params,
            result: row.result,
            attempts: row.attempts.max(0) as u32,
            max_attempts: row.max_attempts.max(0) as u32,
            assigned_worker: row.assigned_worker.map(WorkerId),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl PgTaskRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for PgTaskRepo {
    async fn insert_task(&self, task: &Task) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks
                (id, job_id, task_type, status, params, result, attempts,
                 max_attempts, assigned_worker, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(task.id.as_str())
        .bind(task.job_id.as_str())
        .bind(task.task_type.as_str())
        .bind(task.status.as_str())
        .bind(&task.params)
        .bind(&task.result)
        .bind(task.attempts as i32)
        .bind(task.max_attempts as i32)
        .bind(task.assigned_worker.as_ref().map(|w| w.as_str()))
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(task_id = %task.id, task_type = %task.task_type, "Inserted task");
        Ok(())
    }

    async fn get_task(&self, id: &TaskId) -> DbResult<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Task::try_from).transpose()
    }

    async fn mark_task_assigned(&self, id: &TaskId, worker: &WorkerId) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'assigned', assigned_worker = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id.as_str())
        .bind(worker.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_task_running(&self, id: &TaskId) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'running', updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'assigned')
            "#,
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete_task(&self, id: &TaskId, result: &serde_json::Value) -> DbResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'completed', result = $2, updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(id.as_str())
        .bind(result)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    async fn record_task_failure(&self, id: &TaskId) -> DbResult<Option<(u32, u32)>> {
        let row = sqlx::query(
            r#"
            UPDATE tasks
            SET attempts = attempts + 1, updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('completed', 'failed')
            RETURNING attempts, max_attempts
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let attempts: i32 = row.try_get("attempts")?;
                let max_attempts: i32 = row.try_get("max_attempts")?;
                Ok(Some((attempts.max(0) as u32, max_attempts.max(0) as u32)))
            }
            None => Ok(None),
        }
    }

    async fn mark_task_failed(&self, id: &TaskId) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'failed', updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_open_siblings(&self, job_id: &JobId, task_type: TaskType) -> DbResult<u64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM tasks
            WHERE job_id = $1 AND task_type = $2
              AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(job_id.as_str())
        .bind(task_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    async fn completed_tasks(&self, job_id: &JobId, task_type: TaskType) -> DbResult<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            r#"
            SELECT * FROM tasks
            WHERE job_id = $1 AND task_type = $2 AND status = 'completed'
            ORDER BY created_at
            "#,
        )
        .bind(job_id.as_str())
        .bind(task_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Task::try_from).collect()
    }

    async fn tasks_for_job(&self, job_id: &JobId) -> DbResult<Vec<Task>> {
        let rows: Vec<TaskRow> =
            sqlx::query_as("SELECT * FROM tasks WHERE job_id = $1 ORDER BY created_at")
                .bind(job_id.as_str())
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(Task::try_from).collect()
    }
}
