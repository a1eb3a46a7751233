//! Job repository over Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::debug;

use vforge_models::{Job, JobId, JobStatus};

use crate::error::{DbError, DbResult};
use crate::store::JobStore;

/// Job repository.
#[derive(Clone)]
pub struct PgJobRepo {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    user_id: String,
    source_url: String,
    profiles: serde_json::Value,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    progress: i16,
    error: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = DbError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status: JobStatus = serde_json::from_value(serde_json::Value::String(row.status))
            .map_err(|e| DbError::decode(format!("job status: {e}")))?;
        let profiles: Vec<String> = serde_json::from_value(row.profiles)
            .map_err(|e| DbError::decode(format!("job profiles: {e}")))?;

        Ok(Job {
            id: JobId::from(row.id),
            user_id: row.user_id,
            source_url: row.source_url,
            profiles,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            progress: row.progress.clamp(0, 100) as u8,
            error: row.error,
        })
    }
}

impl PgJobRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobRepo {
    async fn insert_job(&self, job: &Job) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs
                (id, user_id, source_url, profiles, status, created_at,
                 updated_at, started_at, finished_at, progress, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(job.id.as_str())
        .bind(&job.user_id)
        .bind(&job.source_url)
        .bind(serde_json::to_value(&job.profiles)?)
        .bind(job.status.as_str())
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.progress as i16)
        .bind(&job.error)
        .execute(&self.pool)
        .await?;

        debug!(job_id = %job.id, "Inserted job");
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> DbResult<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM jobs WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::try_from).transpose()
    }

    async fn mark_job_running(&self, id: &JobId) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'running', started_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_job_progress(&self, id: &JobId, progress: u8) -> DbResult<()> {
        // Progress only moves forward; late snapshots from slow segments
        // must not walk it back.
        sqlx::query(
            r#"
            UPDATE jobs
            SET progress = GREATEST(progress, $2), updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id.as_str())
        .bind(progress.min(100) as i16)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn complete_job(&self, id: &JobId) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', progress = 100,
                finished_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn fail_job(&self, id: &JobId, reason: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', error = $2,
                finished_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(id.as_str())
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn cancel_job(&self, id: &JobId) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'cancelled', finished_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_job(&self, id: &JobId) -> DbResult<()> {
        sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl PgJobRepo {
    /// Jobs for a user, newest first.
    pub async fn jobs_for_user(&self, user_id: &str, limit: i64) -> DbResult<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT * FROM jobs WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    /// Count jobs by status, for operational visibility.
    pub async fn count_by_status(&self, status: &str) -> DbResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM jobs WHERE status = $1")
            .bind(status)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }
}
