//! Store traits and the Postgres-backed implementation handle.
//!
//! The orchestrator talks to these traits rather than to sqlx directly, so
//! its state machine can be exercised against in-memory fakes.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use vforge_models::{Job, JobId, Task, TaskId, TaskType, WorkerId};

use crate::error::DbResult;
use crate::jobs::PgJobRepo;
use crate::tasks::PgTaskRepo;

/// Job persistence operations.
///
/// Transition methods are compare-and-set: they return whether a row
/// actually changed, and callers must act only when it did.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: &Job) -> DbResult<()>;
    async fn get_job(&self, id: &JobId) -> DbResult<Option<Job>>;
    /// pending -> running, stamping `started_at`.
    async fn mark_job_running(&self, id: &JobId) -> DbResult<bool>;
    async fn set_job_progress(&self, id: &JobId, progress: u8) -> DbResult<()>;
    /// running -> completed.
    async fn complete_job(&self, id: &JobId) -> DbResult<bool>;
    /// Any non-terminal state -> failed.
    async fn fail_job(&self, id: &JobId, reason: &str) -> DbResult<bool>;
    /// pending|running -> cancelled.
    async fn cancel_job(&self, id: &JobId) -> DbResult<bool>;
    async fn delete_job(&self, id: &JobId) -> DbResult<()>;
}

/// Task persistence operations.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert_task(&self, task: &Task) -> DbResult<()>;
    async fn get_task(&self, id: &TaskId) -> DbResult<Option<Task>>;
    /// pending -> assigned, recording the claiming worker.
    async fn mark_task_assigned(&self, id: &TaskId, worker: &WorkerId) -> DbResult<bool>;
    /// pending|assigned -> running.
    async fn mark_task_running(&self, id: &TaskId) -> DbResult<bool>;
    /// Non-terminal -> completed with the result payload. Returns false if
    /// the task already reached a terminal state, which is how duplicate
    /// `completed` events are detected.
    async fn complete_task(&self, id: &TaskId, result: &serde_json::Value) -> DbResult<bool>;
    /// Increment the attempts counter on a non-terminal task, returning the
    /// new `(attempts, max_attempts)` when the row changed.
    async fn record_task_failure(&self, id: &TaskId) -> DbResult<Option<(u32, u32)>>;
    /// Non-terminal -> failed.
    async fn mark_task_failed(&self, id: &TaskId) -> DbResult<bool>;
    /// Tasks of `task_type` under `job_id` not yet in a terminal state.
    async fn count_open_siblings(&self, job_id: &JobId, task_type: TaskType) -> DbResult<u64>;
    /// Completed tasks of `task_type` under `job_id`.
    async fn completed_tasks(&self, job_id: &JobId, task_type: TaskType) -> DbResult<Vec<Task>>;
    async fn tasks_for_job(&self, job_id: &JobId) -> DbResult<Vec<Task>>;
}

/// Handle over a Postgres connection pool.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to the database.
    pub async fn connect(database_url: &str) -> DbResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        info!("Connected to metadata store");
        Ok(Self { pool })
    }

    /// Connect using `DATABASE_URL`.
    pub async fn from_env() -> DbResult<Self> {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/vforge".to_string());
        Self::connect(&url).await
    }

    /// Job repository.
    pub fn jobs(&self) -> PgJobRepo {
        PgJobRepo::new(self.pool.clone())
    }

    /// Task repository.
    pub fn tasks(&self) -> PgTaskRepo {
        PgTaskRepo::new(self.pool.clone())
    }
}
