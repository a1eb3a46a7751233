//! Job record and state machine.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job accepted, probe not yet dispatched or completed
    #[default]
    Pending,
    /// Tasks are executing
    Running,
    /// Stitch task completed
    Completed,
    /// A constituent task failed terminally
    Failed,
    /// Cancelled by the user
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-facing unit of work, decomposed into a graph of tasks.
///
/// Jobs are created by the orchestrator on submit and mutated only by the
/// orchestrator in response to task events.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Owning user
    pub user_id: String,

    /// Source media URL
    pub source_url: String,

    /// Requested profile names, in order
    pub profiles: Vec<String>,

    /// Current status
    #[serde(default)]
    pub status: JobStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Started at timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Finished at timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Progress (0-100)
    #[serde(default)]
    pub progress: u8,

    /// Failure reason (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(
        user_id: impl Into<String>,
        source_url: impl Into<String>,
        profiles: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            user_id: user_id.into(),
            source_url: source_url.into(),
            profiles,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            progress: 0,
            error: None,
        }
    }

    /// Mark the job as running.
    pub fn start(mut self) -> Self {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        self.updated_at = Utc::now();
        self
    }

    /// Mark the job as completed.
    pub fn complete(mut self) -> Self {
        self.status = JobStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.updated_at = Utc::now();
        self.progress = 100;
        self
    }

    /// Mark the job as failed.
    pub fn fail(mut self, reason: impl Into<String>) -> Self {
        self.status = JobStatus::Failed;
        self.error = Some(reason.into());
        self.finished_at = Some(Utc::now());
        self.updated_at = Utc::now();
        self
    }

    /// Mark the job as cancelled.
    pub fn cancel(mut self) -> Self {
        self.status = JobStatus::Cancelled;
        self.finished_at = Some(Utc::now());
        self.updated_at = Utc::now();
        self
    }

    /// Update progress.
    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = progress.min(100);
        self.updated_at = Utc::now();
        self
    }
}
