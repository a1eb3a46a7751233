//! Task record and status machine.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::job::JobId;

/// Error parsing a task enum from its wire string.
#[derive(Debug, Clone, Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

/// Default attempt cap before a task is terminally failed.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Unique identifier for a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a new random task ID.
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

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of a worker process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct WorkerId(pub String);

impl WorkerId {
    /// Generate a fresh worker ID.
    pub fn new() -> Self {
        Self(format!("worker-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type of task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Probe source metadata and keyframes
    Probe,
    /// Transcode one segment (or the whole input) with one profile
    Transcode,
    /// Concat-stitch segment outputs
    Stitch,
    /// Write an HLS master playlist
    Manifest,
    /// Republish a finished file through a publisher plugin
    Restream,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Probe => "probe",
            TaskType::Transcode => "transcode",
            TaskType::Stitch => "stitch",
            TaskType::Manifest => "manifest",
            TaskType::Restream => "restream",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "probe" => Ok(TaskType::Probe),
            "transcode" => Ok(TaskType::Transcode),
            "stitch" => Ok(TaskType::Stitch),
            "manifest" => Ok(TaskType::Manifest),
            "restream" => Ok(TaskType::Restream),
            other => Err(UnknownVariant {
                kind: "task type",
                value: other.to_string(),
            }),
        }
    }
}

/// Task status.
///
/// Status moves strictly forward through
/// pending -> assigned -> running -> completed | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Assigned => 1,
            TaskStatus::Running => 2,
            TaskStatus::Completed | TaskStatus::Failed => 3,
        }
    }

    /// Whether a transition to `next` moves the status strictly forward.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "assigned" => Ok(TaskStatus::Assigned),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(UnknownVariant {
                kind: "task status",
                value: other.to_string(),
            }),
        }
    }
}

/// The smallest unit of work dispatched to a single worker invocation.
///
/// The serialised task record is the dispatch-queue payload.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Task {
    /// Unique task ID
    pub id: TaskId,

    /// Owning job
    pub job_id: JobId,

    /// Task type
    pub task_type: TaskType,

    /// Current status
    #[serde(default)]
    pub status: TaskStatus,

    /// Opaque parameters, interpreted per task type
    pub params: serde_json::Value,

    /// Opaque result, written by the worker on completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Number of failed attempts observed so far
    #[serde(default)]
    pub attempts: u32,

    /// Attempt cap before the task fails terminally
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Worker that claimed the task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_worker: Option<WorkerId>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Task {
    /// Create a new pending task.
    pub fn new(job_id: JobId, task_type: TaskType, params: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            job_id,
            task_type,
            status: TaskStatus::Pending,
            params,
            result: None,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            assigned_worker: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Override the attempt cap.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Assign the task to a worker.
    pub fn assign(mut self, worker: WorkerId) -> Self {
        self.status = TaskStatus::Assigned;
        self.assigned_worker = Some(worker);
        self.updated_at = Utc::now();
        self
    }

    /// Mark the task as running.
    pub fn run(mut self) -> Self {
        self.status = TaskStatus::Running;
        self.updated_at = Utc::now();
        self
    }

    /// Mark the task as completed with its result payload.
    pub fn complete(mut self, result: serde_json::Value) -> Self {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.updated_at = Utc::now();
        self
    }

    /// Mark the task as failed.
    pub fn fail(mut self) -> Self {
        self.status = TaskStatus::Failed;
        self.updated_at = Utc::now();
        self
    }

    /// Whether another delivery attempt is allowed.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_moves_strictly_forward() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Assigned));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Assigned.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));

        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Assigned.can_transition_to(TaskStatus::Assigned));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Running));
    }

    #[test]
    fn test_task_round_trip() {
        let task = Task::new(
            JobId::new(),
            TaskType::Probe,
            json!({"url": "https://example.com/in.mp4"}),
        );

        let payload = serde_json::to_string(&task).unwrap();
        let parsed: Task = serde_json::from_str(&payload).unwrap();

        assert_eq!(parsed.id, task.id);
        assert_eq!(parsed.task_type, TaskType::Probe);
        assert_eq!(parsed.status, TaskStatus::Pending);
        assert_eq!(parsed.max_attempts, DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn test_retry_accounting() {
        let mut task = Task::new(JobId::new(), TaskType::Transcode, json!({}));
        assert!(task.can_retry());

        task.attempts = task.max_attempts;
        assert!(!task.can_retry());
    }

    #[test]
    fn test_task_type_parse() {
        assert_eq!("stitch".parse::<TaskType>().unwrap(), TaskType::Stitch);
        assert!("reticulate".parse::<TaskType>().is_err());
    }
}
