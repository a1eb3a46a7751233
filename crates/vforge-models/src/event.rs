//! Task-event messages published on the shared event subject.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::JobId;
use crate::task::{TaskId, WorkerId};

/// Kind of task event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    /// Free-form log line from the handler
    Log,
    /// Progress snapshot
    Progress,
    /// Handler finished; payload is the result JSON
    Completed,
    /// Handler failed; payload carries the error string
    Failed,
}

impl TaskEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskEventKind::Log => "log",
            TaskEventKind::Progress => "progress",
            TaskEventKind::Completed => "completed",
            TaskEventKind::Failed => "failed",
        }
    }
}

/// A task event as carried on the `jobs.events` subject.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TaskEvent {
    /// Task the event belongs to
    pub task_id: TaskId,
    /// Event kind
    pub event: TaskEventKind,
    /// Kind-specific payload
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Publish timestamp
    pub ts: DateTime<Utc>,
    /// Worker that produced the event, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<WorkerId>,
}

impl TaskEvent {
    fn new(task_id: TaskId, event: TaskEventKind, payload: serde_json::Value) -> Self {
        Self {
            task_id,
            event,
            payload,
            ts: Utc::now(),
            worker_id: None,
        }
    }

    /// Attach the producing worker.
    pub fn from_worker(mut self, worker_id: WorkerId) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    /// Build a log event.
    pub fn log(task_id: TaskId, message: impl Into<String>) -> Self {
        Self::new(
            task_id,
            TaskEventKind::Log,
            serde_json::json!({"message": message.into()}),
        )
    }

    /// Build a progress event.
    pub fn progress(task_id: TaskId, update: &ProgressUpdate) -> Self {
        Self::new(
            task_id,
            TaskEventKind::Progress,
            serde_json::to_value(update).unwrap_or_default(),
        )
    }

    /// Build a completed event with the handler result.
    pub fn completed(task_id: TaskId, result: serde_json::Value) -> Self {
        Self::new(task_id, TaskEventKind::Completed, result)
    }

    /// Build a failed event with the error string.
    pub fn failed(task_id: TaskId, error: impl Into<String>) -> Self {
        Self::new(
            task_id,
            TaskEventKind::Failed,
            serde_json::json!({"error": error.into()}),
        )
    }

    /// Extract the error string of a failed event, if present.
    pub fn error_message(&self) -> Option<&str> {
        self.payload.get("error").and_then(|v| v.as_str())
    }
}

/// Progress payload of a transcode task.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ProgressUpdate {
    /// Percent complete (0-100)
    pub percent: f64,
    /// Encoding speed relative to realtime (e.g. 1.5)
    pub speed: f64,
    /// Frames per second
    pub fps: f64,
    /// Bitrate as reported by the encoder, e.g. "4216.3kbits/s"
    pub bitrate: String,
}

/// Payload of the `events.job.cancelled` lifecycle notification.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobCancelledEvent {
    /// Cancelled job
    pub job_id: JobId,
    /// Cancellation timestamp
    pub ts: DateTime<Utc>,
}

impl JobCancelledEvent {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            ts: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failed_event_carries_error() {
        let event = TaskEvent::failed(TaskId::new(), "ffmpeg exited with status 1");
        assert_eq!(event.event, TaskEventKind::Failed);
        assert_eq!(event.error_message(), Some("ffmpeg exited with status 1"));
    }

    #[test]
    fn test_event_round_trip() {
        let event = TaskEvent::completed(TaskId::new(), json!({"url": "s3://media/out.mp4"}))
            .from_worker(WorkerId::new());

        let payload = serde_json::to_string(&event).unwrap();
        let parsed: TaskEvent = serde_json::from_str(&payload).unwrap();

        assert_eq!(parsed.event, TaskEventKind::Completed);
        assert_eq!(parsed.payload["url"], "s3://media/out.mp4");
        assert!(parsed.worker_id.is_some());
    }

    #[test]
    fn test_kind_serde_snake_case() {
        let s = serde_json::to_string(&TaskEventKind::Progress).unwrap();
        assert_eq!(s, "\"progress\"");
    }
}
