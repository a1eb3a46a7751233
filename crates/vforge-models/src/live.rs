//! Live-stream monitoring contract.
//!
//! The live monitor polls the live plugin and publishes these messages; the
//! monitor loop itself lives outside this codebase. These types pin the wire
//! contract for its subscribers.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Bound on one monitor poll of the live plugin, seconds.
pub const LIVE_POLL_TIMEOUT_SECS: u64 = 5;

/// Bound on a plugin registry lookup, seconds.
pub const PLUGIN_LOOKUP_TIMEOUT_SECS: u64 = 10;

/// Lifecycle action of a monitored stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StreamLifecycleAction {
    Started,
    Ended,
}

impl StreamLifecycleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamLifecycleAction::Started => "started",
            StreamLifecycleAction::Ended => "ended",
        }
    }
}

/// Payload of `events.stream.started` / `events.stream.ended`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StreamLifecycleEvent {
    /// Stream identifier assigned by the media server
    pub stream_id: String,
    /// What happened
    pub action: StreamLifecycleAction,
    /// Event timestamp
    pub ts: DateTime<Utc>,
    /// Plugin-specific details (ingest URL, publisher, ...)
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl StreamLifecycleEvent {
    pub fn new(stream_id: impl Into<String>, action: StreamLifecycleAction) -> Self {
        Self {
            stream_id: stream_id.into(),
            action,
            ts: Utc::now(),
            details: serde_json::Value::Null,
        }
    }
}

/// Periodic telemetry published on `live.telemetry.<stream_id>`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StreamTelemetry {
    /// Stream identifier
    pub stream_id: String,
    /// Current frames per second
    pub fps: f64,
    /// Current bitrate, bits/second
    pub bitrate: u64,
    /// Current viewer count
    pub viewers: u64,
    /// Sample timestamp
    pub timestamp: DateTime<Utc>,
}
