//! Shared data models for the VForge platform.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and their constituent tasks
//! - Task parameter and result payloads
//! - Probe results and derived media segments
//! - Named transcoding profiles
//! - Task-event messages carried on the event subject
//! - Live-stream lifecycle and telemetry contracts

pub mod event;
pub mod job;
pub mod live;
pub mod params;
pub mod probe;
pub mod profile;
pub mod segment;
pub mod submit;
pub mod task;

// Re-export common types
pub use event::{JobCancelledEvent, ProgressUpdate, TaskEvent, TaskEventKind};
pub use job::{Job, JobId, JobStatus};
pub use live::{
    StreamLifecycleAction, StreamLifecycleEvent, StreamTelemetry, LIVE_POLL_TIMEOUT_SECS,
    PLUGIN_LOOKUP_TIMEOUT_SECS,
};
pub use params::{
    ManifestParams, ManifestVariant, ProbeParams, RestreamParams, RestreamOutput, StitchParams,
    TranscodeOutput, TranscodeParams,
};
pub use probe::{CodecType, ProbeResult, StreamInfo};
pub use profile::Profile;
pub use segment::Segment;
pub use submit::SubmitJobRequest;
pub use task::{Task, TaskId, TaskStatus, TaskType, UnknownVariant, WorkerId};
