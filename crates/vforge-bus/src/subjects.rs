//! Pub/Sub channel naming.

/// Fan-out mirror of the durable task-event stream.
pub const JOBS_EVENTS_CHANNEL: &str = "jobs.events";

/// Channel for a lifecycle notification, e.g. `events.stream.started`,
/// `events.job.cancelled`.
pub fn lifecycle_channel(domain: &str, action: &str) -> String {
    format!("events.{domain}.{action}")
}

/// Channel carrying periodic telemetry for one live stream.
pub fn telemetry_channel(stream_id: &str) -> String {
    format!("live.telemetry.{stream_id}")
}
