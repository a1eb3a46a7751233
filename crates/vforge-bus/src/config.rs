//! Bus configuration.

use std::time::Duration;

/// Bus configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream carrying serialised tasks (work-queue semantics)
    pub dispatch_stream: String,
    /// Consumer group of the worker pool
    pub dispatch_group: String,
    /// Stream carrying task events (durable fan-in to the orchestrator)
    pub events_stream: String,
    /// Consumer group of the orchestrator replicas
    pub events_group: String,
    /// Dead letter stream
    pub dlq_stream: String,
    /// Max deliveries before a dispatch message is dead-lettered
    pub max_deliveries: u32,
    /// Idle time after which an unacked message may be claimed by another
    /// consumer
    pub visibility_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            dispatch_stream: "vforge:dispatch".to_string(),
            dispatch_group: "vforge:workers".to_string(),
            events_stream: "vforge:events".to_string(),
            events_group: "vforge:orchestrators".to_string(),
            dlq_stream: "vforge:dlq".to_string(),
            max_deliveries: 3,
            visibility_timeout: Duration::from_secs(600),
        }
    }
}

impl BusConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            dispatch_stream: std::env::var("BUS_DISPATCH_STREAM")
                .unwrap_or(defaults.dispatch_stream),
            dispatch_group: std::env::var("BUS_DISPATCH_GROUP").unwrap_or(defaults.dispatch_group),
            events_stream: std::env::var("BUS_EVENTS_STREAM").unwrap_or(defaults.events_stream),
            events_group: std::env::var("BUS_EVENTS_GROUP").unwrap_or(defaults.events_group),
            dlq_stream: std::env::var("BUS_DLQ_STREAM").unwrap_or(defaults.dlq_stream),
            max_deliveries: std::env::var("BUS_MAX_DELIVERIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_deliveries),
            visibility_timeout: Duration::from_secs(
                std::env::var("BUS_VISIBILITY_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
        }
    }
}
