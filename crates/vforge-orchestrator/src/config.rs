//! Orchestrator configuration.

use std::time::Duration;

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Attempt cap applied to created tasks
    pub task_max_attempts: u32,
    /// Base URL under which job outputs are placed
    pub output_base: String,
    /// Create an HLS manifest task after stitching
    pub emit_hls_manifest: bool,
    /// Events consumed per poll
    pub event_batch_size: usize,
    /// Poll block time
    pub event_block: Duration,
    /// How often to claim events from dead replicas
    pub claim_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            task_max_attempts: 3,
            output_base: "s3://vforge-media".to_string(),
            emit_hls_manifest: false,
            event_batch_size: 16,
            event_block: Duration::from_secs(1),
            claim_interval: Duration::from_secs(60),
        }
    }
}

impl OrchestratorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            task_max_attempts: std::env::var("TASK_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.task_max_attempts),
            output_base: std::env::var("OUTPUT_BASE").unwrap_or(defaults.output_base),
            emit_hls_manifest: std::env::var("EMIT_HLS_MANIFEST")
                .ok()
                .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.emit_hls_manifest),
            event_batch_size: std::env::var("ORCH_EVENT_BATCH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.event_batch_size),
            event_block: Duration::from_millis(
                std::env::var("ORCH_EVENT_BLOCK_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
            claim_interval: Duration::from_secs(
                std::env::var("ORCH_CLAIM_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
        }
    }
}
