//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Work directory for localised inputs and intermediate outputs,
    /// sub-treed per task id
    pub work_dir: PathBuf,
    /// Plugin directory; empty registry when unset or missing
    pub plugin_dir: Option<PathBuf>,
    /// Hard bound on one task execution
    pub task_timeout: Duration,
    /// How often to scan for stale dispatch messages (crash recovery)
    pub claim_interval: Duration,
    /// Progress snapshots buffered between encoder and publisher before the
    /// drop policy kicks in
    pub progress_buffer: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/vforge"),
            plugin_dir: None,
            task_timeout: Duration::from_secs(3600),
            claim_interval: Duration::from_secs(60),
            progress_buffer: 8,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            plugin_dir: std::env::var("WORKER_PLUGIN_DIR").ok().map(PathBuf::from),
            task_timeout: Duration::from_secs(
                std::env::var("WORKER_TASK_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
            claim_interval: Duration::from_secs(
                std::env::var("WORKER_CLAIM_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            progress_buffer: std::env::var("WORKER_PROGRESS_BUFFER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.progress_buffer),
        }
    }
}
