//! Worker error types.
//!
//! The failure kind decides the message's fate: permanent errors terminate
//! the dispatch message, everything else nacks and lets the bus redeliver.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Localisation failed: {0}")]
    Localisation(String),

    #[error("Plugin unavailable: {0}")]
    PluginUnavailable(String),

    #[error("Plugin RPC failed: {0}")]
    PluginRpc(String),

    #[error("Task timed out: {0}")]
    Timeout(String),

    #[error("Task cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Media error: {0}")]
    Media(#[from] vforge_media::MediaError),

    #[error("Storage error: {0}")]
    Storage(#[from] vforge_storage::StorageError),

    #[error("Bus error: {0}")]
    Bus(#[from] vforge_bus::BusError),

    #[error("Database error: {0}")]
    Db(#[from] vforge_db::DbError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn localisation(msg: impl Into<String>) -> Self {
        Self::Localisation(msg.into())
    }

    pub fn plugin_unavailable(msg: impl Into<String>) -> Self {
        Self::PluginUnavailable(msg.into())
    }

    pub fn plugin_rpc(msg: impl Into<String>) -> Self {
        Self::PluginRpc(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Permanent failures terminate the dispatch message; retrying a
    /// malformed payload can never succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            WorkerError::Validation(_)
                | WorkerError::Media(vforge_media::MediaError::EmptySegments)
        )
    }

    /// Cancellations and timeouts are logged at info, not error.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            WorkerError::Cancelled
                | WorkerError::Timeout(_)
                | WorkerError::Media(vforge_media::MediaError::Cancelled)
                | WorkerError::Media(vforge_media::MediaError::Timeout(_))
        )
    }
}
