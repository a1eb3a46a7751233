//! Plugin host error types.

use std::path::PathBuf;
use thiserror::Error;

pub type PluginResult<T> = Result<T, PluginError>;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Plugin directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Invalid manifest {path}: {message}")]
    InvalidManifest { path: PathBuf, message: String },

    #[error("Plugin binary missing for {id}: {path}")]
    BinaryMissing { id: String, path: PathBuf },

    #[error("Handshake with plugin {id} failed: {message}")]
    HandshakeFailed { id: String, message: String },

    #[error("Transport error for plugin {id}: {source}")]
    Transport {
        id: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    pub fn invalid_manifest(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidManifest {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn handshake_failed(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HandshakeFailed {
            id: id.into(),
            message: message.into(),
        }
    }
}
