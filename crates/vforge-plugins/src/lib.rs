//! Subprocess plugin host for the VForge platform.
//!
//! Plugins are standalone binaries described by a TOML manifest. The host
//! launches each binary, reads a one-line handshake from its stdout to learn
//! the gRPC address, and inserts a typed client into the registry under the
//! plugin's id. Missing plugins are an expected condition: registry lookups
//! return `Option`.

pub mod error;
pub mod host;
pub mod manifest;
pub mod registry;

/// Generated gRPC bindings.
pub mod proto {
    tonic::include_proto!("vforge.plugins");
}

pub use error::{PluginError, PluginResult};
pub use host::{PluginHost, HANDSHAKE_TIMEOUT_SECS};
pub use manifest::{discover_plugins, DiscoveredPlugin, PluginManifest, PluginType};
pub use registry::{
    AuthClient, EncoderClient, LiveClient, PluginRegistry, PublisherClient, StorageClient,
};
