//! Plugin subprocess supervision.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tonic::transport::{Channel, Endpoint};
use tracing::{error, info, warn};

use crate::error::{PluginError, PluginResult};
use crate::manifest::{discover_plugins, DiscoveredPlugin, PluginType};
use crate::proto::auth_service_client::AuthServiceClient;
use crate::proto::encoder_service_client::EncoderServiceClient;
use crate::proto::live_service_client::LiveServiceClient;
use crate::proto::publisher_service_client::PublisherServiceClient;
use crate::proto::storage_service_client::StorageServiceClient;
use crate::registry::PluginRegistry;

/// Bound on the stdout handshake of a freshly launched plugin, seconds.
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// A launched plugin subprocess.
struct PluginProcess {
    id: String,
    child: Child,
}

/// Launches and supervises plugin subprocesses, exposing their RPC clients
/// through a typed registry.
pub struct PluginHost {
    registry: PluginRegistry,
    processes: tokio::sync::Mutex<Vec<PluginProcess>>,
}

impl PluginHost {
    /// Launch every plugin discovered under `dir`.
    ///
    /// A plugin that fails to launch or handshake is skipped with an error
    /// log; one bad plugin must not prevent the rest from loading.
    pub async fn load(dir: &Path) -> PluginResult<Self> {
        let mut registry = PluginRegistry::new();
        let mut processes = Vec::new();

        for plugin in discover_plugins(dir)? {
            match launch(&plugin, &mut registry).await {
                Ok(process) => {
                    info!(
                        id = %plugin.id,
                        plugin_type = plugin.plugin_type.as_str(),
                        "Loaded plugin"
                    );
                    processes.push(process);
                }
                Err(e) => error!("Failed to load plugin {}: {}", plugin.id, e),
            }
        }

        Ok(Self {
            registry,
            processes: tokio::sync::Mutex::new(processes),
        })
    }

    /// An empty host, for deployments that run without plugins.
    pub fn empty() -> Self {
        Self {
            registry: PluginRegistry::new(),
            processes: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// The typed registry.
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Kill every plugin subprocess.
    pub async fn shutdown(&self) {
        let mut processes = self.processes.lock().await;
        for process in processes.iter_mut() {
            match process.child.kill().await {
                Ok(()) => info!("Stopped plugin {}", process.id),
                Err(e) => warn!("Failed to stop plugin {}: {}", process.id, e),
            }
        }
        processes.clear();
    }
}

/// Launch one plugin binary and register its client.
async fn launch(
    plugin: &DiscoveredPlugin,
    registry: &mut PluginRegistry,
) -> PluginResult<PluginProcess> {
    let mut child = Command::new(&plugin.binary)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| PluginError::handshake_failed(&plugin.id, "stdout not captured"))?;

    // First stdout line is the handshake: CORE|APP|NETWORK|ADDR|PROTOCOL.
    let mut reader = BufReader::new(stdout).lines();
    let line = tokio::time::timeout(
        Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
        reader.next_line(),
    )
    .await
    .map_err(|_| PluginError::handshake_failed(&plugin.id, "handshake timed out"))?
    .map_err(PluginError::Io)?
    .ok_or_else(|| PluginError::handshake_failed(&plugin.id, "plugin exited before handshake"))?;

    let addr =
        parse_handshake(&line).map_err(|msg| PluginError::handshake_failed(&plugin.id, msg))?;

    let channel = connect(&plugin.id, &addr).await?;

    match plugin.plugin_type {
        PluginType::Auth => registry.insert_auth(&plugin.id, AuthServiceClient::new(channel)),
        PluginType::Storage => {
            registry.insert_storage(&plugin.id, StorageServiceClient::new(channel))
        }
        PluginType::Encoder => {
            registry.insert_encoder(&plugin.id, EncoderServiceClient::new(channel))
        }
        PluginType::Live => registry.insert_live(&plugin.id, LiveServiceClient::new(channel)),
        PluginType::Publisher => {
            registry.insert_publisher(&plugin.id, PublisherServiceClient::new(channel))
        }
    }

    Ok(PluginProcess {
        id: plugin.id.clone(),
        child,
    })
}

async fn connect(id: &str, addr: &str) -> PluginResult<Channel> {
    let endpoint = Endpoint::from_shared(format!("http://{addr}"))
        .map_err(|source| PluginError::Transport {
            id: id.to_string(),
            source,
        })?
        .connect_timeout(Duration::from_secs(HANDSHAKE_TIMEOUT_SECS));

    endpoint
        .connect()
        .await
        .map_err(|source| PluginError::Transport {
            id: id.to_string(),
            source,
        })
}

/// Parse a handshake line of the form `1|1|tcp|127.0.0.1:7001|grpc`,
/// returning the address.
fn parse_handshake(line: &str) -> Result<String, String> {
    let fields: Vec<&str> = line.trim().split('|').collect();
    if fields.len() != 5 {
        return Err(format!("expected 5 handshake fields, got {}", fields.len()));
    }
    if fields[0] != "1" {
        return Err(format!("unsupported core protocol version {}", fields[0]));
    }
    if fields[2] != "tcp" {
        return Err(format!("unsupported network {}", fields[2]));
    }
    if fields[4] != "grpc" {
        return Err(format!("unsupported protocol {}", fields[4]));
    }
    if fields[3].is_empty() {
        return Err("empty address".to_string());
    }
    Ok(fields[3].to_string())
}
