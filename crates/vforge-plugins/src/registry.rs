//! Typed plugin registry.
//!
//! One collection per capability; lookups return an optional cloned client.
//! A missing plugin is an expected condition, not an error.

use std::collections::HashMap;

use tonic::transport::Channel;

use crate::proto::auth_service_client::AuthServiceClient;
use crate::proto::encoder_service_client::EncoderServiceClient;
use crate::proto::live_service_client::LiveServiceClient;
use crate::proto::publisher_service_client::PublisherServiceClient;
use crate::proto::storage_service_client::StorageServiceClient;

pub type AuthClient = AuthServiceClient<Channel>;
pub type StorageClient = StorageServiceClient<Channel>;
pub type EncoderClient = EncoderServiceClient<Channel>;
pub type LiveClient = LiveServiceClient<Channel>;
pub type PublisherClient = PublisherServiceClient<Channel>;

/// Typed maps from plugin id to RPC client.
///
/// Clients are cheap to clone (they share the underlying channel) and safe
/// for concurrent use across tasks.
#[derive(Default)]
pub struct PluginRegistry {
    auth: HashMap<String, AuthClient>,
    storage: HashMap<String, StorageClient>,
    encoder: HashMap<String, EncoderClient>,
    live: HashMap<String, LiveClient>,
    publisher: HashMap<String, PublisherClient>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_auth(&mut self, id: impl Into<String>, client: AuthClient) {
        self.auth.insert(id.into(), client);
    }

    pub fn insert_storage(&mut self, id: impl Into<String>, client: StorageClient) {
        self.storage.insert(id.into(), client);
    }

    pub fn insert_encoder(&mut self, id: impl Into<String>, client: EncoderClient) {
        self.encoder.insert(id.into(), client);
    }

    pub fn insert_live(&mut self, id: impl Into<String>, client: LiveClient) {
        self.live.insert(id.into(), client);
    }

    pub fn insert_publisher(&mut self, id: impl Into<String>, client: PublisherClient) {
        self.publisher.insert(id.into(), client);
    }

    pub fn auth(&self, id: &str) -> Option<AuthClient> {
        self.auth.get(id).cloned()
    }

    pub fn storage(&self, id: &str) -> Option<StorageClient> {
        self.storage.get(id).cloned()
    }

    pub fn encoder(&self, id: &str) -> Option<EncoderClient> {
        self.encoder.get(id).cloned()
    }

    pub fn live(&self, id: &str) -> Option<LiveClient> {
        self.live.get(id).cloned()
    }

    pub fn publisher(&self, id: &str) -> Option<PublisherClient> {
        self.publisher.get(id).cloned()
    }

    /// Any registered storage plugin, when the caller does not care which.
    pub fn any_storage(&self) -> Option<StorageClient> {
        self.storage.values().next().cloned()
    }

    /// Any registered live plugin.
    pub fn any_live(&self) -> Option<LiveClient> {
        self.live.values().next().cloned()
    }

    /// Registered ids per capability, for diagnostics.
    pub fn summary(&self) -> Vec<(&'static str, Vec<String>)> {
        fn ids<V>(map: &HashMap<String, V>) -> Vec<String> {
            let mut ids: Vec<String> = map.keys().cloned().collect();
            ids.sort();
            ids
        }

        vec![
            ("auth", ids(&self.auth)),
            ("storage", ids(&self.storage)),
            ("encoder", ids(&self.encoder)),
            ("live", ids(&self.live)),
            ("publisher", ids(&self.publisher)),
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.auth.is_empty()
            && self.storage.is_empty()
            && self.encoder.is_empty()
            && self.live.is_empty()
            && self.publisher.is_empty()
    }
}
