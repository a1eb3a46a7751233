//! S3 client implementation.

use std::path::Path;

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::location::S3Location;

/// Configuration for the S3 client.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3 API endpoint URL
    pub endpoint_url: String,
    /// Access key ID
    pub access_key: String,
    /// Secret access key
    pub secret_key: String,
    /// Region ("auto" works for most S3-compatible stores)
    pub region: String,
}

impl S3Config {
    /// Create config from `S3_ENDPOINT`, `S3_ACCESS_KEY`, `S3_SECRET_KEY`
    /// (and optional `S3_REGION`).
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("S3_ENDPOINT")
                .map_err(|_| StorageError::config_error("S3_ENDPOINT not set"))?,
            access_key: std::env::var("S3_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("S3_ACCESS_KEY not set"))?,
            secret_key: std::env::var("S3_SECRET_KEY")
                .map_err(|_| StorageError::config_error("S3_SECRET_KEY not set"))?,
            region: std::env::var("S3_REGION").unwrap_or_else(|_| "auto".to_string()),
        })
    }
}

/// S3-compatible storage client.
#[derive(Clone)]
pub struct S3Client {
    client: Client,
}

impl S3Client {
    /// Create a new client from configuration.
    pub fn new(config: S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "vforge",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self::new(S3Config::from_env()?))
    }

    /// Download an object to a local file.
    pub async fn download_to(&self, location: &S3Location, dest: &Path) -> StorageResult<()> {
        debug!("Downloading {} to {}", location, dest.display());

        let response = self
            .client
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|e| StorageError::download_failed(format!("{location}: {e}")))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut body = response.body.into_async_read();
        let mut file = tokio::fs::File::create(dest).await?;
        tokio::io::copy(&mut body, &mut file).await?;

        info!("Downloaded {} to {}", location, dest.display());
        Ok(())
    }

    /// Upload a local file to an object location.
    pub async fn upload_file(&self, path: &Path, location: &S3Location) -> StorageResult<()> {
        debug!("Uploading {} to {}", path.display(), location);

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .body(body)
            .content_type(content_type_for(&location.key))
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(format!("{location}: {e}")))?;

        info!("Uploaded {} to {}", path.display(), location);
        Ok(())
    }
}

/// Content type inferred from the object key extension.
fn content_type_for(key: &str) -> &'static str {
    match key.rsplit('.').next() {
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("ts") => "video/mp2t",
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}
