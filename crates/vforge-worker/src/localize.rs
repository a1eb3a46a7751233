//! Input localisation and output upload.
//!
//! `s3://bucket/key` URLs are materialised into the task's work directory,
//! through the storage plugin when one is registered and otherwise with
//! direct S3 credentials from the environment. Other schemes are passed
//! through untouched unless the handler needs a real local file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use vforge_models::PLUGIN_LOOKUP_TIMEOUT_SECS;
use vforge_plugins::proto::{DownloadRequest, UploadRequest};
use vforge_plugins::PluginHost;
use vforge_storage::{S3Client, S3Location};

use crate::error::{WorkerError, WorkerResult};

/// Resolves remote URLs into local files and pushes outputs back out.
pub struct Localizer {
    plugins: Arc<PluginHost>,
}

impl Localizer {
    pub fn new(plugins: Arc<PluginHost>) -> Self {
        Self { plugins }
    }

    /// Whether a URL needs localisation before FFmpeg can read it.
    pub fn needs_localisation(url: &str) -> bool {
        S3Location::is_s3_url(url)
    }

    /// Materialise `url` under `dir` when it is a storage URL; any other
    /// scheme is returned as-is for FFmpeg to consume directly.
    pub async fn localize(&self, url: &str, dir: &Path) -> WorkerResult<PathBuf> {
        if !S3Location::is_s3_url(url) {
            return Ok(PathBuf::from(url));
        }
        self.fetch_s3(url, dir).await
    }

    /// Materialise `url` under `dir` unconditionally; handlers that hand
    /// the file to a plugin need a real local path even for http sources.
    pub async fn localize_to_file(&self, url: &str, dir: &Path) -> WorkerResult<PathBuf> {
        if S3Location::is_s3_url(url) {
            return self.fetch_s3(url, dir).await;
        }
        if url.starts_with("http://") || url.starts_with("https://") {
            return self.fetch_http(url, dir).await;
        }
        // Already a local path.
        Ok(PathBuf::from(url))
    }

    /// Upload `path` to `dest_url` when it is a storage URL, returning the
    /// URL the output is reachable under.
    pub async fn upload(&self, path: &Path, dest_url: &str) -> WorkerResult<String> {
        if !S3Location::is_s3_url(dest_url) {
            // Output was produced in place.
            return Ok(dest_url.to_string());
        }

        if let Some(mut client) = self.plugins.registry().any_storage() {
            let request = UploadRequest {
                local_path: path.to_string_lossy().to_string(),
                dest_url: dest_url.to_string(),
            };
            let response = tokio::time::timeout(
                Duration::from_secs(PLUGIN_LOOKUP_TIMEOUT_SECS),
                client.upload(request),
            )
            .await
            .map_err(|_| WorkerError::localisation("storage plugin upload timed out"))?
            .map_err(|e| WorkerError::localisation(format!("storage plugin upload: {e}")))?;

            let url = response.into_inner().url;
            info!("Uploaded {} via storage plugin", url);
            return Ok(url);
        }

        let location = S3Location::parse(dest_url)
            .map_err(|e| WorkerError::localisation(e.to_string()))?;
        let s3 = S3Client::from_env().map_err(|e| WorkerError::localisation(e.to_string()))?;
        s3.upload_file(path, &location)
            .await
            .map_err(|e| WorkerError::localisation(e.to_string()))?;

        Ok(dest_url.to_string())
    }

    async fn fetch_s3(&self, url: &str, dir: &Path) -> WorkerResult<PathBuf> {
        let location =
            S3Location::parse(url).map_err(|e| WorkerError::localisation(e.to_string()))?;
        let dest = dir.join(location.file_name());

        if let Some(mut client) = self.plugins.registry().any_storage() {
            debug!("Localising {} via storage plugin", url);
            let request = DownloadRequest {
                url: url.to_string(),
                dest_path: dest.to_string_lossy().to_string(),
            };
            let response = tokio::time::timeout(
                Duration::from_secs(PLUGIN_LOOKUP_TIMEOUT_SECS),
                client.download(request),
            )
            .await
            .map_err(|_| WorkerError::localisation("storage plugin download timed out"))?
            .map_err(|e| WorkerError::localisation(format!("storage plugin download: {e}")))?;

            return Ok(PathBuf::from(response.into_inner().local_path));
        }

        debug!("Localising {} via direct S3 credentials", url);
        let s3 = S3Client::from_env().map_err(|e| WorkerError::localisation(e.to_string()))?;
        s3.download_to(&location, &dest)
            .await
            .map_err(|e| WorkerError::localisation(e.to_string()))?;

        Ok(dest)
    }

    async fn fetch_http(&self, url: &str, dir: &Path) -> WorkerResult<PathBuf> {
        let name = url
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .unwrap_or("download.bin");
        let dest = dir.join(name);

        debug!("Localising {} via HTTP", url);
        let response = reqwest::get(url)
            .await?
            .error_for_status()
            .map_err(|e| WorkerError::localisation(format!("{url}: {e}")))?;

        let bytes = response.bytes().await?;
        let mut file = tokio::fs::File::create(&dest).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;

        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_localisation() {
        assert!(Localizer::needs_localisation("s3://media/in.mp4"));
        assert!(!Localizer::needs_localisation("https://example.com/in.mp4"));
        assert!(!Localizer::needs_localisation("/tmp/in.mp4"));
        assert!(!Localizer::needs_localisation("rtmp://ingest/live/key"));
    }

    #[tokio::test]
    async fn test_non_storage_urls_pass_through() {
        let localizer = Localizer::new(Arc::new(PluginHost::empty()));
        let dir = tempfile::tempdir().unwrap();

        let path = localizer
            .localize("https://example.com/in.mp4", dir.path())
            .await
            .unwrap();
        assert_eq!(path, PathBuf::from("https://example.com/in.mp4"));

        let path = localizer.localize("/data/in.mp4", dir.path()).await.unwrap();
        assert_eq!(path, PathBuf::from("/data/in.mp4"));
    }

    #[tokio::test]
    async fn test_local_upload_is_a_no_op() {
        let localizer = Localizer::new(Arc::new(PluginHost::empty()));
        let url = localizer
            .upload(Path::new("/tmp/out.mp4"), "/data/out.mp4")
            .await
            .unwrap();
        assert_eq!(url, "/data/out.mp4");
    }
}
