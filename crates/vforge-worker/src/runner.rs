//! Per-type task handlers.

use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::info;

use vforge_bus::EventBus;
use vforge_media::{
    probe_url, stitch_segments, transcode, write_concat_manifest, write_master_playlist,
    ProgressSink, TranscodeSpec,
};
use vforge_models::{
    ManifestParams, ProbeParams, RestreamOutput, RestreamParams, StitchParams, Task,
    TranscodeOutput, TranscodeParams, WorkerId,
};
use vforge_plugins::proto::PublishRequest;
use vforge_plugins::PluginHost;
use vforge_storage::S3Location;

use crate::error::{WorkerError, WorkerResult};
use crate::localize::Localizer;
use crate::progress::spawn_forwarder;

/// Executes one task of any type inside the worker's task state machine.
pub struct TaskRunner {
    work_dir: PathBuf,
    progress_buffer: usize,
    events: Arc<EventBus>,
    plugins: Arc<PluginHost>,
    localizer: Localizer,
    worker_id: WorkerId,
}

impl TaskRunner {
    pub fn new(
        work_dir: PathBuf,
        progress_buffer: usize,
        events: Arc<EventBus>,
        plugins: Arc<PluginHost>,
        worker_id: WorkerId,
    ) -> Self {
        let localizer = Localizer::new(Arc::clone(&plugins));
        Self {
            work_dir,
            progress_buffer,
            events,
            plugins,
            localizer,
            worker_id,
        }
    }

    /// Run a task to completion, returning its result payload.
    ///
    /// Each task gets its own sub-tree of the work directory, removed again
    /// afterwards regardless of outcome.
    pub async fn run(
        &self,
        task: &Task,
        cancel: watch::Receiver<bool>,
    ) -> WorkerResult<serde_json::Value> {
        let dir = self.work_dir.join(task.id.as_str());
        tokio::fs::create_dir_all(&dir).await?;

        let result = match task.task_type {
            vforge_models::TaskType::Probe => self.probe(task, &dir).await,
            vforge_models::TaskType::Transcode => self.transcode(task, &dir, cancel).await,
            vforge_models::TaskType::Stitch => self.stitch(task, &dir, cancel).await,
            vforge_models::TaskType::Manifest => self.manifest(task, &dir).await,
            vforge_models::TaskType::Restream => self.restream(task, &dir).await,
        };

        tokio::fs::remove_dir_all(&dir).await.ok();
        result
    }

    fn params<T: DeserializeOwned>(task: &Task) -> WorkerResult<T> {
        serde_json::from_value(task.params.clone()).map_err(|e| {
            WorkerError::validation(format!("{} params: {e}", task.task_type))
        })
    }

    /// Split an output URL into the path the tool writes and the URL to
    /// upload to afterwards, when remote.
    fn output_paths(
        &self,
        dir: &std::path::Path,
        output: &str,
        default_name: &str,
    ) -> (PathBuf, Option<String>) {
        if S3Location::is_s3_url(output) {
            let name = S3Location::parse(output)
                .map(|l| l.file_name().to_string())
                .unwrap_or_else(|_| default_name.to_string());
            (dir.join(name), Some(output.to_string()))
        } else {
            (PathBuf::from(output), None)
        }
    }

    async fn finalise_output(
        &self,
        local: &std::path::Path,
        upload_to: Option<String>,
    ) -> WorkerResult<String> {
        match upload_to {
            Some(dest) => self.localizer.upload(local, &dest).await,
            None => Ok(local.to_string_lossy().to_string()),
        }
    }

    // ------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------

    async fn probe(&self, task: &Task, dir: &std::path::Path) -> WorkerResult<serde_json::Value> {
        let params: ProbeParams = Self::params(task)?;

        let input = self.localizer.localize(&params.url, dir).await?;
        let probe = probe_url(&input.to_string_lossy()).await?;

        info!(
            task_id = %task.id,
            duration = probe.duration,
            keyframes = probe.keyframes.len(),
            "Probed source"
        );
        Ok(serde_json::to_value(&probe)?)
    }

    async fn transcode(
        &self,
        task: &Task,
        dir: &std::path::Path,
        cancel: watch::Receiver<bool>,
    ) -> WorkerResult<serde_json::Value> {
        let params: TranscodeParams = Self::params(task)?;

        let input = self.localizer.localize(&params.input, dir).await?;
        let default_name = format!(
            "seg_{:03}.{}",
            params.segment_index.unwrap_or(0),
            params.container
        );
        let (local_output, upload_to) = self.output_paths(dir, &params.output, &default_name);
        if let Some(parent) = local_output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let spec = TranscodeSpec {
            input: input.to_string_lossy().to_string(),
            output: local_output.to_string_lossy().to_string(),
            start_time: params.start_time,
            duration: params.duration,
            video_codec: params.video_codec.clone(),
            audio_codec: params.audio_codec.clone(),
            container: params.container.clone(),
            width: params.width,
            height: params.height,
            bitrate: params.bitrate,
            preset: params.preset.clone(),
        };

        let (sink, rx) = ProgressSink::channel(self.progress_buffer);
        let forwarder = spawn_forwarder(
            Arc::clone(&self.events),
            task.id.clone(),
            self.worker_id.clone(),
            params.duration.unwrap_or_default(),
            rx,
        );

        let result = transcode(&spec, sink, Some(cancel)).await;
        let _ = forwarder.await;
        result?;

        let url = self.finalise_output(&local_output, upload_to).await?;
        Ok(serde_json::to_value(TranscodeOutput {
            url,
            segment_index: params.segment_index,
            profile: params.profile,
        })?)
    }

    async fn stitch(
        &self,
        task: &Task,
        dir: &std::path::Path,
        cancel: watch::Receiver<bool>,
    ) -> WorkerResult<serde_json::Value> {
        let params: StitchParams = Self::params(task)?;
        if params.segments.is_empty() {
            return Err(WorkerError::validation("stitch requires at least one segment"));
        }

        let mut local_segments = Vec::with_capacity(params.segments.len());
        for segment in &params.segments {
            local_segments.push(self.localizer.localize_to_file(segment, dir).await?);
        }

        let concat = dir.join("concat.txt");
        write_concat_manifest(&local_segments, &concat).await?;

        let (local_output, upload_to) = self.output_paths(dir, &params.output, "output.mp4");
        if let Some(parent) = local_output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        stitch_segments(&concat, &local_output, Some(cancel)).await?;

        let url = self.finalise_output(&local_output, upload_to).await?;
        info!(task_id = %task.id, segments = local_segments.len(), "Stitched output");
        Ok(serde_json::json!({"url": url, "segments": local_segments.len()}))
    }

    async fn manifest(
        &self,
        task: &Task,
        dir: &std::path::Path,
    ) -> WorkerResult<serde_json::Value> {
        let params: ManifestParams = Self::params(task)?;

        let (local_output, upload_to) = self.output_paths(dir, &params.output, "master.m3u8");
        if let Some(parent) = local_output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_master_playlist(&params.variants, &local_output).await?;

        let url = self.finalise_output(&local_output, upload_to).await?;
        Ok(serde_json::json!({"url": url, "variants": params.variants.len()}))
    }

    async fn restream(
        &self,
        task: &Task,
        dir: &std::path::Path,
    ) -> WorkerResult<serde_json::Value> {
        let params: RestreamParams = Self::params(task)?;

        let file = self
            .localizer
            .localize_to_file(&params.file_url, dir)
            .await?;

        let Some(mut client) = self.plugins.registry().publisher(&params.platform) else {
            return Err(WorkerError::plugin_unavailable(format!(
                "no publisher plugin for platform {}",
                params.platform
            )));
        };

        let request = PublishRequest {
            platform: params.platform.clone(),
            file_path: file.to_string_lossy().to_string(),
            credentials: params.credentials,
        };
        let response = client
            .publish(request)
            .await
            .map_err(|e| WorkerError::plugin_rpc(format!("publish: {e}")))?
            .into_inner();

        info!(
            task_id = %task.id,
            platform = %params.platform,
            platform_id = %response.platform_id,
            "Republished output"
        );
        Ok(serde_json::to_value(RestreamOutput {
            platform_id: response.platform_id,
            url: response.url,
        })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vforge_bus::BusConfig;
    use vforge_models::{JobId, TaskType};

    fn runner(work_dir: PathBuf) -> TaskRunner {
        let events = Arc::new(EventBus::new(BusConfig::default()).unwrap());
        TaskRunner::new(
            work_dir,
            8,
            events,
            Arc::new(PluginHost::empty()),
            WorkerId::new(),
        )
    }

    fn cancel_rx() -> watch::Receiver<bool> {
        // Sender dropped without cancelling; the runner treats that as
        // "never cancelled".
        let (_tx, rx) = watch::channel(false);
        rx
    }

    #[tokio::test]
    async fn test_manifest_handler_writes_playlist() {
        let work = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let output = out_dir.path().join("master.m3u8");

        let task = Task::new(
            JobId::new(),
            TaskType::Manifest,
            serde_json::json!({
                "variants": [
                    {"path": "720p/index.m3u8", "bandwidth": 2_500_000u64, "resolution": "1280x720"}
                ],
                "output": output.to_string_lossy(),
            }),
        );

        let runner = runner(work.path().to_path_buf());
        let result = runner.run(&task, cancel_rx()).await.unwrap();

        assert_eq!(result["variants"], 1);
        let contents = std::fs::read_to_string(&output).unwrap();
        assert!(contents.starts_with("#EXTM3U"));
        assert!(contents.contains("BANDWIDTH=2500000"));
    }

    #[tokio::test]
    async fn test_manifest_handler_accepts_empty_variants() {
        let work = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let output = out_dir.path().join("master.m3u8");

        let task = Task::new(
            JobId::new(),
            TaskType::Manifest,
            serde_json::json!({"variants": [], "output": output.to_string_lossy()}),
        );

        let result = runner(work.path().to_path_buf())
            .run(&task, cancel_rx())
            .await
            .unwrap();

        assert_eq!(result["variants"], 0);
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_empty_stitch_is_a_permanent_failure() {
        let work = tempfile::tempdir().unwrap();
        let task = Task::new(
            JobId::new(),
            TaskType::Stitch,
            serde_json::json!({"segments": [], "output": "/tmp/out.mp4"}),
        );

        let err = runner(work.path().to_path_buf())
            .run(&task, cancel_rx())
            .await
            .unwrap_err();
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_malformed_params_are_a_permanent_failure() {
        let work = tempfile::tempdir().unwrap();
        let task = Task::new(
            JobId::new(),
            TaskType::Transcode,
            serde_json::json!({"nonsense": true}),
        );

        let err = runner(work.path().to_path_buf())
            .run(&task, cancel_rx())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_restream_without_publisher_plugin_is_transient() {
        let work = tempfile::tempdir().unwrap();
        let file_dir = tempfile::tempdir().unwrap();
        let file = file_dir.path().join("final.mp4");
        std::fs::write(&file, b"video").unwrap();

        let task = Task::new(
            JobId::new(),
            TaskType::Restream,
            serde_json::json!({
                "platform": "youtube",
                "file_url": file.to_string_lossy(),
            }),
        );

        let err = runner(work.path().to_path_buf())
            .run(&task, cancel_rx())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::PluginUnavailable(_)));
        assert!(!err.is_permanent());
    }
}
