//! Progress forwarding from the encoder to the event subject.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use vforge_bus::EventBus;
use vforge_media::FfmpegProgress;
use vforge_models::{ProgressUpdate, TaskEvent, TaskId, WorkerId};

/// Forward encoder progress snapshots to the bus as task progress events.
///
/// The encoder side drops snapshots when this receiver lags, so publishing
/// serially here is the rate limit: at most one in-flight publish, the rest
/// coalesce in the bounded channel.
pub fn spawn_forwarder(
    events: Arc<EventBus>,
    task_id: TaskId,
    worker_id: WorkerId,
    total_duration_secs: f64,
    mut rx: mpsc::Receiver<FfmpegProgress>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let total_ms = (total_duration_secs * 1000.0) as i64;

        while let Some(snapshot) = rx.recv().await {
            let update = ProgressUpdate {
                percent: snapshot.percentage(total_ms),
                speed: snapshot.speed,
                fps: snapshot.fps,
                bitrate: snapshot.bitrate.clone(),
            };

            let event = TaskEvent::progress(task_id.clone(), &update)
                .from_worker(worker_id.clone());
            if let Err(e) = events.publish_task_event(&event).await {
                debug!("Dropping progress event for {}: {}", task_id, e);
            }

            if snapshot.is_complete {
                break;
            }
        }
    })
}
