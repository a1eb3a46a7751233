//! The job state machine.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};
use validator::Validate;

use vforge_db::{JobStore, TaskStore};
use vforge_media::plan_segments;
use vforge_models::{
    Job, JobCancelledEvent, JobId, ManifestParams, ManifestVariant, ProbeResult, Profile,
    RestreamParams, StitchParams, SubmitJobRequest, Task, TaskEvent, TaskEventKind, TaskType,
    TranscodeOutput, TranscodeParams,
};

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::transport::Transport;

/// Orchestrates job decomposition and advancement.
///
/// All state lives in the metadata store; the orchestrator itself is
/// stateless and replicas may process events concurrently. Every transition
/// is guarded by a compare-and-set on the task row, so a duplicate
/// delivery finds the transition already applied and stops.
pub struct Orchestrator {
    jobs: Arc<dyn JobStore>,
    tasks: Arc<dyn TaskStore>,
    transport: Arc<dyn Transport>,
    config: OrchestratorConfig,
    catalog: Vec<Profile>,
}

impl Orchestrator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        tasks: Arc<dyn TaskStore>,
        transport: Arc<dyn Transport>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            jobs,
            tasks,
            transport,
            config,
            catalog: Profile::defaults(),
        }
    }

    /// Replace the profile catalog.
    pub fn with_profiles(mut self, catalog: Vec<Profile>) -> Self {
        self.catalog = catalog;
        self
    }

    fn profile(&self, name: &str) -> Option<&Profile> {
        self.catalog.iter().find(|p| p.name == name)
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Accept a job submission: persist the job, create its probe task and
    /// dispatch it.
    pub async fn submit_job(&self, request: &SubmitJobRequest) -> OrchestratorResult<Job> {
        request
            .validate()
            .map_err(|e| OrchestratorError::validation(e.to_string()))?;

        for name in &request.profiles {
            if self.profile(name).is_none() {
                return Err(OrchestratorError::validation(format!(
                    "unknown profile: {name}"
                )));
            }
        }

        let job = Job::new(
            &request.user_id,
            &request.source_url,
            request.profiles.clone(),
        );
        self.jobs.insert_job(&job).await?;

        let probe = Task::new(
            job.id.clone(),
            TaskType::Probe,
            serde_json::json!({"url": job.source_url}),
        )
        .with_max_attempts(self.config.task_max_attempts);

        self.tasks.insert_task(&probe).await?;
        self.transport.dispatch(&probe).await?;

        info!(job_id = %job.id, user_id = %job.user_id, "Submitted job");
        Ok(job)
    }

    /// Cancel a job.
    ///
    /// Publishes `events.job.cancelled` exactly once: only the call that
    /// actually transitions the row emits the notification. Residual tasks
    /// are left to finish; their events land on a terminal job and change
    /// nothing.
    pub async fn cancel_job(&self, job_id: &JobId) -> OrchestratorResult<Job> {
        let changed = self.jobs.cancel_job(job_id).await?;

        if changed {
            self.transport
                .publish_job_cancelled(&JobCancelledEvent::new(job_id.clone()))
                .await?;
            info!(job_id = %job_id, "Cancelled job");
        }

        self.jobs
            .get_job(job_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found(format!("job {job_id}")))
    }

    /// Create a restream task republishing a completed job's output.
    pub async fn request_restream(
        &self,
        job_id: &JobId,
        platform: &str,
        credentials: HashMap<String, String>,
    ) -> OrchestratorResult<Task> {
        let job = self
            .jobs
            .get_job(job_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found(format!("job {job_id}")))?;

        if job.status != vforge_models::JobStatus::Completed {
            return Err(OrchestratorError::validation(format!(
                "job {job_id} is {}, restream requires a completed job",
                job.status
            )));
        }

        let params = RestreamParams {
            platform: platform.to_string(),
            file_url: self.final_output(job_id),
            credentials,
        };
        let task = Task::new(
            job_id.clone(),
            TaskType::Restream,
            serde_json::to_value(&params)?,
        )
        .with_max_attempts(self.config.task_max_attempts);

        self.tasks.insert_task(&task).await?;
        self.transport.dispatch(&task).await?;

        Ok(task)
    }

    /// React to one task event.
    ///
    /// Dispatch is on `(task type, event kind)`; each arm derives its
    /// decision from persisted state, never from event arrival order.
    pub async fn handle_task_event(&self, event: &TaskEvent) -> OrchestratorResult<()> {
        let Some(task) = self.tasks.get_task(&event.task_id).await? else {
            warn!(task_id = %event.task_id, "Event for unknown task, ignoring");
            return Ok(());
        };

        match event.event {
            TaskEventKind::Log => {
                debug!(task_id = %task.id, payload = %event.payload, "Task log");
                Ok(())
            }
            TaskEventKind::Progress => self.on_progress(&task, &event.payload).await,
            TaskEventKind::Completed => match task.task_type {
                TaskType::Probe => self.on_probe_completed(&task, &event.payload).await,
                TaskType::Transcode => self.on_transcode_completed(&task, &event.payload).await,
                TaskType::Stitch => self.on_stitch_completed(&task, &event.payload).await,
                TaskType::Manifest | TaskType::Restream => {
                    self.tasks.complete_task(&task.id, &event.payload).await?;
                    Ok(())
                }
            },
            TaskEventKind::Failed => self.on_task_failed(&task, event).await,
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Opportunistic job progress from a transcode progress snapshot.
    async fn on_progress(&self, task: &Task, payload: &serde_json::Value) -> OrchestratorResult<()> {
        if task.task_type != TaskType::Transcode {
            return Ok(());
        }

        let percent = payload
            .get("percent")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
            .clamp(0.0, 100.0);

        let open = self
            .tasks
            .count_open_siblings(&task.job_id, TaskType::Transcode)
            .await? as f64;
        let completed = self
            .tasks
            .completed_tasks(&task.job_id, TaskType::Transcode)
            .await?
            .len() as f64;

        let total = open + completed;
        if total > 0.0 {
            // The stitch pass owns the final stretch to 100.
            let job_percent = ((completed + percent / 100.0) / total * 95.0) as u8;
            self.jobs
                .set_job_progress(&task.job_id, job_percent)
                .await?;
        }

        Ok(())
    }

    /// Probe completed: persist the result and fan out one transcode task
    /// per (profile, segment).
    async fn on_probe_completed(
        &self,
        task: &Task,
        payload: &serde_json::Value,
    ) -> OrchestratorResult<()> {
        let probe: ProbeResult = match serde_json::from_value(payload.clone()) {
            Ok(probe) => probe,
            Err(e) => {
                warn!(task_id = %task.id, "Unusable probe result: {}", e);
                self.tasks.mark_task_failed(&task.id).await?;
                self.jobs
                    .fail_job(&task.job_id, &format!("probe result unusable: {e}"))
                    .await?;
                return Ok(());
            }
        };

        if !self.tasks.complete_task(&task.id, payload).await? {
            debug!(task_id = %task.id, "Probe already completed, skipping fan-out");
            return Ok(());
        }

        let Some(job) = self.jobs.get_job(&task.job_id).await? else {
            warn!(job_id = %task.job_id, "Probe completed for missing job");
            return Ok(());
        };
        if job.status.is_terminal() {
            info!(job_id = %job.id, status = %job.status, "Job is terminal, skipping fan-out");
            return Ok(());
        }

        let mut created = 0usize;
        for name in &job.profiles {
            let Some(profile) = self.profile(name) else {
                warn!(job_id = %job.id, profile = %name, "Unknown profile, skipping");
                continue;
            };

            let segments =
                plan_segments(&probe.keyframes, probe.duration, profile.segment_target_secs);

            for segment in &segments {
                let params = TranscodeParams {
                    input: job.source_url.clone(),
                    output: self.segment_output(&job.id, profile, segment.index),
                    start_time: Some(segment.start),
                    duration: Some(segment.duration()),
                    video_codec: profile.video_codec.clone(),
                    audio_codec: profile.audio_codec.clone(),
                    container: profile.container.clone(),
                    width: profile.width,
                    height: profile.height,
                    bitrate: profile.bitrate,
                    preset: profile.preset.clone(),
                    segment_index: Some(segment.index),
                    profile: profile.name.clone(),
                };

                let transcode = Task::new(
                    job.id.clone(),
                    TaskType::Transcode,
                    serde_json::to_value(&params)?,
                )
                .with_max_attempts(self.config.task_max_attempts);

                self.tasks.insert_task(&transcode).await?;
                self.transport.dispatch(&transcode).await?;
                created += 1;
            }
        }

        if created == 0 {
            self.jobs
                .fail_job(&job.id, "probe yielded no transcodable segments")
                .await?;
            return Ok(());
        }

        self.jobs.mark_job_running(&job.id).await?;
        info!(job_id = %job.id, transcodes = created, "Fanned out transcode tasks");
        Ok(())
    }

    /// Transcode completed: when it was the last open sibling, assemble the
    /// stitch task from the completed outputs in segment order.
    async fn on_transcode_completed(
        &self,
        task: &Task,
        payload: &serde_json::Value,
    ) -> OrchestratorResult<()> {
        if !self.tasks.complete_task(&task.id, payload).await? {
            debug!(task_id = %task.id, "Transcode already completed, ignoring duplicate");
            return Ok(());
        }

        let open = self
            .tasks
            .count_open_siblings(&task.job_id, TaskType::Transcode)
            .await?;
        let completed = self
            .tasks
            .completed_tasks(&task.job_id, TaskType::Transcode)
            .await?;

        let total = open as usize + completed.len();
        if total > 0 {
            let percent = (completed.len() as f64 / total as f64 * 95.0) as u8;
            self.jobs.set_job_progress(&task.job_id, percent).await?;
        }

        if open > 0 {
            debug!(
                job_id = %task.job_id,
                open,
                "Transcode completed, siblings still open"
            );
            return Ok(());
        }

        let Some(job) = self.jobs.get_job(&task.job_id).await? else {
            return Ok(());
        };
        if job.status.is_terminal() {
            info!(job_id = %job.id, status = %job.status, "Job is terminal, not stitching");
            return Ok(());
        }

        // Replica-race guard: a concurrent event may already have created
        // the stitch task.
        let existing = self.tasks.tasks_for_job(&job.id).await?;
        if existing.iter().any(|t| t.task_type == TaskType::Stitch) {
            debug!(job_id = %job.id, "Stitch task already exists");
            return Ok(());
        }

        // Results arrive in arbitrary order; the stitch input list is
        // re-sorted by the segment index recovered from each result.
        let mut outputs: Vec<TranscodeOutput> = completed
            .iter()
            .filter_map(|t| t.result.clone())
            .filter_map(|r| serde_json::from_value(r).ok())
            .collect();
        outputs.sort_by(|a, b| {
            (a.segment_index.unwrap_or(0), a.profile.as_str())
                .cmp(&(b.segment_index.unwrap_or(0), b.profile.as_str()))
        });

        let params = StitchParams {
            segments: outputs.into_iter().map(|o| o.url).collect(),
            output: self.final_output(&job.id),
        };
        let stitch = Task::new(
            job.id.clone(),
            TaskType::Stitch,
            serde_json::to_value(&params)?,
        )
        .with_max_attempts(self.config.task_max_attempts);

        self.tasks.insert_task(&stitch).await?;
        self.transport.dispatch(&stitch).await?;

        info!(job_id = %job.id, "All transcodes done, dispatched stitch");
        Ok(())
    }

    /// Stitch completed: the job is done. Optionally fan out an HLS
    /// manifest task; it does not gate completion.
    async fn on_stitch_completed(
        &self,
        task: &Task,
        payload: &serde_json::Value,
    ) -> OrchestratorResult<()> {
        if !self.tasks.complete_task(&task.id, payload).await? {
            debug!(task_id = %task.id, "Stitch already completed, ignoring duplicate");
            return Ok(());
        }

        if self.jobs.complete_job(&task.job_id).await? {
            info!(job_id = %task.job_id, "Job completed");
        }

        if self.config.emit_hls_manifest {
            self.emit_manifest(&task.job_id).await?;
        }

        Ok(())
    }

    async fn emit_manifest(&self, job_id: &JobId) -> OrchestratorResult<()> {
        let Some(job) = self.jobs.get_job(job_id).await? else {
            return Ok(());
        };

        let variants: Vec<ManifestVariant> = job
            .profiles
            .iter()
            .filter_map(|name| self.profile(name))
            .map(|profile| ManifestVariant {
                path: format!(
                    "{}/jobs/{}/{}/index.m3u8",
                    self.config.output_base, job_id, profile.name
                ),
                bandwidth: profile.bitrate,
                resolution: profile.resolution(),
            })
            .collect();

        let params = ManifestParams {
            variants,
            output: format!("{}/jobs/{}/master.m3u8", self.config.output_base, job_id),
        };
        let manifest = Task::new(
            job_id.clone(),
            TaskType::Manifest,
            serde_json::to_value(&params)?,
        )
        .with_max_attempts(self.config.task_max_attempts);

        self.tasks.insert_task(&manifest).await?;
        self.transport.dispatch(&manifest).await?;
        Ok(())
    }

    /// A task reported failure: count the attempt, and past the cap fail
    /// the task terminally and the job with it.
    async fn on_task_failed(&self, task: &Task, event: &TaskEvent) -> OrchestratorResult<()> {
        let reason = event.error_message().unwrap_or("task failed");

        match self.tasks.record_task_failure(&task.id).await? {
            None => {
                debug!(task_id = %task.id, "Failure event for terminal task, ignoring");
            }
            Some((attempts, max_attempts)) if attempts >= max_attempts => {
                self.tasks.mark_task_failed(&task.id).await?;
                // First terminal failure wins; the CAS keeps later ones from
                // overwriting the reason.
                self.jobs
                    .fail_job(
                        &task.job_id,
                        &format!("{} task failed: {reason}", task.task_type),
                    )
                    .await?;
                warn!(
                    task_id = %task.id,
                    job_id = %task.job_id,
                    attempts,
                    "Task failed terminally"
                );
            }
            Some((attempts, max_attempts)) => {
                info!(
                    task_id = %task.id,
                    attempts,
                    max_attempts,
                    "Task failed, awaiting redelivery"
                );
            }
        }

        Ok(())
    }

    // ========================================================================
    // Output layout
    // ========================================================================

    fn segment_output(&self, job_id: &JobId, profile: &Profile, index: u32) -> String {
        format!(
            "{}/jobs/{}/{}/seg_{:03}.{}",
            self.config.output_base, job_id, profile.name, index, profile.container
        )
    }

    fn final_output(&self, job_id: &JobId) -> String {
        format!("{}/jobs/{}/output.mp4", self.config.output_base, job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    use vforge_bus::BusResult;
    use vforge_db::DbResult;
    use vforge_models::{JobStatus, TaskId, TaskStatus, WorkerId};

    // ------------------------------------------------------------------
    // In-memory store mirroring the CAS semantics of the Postgres repos
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct MemStore {
        jobs: Mutex<HashMap<String, Job>>,
        tasks: Mutex<HashMap<String, Task>>,
    }

    impl MemStore {
        fn job(&self, id: &JobId) -> Job {
            self.jobs.lock().unwrap().get(id.as_str()).unwrap().clone()
        }

        fn task(&self, id: &TaskId) -> Task {
            self.tasks.lock().unwrap().get(id.as_str()).unwrap().clone()
        }

        fn tasks_of_type(&self, task_type: TaskType) -> Vec<Task> {
            self.tasks
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.task_type == task_type)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl JobStore for MemStore {
        async fn insert_job(&self, job: &Job) -> DbResult<()> {
            self.jobs
                .lock()
                .unwrap()
                .insert(job.id.to_string(), job.clone());
            Ok(())
        }

        async fn get_job(&self, id: &JobId) -> DbResult<Option<Job>> {
            Ok(self.jobs.lock().unwrap().get(id.as_str()).cloned())
        }

        async fn mark_job_running(&self, id: &JobId) -> DbResult<bool> {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.get_mut(id.as_str()) {
                Some(job) if job.status == JobStatus::Pending => {
                    job.status = JobStatus::Running;
                    job.started_at = Some(Utc::now());
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn set_job_progress(&self, id: &JobId, progress: u8) -> DbResult<()> {
            let mut jobs = self.jobs.lock().unwrap();
            if let Some(job) = jobs.get_mut(id.as_str()) {
                if job.status == JobStatus::Running {
                    job.progress = job.progress.max(progress.min(100));
                }
            }
            Ok(())
        }

        async fn complete_job(&self, id: &JobId) -> DbResult<bool> {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.get_mut(id.as_str()) {
                Some(job) if job.status == JobStatus::Running => {
                    job.status = JobStatus::Completed;
                    job.progress = 100;
                    job.finished_at = Some(Utc::now());
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn fail_job(&self, id: &JobId, reason: &str) -> DbResult<bool> {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.get_mut(id.as_str()) {
                Some(job)
                    if matches!(job.status, JobStatus::Pending | JobStatus::Running) =>
                {
                    job.status = JobStatus::Failed;
                    job.error = Some(reason.to_string());
                    job.finished_at = Some(Utc::now());
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn cancel_job(&self, id: &JobId) -> DbResult<bool> {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.get_mut(id.as_str()) {
                Some(job)
                    if matches!(job.status, JobStatus::Pending | JobStatus::Running) =>
                {
                    job.status = JobStatus::Cancelled;
                    job.finished_at = Some(Utc::now());
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn delete_job(&self, id: &JobId) -> DbResult<()> {
            self.jobs.lock().unwrap().remove(id.as_str());
            Ok(())
        }
    }

    #[async_trait]
    impl TaskStore for MemStore {
        async fn insert_task(&self, task: &Task) -> DbResult<()> {
            self.tasks
                .lock()
                .unwrap()
                .insert(task.id.to_string(), task.clone());
            Ok(())
        }

        async fn get_task(&self, id: &TaskId) -> DbResult<Option<Task>> {
            Ok(self.tasks.lock().unwrap().get(id.as_str()).cloned())
        }

        async fn mark_task_assigned(&self, id: &TaskId, worker: &WorkerId) -> DbResult<bool> {
            let mut tasks = self.tasks.lock().unwrap();
            match tasks.get_mut(id.as_str()) {
                Some(task) if task.status == TaskStatus::Pending => {
                    task.status = TaskStatus::Assigned;
                    task.assigned_worker = Some(worker.clone());
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn mark_task_running(&self, id: &TaskId) -> DbResult<bool> {
            let mut tasks = self.tasks.lock().unwrap();
            match tasks.get_mut(id.as_str()) {
                Some(task)
                    if matches!(task.status, TaskStatus::Pending | TaskStatus::Assigned) =>
                {
                    task.status = TaskStatus::Running;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn complete_task(
            &self,
            id: &TaskId,
            result: &serde_json::Value,
        ) -> DbResult<bool> {
            let mut tasks = self.tasks.lock().unwrap();
            match tasks.get_mut(id.as_str()) {
                Some(task) if !task.status.is_terminal() => {
                    task.status = TaskStatus::Completed;
                    task.result = Some(result.clone());
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn record_task_failure(&self, id: &TaskId) -> DbResult<Option<(u32, u32)>> {
            let mut tasks = self.tasks.lock().unwrap();
            match tasks.get_mut(id.as_str()) {
                Some(task) if !task.status.is_terminal() => {
                    task.attempts += 1;
                    Ok(Some((task.attempts, task.max_attempts)))
                }
                _ => Ok(None),
            }
        }

        async fn mark_task_failed(&self, id: &TaskId) -> DbResult<bool> {
            let mut tasks = self.tasks.lock().unwrap();
            match tasks.get_mut(id.as_str()) {
                Some(task) if !task.status.is_terminal() => {
                    task.status = TaskStatus::Failed;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn count_open_siblings(
            &self,
            job_id: &JobId,
            task_type: TaskType,
        ) -> DbResult<u64> {
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .values()
                .filter(|t| {
                    t.job_id == *job_id
                        && t.task_type == task_type
                        && !t.status.is_terminal()
                })
                .count() as u64)
        }

        async fn completed_tasks(
            &self,
            job_id: &JobId,
            task_type: TaskType,
        ) -> DbResult<Vec<Task>> {
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .values()
                .filter(|t| {
                    t.job_id == *job_id
                        && t.task_type == task_type
                        && t.status == TaskStatus::Completed
                })
                .cloned()
                .collect())
        }

        async fn tasks_for_job(&self, job_id: &JobId) -> DbResult<Vec<Task>> {
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.job_id == *job_id)
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        dispatched: Mutex<Vec<Task>>,
        cancelled: Mutex<Vec<JobCancelledEvent>>,
    }

    impl RecordingTransport {
        fn dispatched(&self) -> Vec<Task> {
            self.dispatched.lock().unwrap().clone()
        }

        fn cancelled_count(&self) -> usize {
            self.cancelled.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn dispatch(&self, task: &Task) -> BusResult<()> {
            self.dispatched.lock().unwrap().push(task.clone());
            Ok(())
        }

        async fn publish_job_cancelled(&self, event: &JobCancelledEvent) -> BusResult<()> {
            self.cancelled.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------

    fn test_catalog() -> Vec<Profile> {
        let mut profile = Profile::find("1080p_h264").unwrap();
        profile.segment_target_secs = 10.0;
        vec![profile]
    }

    fn setup() -> (Arc<MemStore>, Arc<RecordingTransport>, Orchestrator) {
        let store = Arc::new(MemStore::default());
        let transport = Arc::new(RecordingTransport::default());
        let orchestrator = Orchestrator::new(
            store.clone(),
            store.clone(),
            transport.clone(),
            OrchestratorConfig::default(),
        )
        .with_profiles(test_catalog());
        (store, transport, orchestrator)
    }

    fn submit_request() -> SubmitJobRequest {
        SubmitJobRequest {
            user_id: "user123".into(),
            source_url: "https://example.com/source.mp4".into(),
            profiles: vec!["1080p_h264".into()],
        }
    }

    fn probe_payload() -> serde_json::Value {
        serde_json::json!({
            "duration": 30.0,
            "width": 1920,
            "height": 1080,
            "format": "mov,mp4,m4a,3gp,3g2,mj2",
            "bitrate": 4_000_000u64,
            "streams": [
                {"index": 0, "codec_type": "video", "codec_name": "h264"},
                {"index": 1, "codec_type": "audio", "codec_name": "aac"}
            ],
            "keyframes": [0.0, 10.0, 20.0]
        })
    }

    /// Submit a job and run the probe to completion: 3 transcode tasks.
    async fn submitted_and_probed(
        store: &Arc<MemStore>,
        orchestrator: &Orchestrator,
    ) -> Job {
        let job = orchestrator.submit_job(&submit_request()).await.unwrap();
        let probe = store.tasks_of_type(TaskType::Probe).remove(0);
        orchestrator
            .handle_task_event(&TaskEvent::completed(probe.id.clone(), probe_payload()))
            .await
            .unwrap();
        job
    }

    fn transcode_result(task: &Task) -> serde_json::Value {
        let params: TranscodeParams = serde_json::from_value(task.params.clone()).unwrap();
        serde_json::to_value(TranscodeOutput {
            url: params.output,
            segment_index: params.segment_index,
            profile: params.profile,
        })
        .unwrap()
    }

    // ------------------------------------------------------------------
    // Scenarios
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_submit_creates_probe_and_dispatches_it() {
        let (store, transport, orchestrator) = setup();

        let job = orchestrator.submit_job(&submit_request()).await.unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        let probes = store.tasks_of_type(TaskType::Probe);
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].job_id, job.id);
        assert_eq!(probes[0].params["url"], "https://example.com/source.mp4");

        let dispatched = transport.dispatched();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].task_type, TaskType::Probe);
    }

    #[tokio::test]
    async fn test_submit_rejects_unknown_profile() {
        let (_, _, orchestrator) = setup();
        let mut request = submit_request();
        request.profiles = vec!["900p_av1".into()];

        let err = orchestrator.submit_job(&request).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }

    #[tokio::test]
    async fn test_probe_completion_fans_out_transcodes() {
        let (store, transport, orchestrator) = setup();

        let job = submitted_and_probed(&store, &orchestrator).await;

        // One profile, three keyframe-aligned segments of [0,30).
        let transcodes = store.tasks_of_type(TaskType::Transcode);
        assert_eq!(transcodes.len(), 3);

        let mut indices: Vec<u32> = transcodes
            .iter()
            .map(|t| t.params["segment_index"].as_u64().unwrap() as u32)
            .collect();
        indices.sort();
        assert_eq!(indices, vec![0, 1, 2]);

        // One dispatch per transcode, after the probe dispatch.
        assert_eq!(transport.dispatched().len(), 4);

        let job = store.job(&job.id);
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_probe_completion_is_idempotent() {
        let (store, transport, orchestrator) = setup();

        submitted_and_probed(&store, &orchestrator).await;
        let probe = store.tasks_of_type(TaskType::Probe).remove(0);

        orchestrator
            .handle_task_event(&TaskEvent::completed(probe.id.clone(), probe_payload()))
            .await
            .unwrap();

        // Still exactly three transcodes and four dispatches.
        assert_eq!(store.tasks_of_type(TaskType::Transcode).len(), 3);
        assert_eq!(transport.dispatched().len(), 4);
    }

    #[tokio::test]
    async fn test_transcode_completion_with_siblings_open_does_not_stitch() {
        let (store, transport, orchestrator) = setup();

        let job = submitted_and_probed(&store, &orchestrator).await;
        let transcodes = store.tasks_of_type(TaskType::Transcode);

        orchestrator
            .handle_task_event(&TaskEvent::completed(
                transcodes[0].id.clone(),
                transcode_result(&transcodes[0]),
            ))
            .await
            .unwrap();

        assert!(store.tasks_of_type(TaskType::Stitch).is_empty());
        assert_eq!(store.job(&job.id).status, JobStatus::Running);
        assert_eq!(transport.dispatched().len(), 4);
    }

    #[tokio::test]
    async fn test_last_transcode_completion_creates_one_ordered_stitch() {
        let (store, transport, orchestrator) = setup();

        let job = submitted_and_probed(&store, &orchestrator).await;
        let mut transcodes = store.tasks_of_type(TaskType::Transcode);
        // Deliver results out of segment order.
        transcodes.sort_by_key(|t| {
            std::cmp::Reverse(t.params["segment_index"].as_u64().unwrap())
        });

        for task in &transcodes {
            orchestrator
                .handle_task_event(&TaskEvent::completed(
                    task.id.clone(),
                    transcode_result(task),
                ))
                .await
                .unwrap();
        }

        let stitches = store.tasks_of_type(TaskType::Stitch);
        assert_eq!(stitches.len(), 1);

        let params: StitchParams =
            serde_json::from_value(stitches[0].params.clone()).unwrap();
        assert_eq!(params.segments.len(), 3);
        assert!(params.segments[0].contains("seg_000"));
        assert!(params.segments[1].contains("seg_001"));
        assert!(params.segments[2].contains("seg_002"));

        // 1 probe + 3 transcodes + 1 stitch dispatched.
        assert_eq!(transport.dispatched().len(), 5);
        assert_eq!(store.job(&job.id).status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_duplicate_transcode_completion_does_not_stitch_twice() {
        let (store, transport, orchestrator) = setup();

        submitted_and_probed(&store, &orchestrator).await;
        let transcodes = store.tasks_of_type(TaskType::Transcode);

        for task in &transcodes {
            orchestrator
                .handle_task_event(&TaskEvent::completed(
                    task.id.clone(),
                    transcode_result(task),
                ))
                .await
                .unwrap();
        }
        // Redeliver the final completion.
        let last = transcodes.last().unwrap();
        orchestrator
            .handle_task_event(&TaskEvent::completed(
                last.id.clone(),
                transcode_result(last),
            ))
            .await
            .unwrap();

        assert_eq!(store.tasks_of_type(TaskType::Stitch).len(), 1);
        assert_eq!(transport.dispatched().len(), 5);
    }

    #[tokio::test]
    async fn test_stitch_completion_completes_job() {
        let (store, _, orchestrator) = setup();

        let job = submitted_and_probed(&store, &orchestrator).await;
        for task in &store.tasks_of_type(TaskType::Transcode) {
            orchestrator
                .handle_task_event(&TaskEvent::completed(
                    task.id.clone(),
                    transcode_result(task),
                ))
                .await
                .unwrap();
        }

        let stitch = store.tasks_of_type(TaskType::Stitch).remove(0);
        orchestrator
            .handle_task_event(&TaskEvent::completed(
                stitch.id.clone(),
                serde_json::json!({"url": "s3://vforge-media/jobs/x/output.mp4"}),
            ))
            .await
            .unwrap();

        let job = store.job(&job.id);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_cancel_publishes_exactly_once() {
        let (store, transport, orchestrator) = setup();

        let job = submitted_and_probed(&store, &orchestrator).await;

        let cancelled = orchestrator.cancel_job(&job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert_eq!(transport.cancelled_count(), 1);

        // Cancelling again transitions nothing and publishes nothing.
        orchestrator.cancel_job(&job.id).await.unwrap();
        assert_eq!(transport.cancelled_count(), 1);
    }

    #[tokio::test]
    async fn test_completion_after_cancel_leaves_job_cancelled() {
        let (store, transport, orchestrator) = setup();

        let job = submitted_and_probed(&store, &orchestrator).await;
        orchestrator.cancel_job(&job.id).await.unwrap();

        // Residual worker output arrives after cancellation.
        for task in &store.tasks_of_type(TaskType::Transcode) {
            orchestrator
                .handle_task_event(&TaskEvent::completed(
                    task.id.clone(),
                    transcode_result(task),
                ))
                .await
                .unwrap();
        }

        assert_eq!(store.job(&job.id).status, JobStatus::Cancelled);
        // No stitch fan-out on a terminal job.
        assert!(store.tasks_of_type(TaskType::Stitch).is_empty());
        assert_eq!(transport.dispatched().len(), 4);
    }

    #[tokio::test]
    async fn test_failure_below_cap_counts_attempt_only() {
        let (store, _, orchestrator) = setup();

        let job = orchestrator.submit_job(&submit_request()).await.unwrap();
        let probe = store.tasks_of_type(TaskType::Probe).remove(0);

        orchestrator
            .handle_task_event(&TaskEvent::failed(probe.id.clone(), "connection reset"))
            .await
            .unwrap();

        let probe = store.task(&probe.id);
        assert_eq!(probe.attempts, 1);
        assert_eq!(probe.status, TaskStatus::Pending);
        assert_eq!(store.job(&job.id).status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_failure_at_cap_fails_task_and_job() {
        let (store, _, orchestrator) = setup();

        let job = orchestrator.submit_job(&submit_request()).await.unwrap();
        let probe = store.tasks_of_type(TaskType::Probe).remove(0);

        for _ in 0..3 {
            orchestrator
                .handle_task_event(&TaskEvent::failed(probe.id.clone(), "input unreadable"))
                .await
                .unwrap();
        }

        assert_eq!(store.task(&probe.id).status, TaskStatus::Failed);
        let job = store.job(&job.id);
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("probe"));
    }

    #[tokio::test]
    async fn test_failure_event_after_terminal_failure_is_ignored() {
        let (store, _, orchestrator) = setup();

        orchestrator.submit_job(&submit_request()).await.unwrap();
        let probe = store.tasks_of_type(TaskType::Probe).remove(0);

        for _ in 0..5 {
            orchestrator
                .handle_task_event(&TaskEvent::failed(probe.id.clone(), "input unreadable"))
                .await
                .unwrap();
        }

        // Attempts stop counting once the task is terminal.
        assert_eq!(store.task(&probe.id).attempts, 3);
    }

    #[tokio::test]
    async fn test_event_for_unknown_task_is_ignored() {
        let (_, _, orchestrator) = setup();

        orchestrator
            .handle_task_event(&TaskEvent::completed(
                TaskId::new(),
                serde_json::json!({}),
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_restream_requires_completed_job() {
        let (store, transport, orchestrator) = setup();

        let job = submitted_and_probed(&store, &orchestrator).await;
        let err = orchestrator
            .request_restream(&job.id, "youtube", HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));

        // Drive the job to completion, then restream.
        for task in &store.tasks_of_type(TaskType::Transcode) {
            orchestrator
                .handle_task_event(&TaskEvent::completed(
                    task.id.clone(),
                    transcode_result(task),
                ))
                .await
                .unwrap();
        }
        let stitch = store.tasks_of_type(TaskType::Stitch).remove(0);
        orchestrator
            .handle_task_event(&TaskEvent::completed(stitch.id.clone(), serde_json::json!({})))
            .await
            .unwrap();

        let task = orchestrator
            .request_restream(&job.id, "youtube", HashMap::new())
            .await
            .unwrap();
        assert_eq!(task.task_type, TaskType::Restream);
        assert_eq!(
            transport.dispatched().last().unwrap().task_type,
            TaskType::Restream
        );
    }

    #[tokio::test]
    async fn test_hls_manifest_emitted_when_enabled() {
        let store = Arc::new(MemStore::default());
        let transport = Arc::new(RecordingTransport::default());
        let config = OrchestratorConfig {
            emit_hls_manifest: true,
            ..OrchestratorConfig::default()
        };
        let orchestrator = Orchestrator::new(
            store.clone(),
            store.clone(),
            transport.clone(),
            config,
        )
        .with_profiles(test_catalog());

        submitted_and_probed(&store, &orchestrator).await;
        for task in &store.tasks_of_type(TaskType::Transcode) {
            orchestrator
                .handle_task_event(&TaskEvent::completed(
                    task.id.clone(),
                    transcode_result(task),
                ))
                .await
                .unwrap();
        }
        let stitch = store.tasks_of_type(TaskType::Stitch).remove(0);
        orchestrator
            .handle_task_event(&TaskEvent::completed(stitch.id.clone(), serde_json::json!({})))
            .await
            .unwrap();

        let manifests = store.tasks_of_type(TaskType::Manifest);
        assert_eq!(manifests.len(), 1);
        let params: ManifestParams =
            serde_json::from_value(manifests[0].params.clone()).unwrap();
        assert_eq!(params.variants.len(), 1);
        assert_eq!(params.variants[0].resolution, "1920x1080");
    }
}
