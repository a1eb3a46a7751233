//! The worker's dispatch-message state machine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use vforge_bus::{Delivery, DispatchQueue, EventBus};
use vforge_db::TaskStore;
use vforge_models::{Task, TaskEvent, WorkerId};
use vforge_plugins::PluginHost;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::runner::TaskRunner;

/// Externally observable worker status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Busy,
}

/// What to do with a freshly delivered dispatch message.
enum MessageFate {
    Execute(Box<Task>),
    /// Malformed payload or unknown task type; never redeliver.
    Terminate(String),
}

/// Decide a message's fate from its raw payload.
///
/// Deserialisation covers both failure modes the contract names: non-JSON
/// payloads and unknown task types (the type enum rejects them).
fn classify(payload: &str) -> MessageFate {
    match serde_json::from_str::<Task>(payload) {
        Ok(task) => MessageFate::Execute(Box::new(task)),
        Err(e) => MessageFate::Terminate(format!("unusable dispatch payload: {e}")),
    }
}

/// A worker: claims dispatched tasks, runs them, and reports the outcome.
pub struct Worker {
    config: WorkerConfig,
    id: WorkerId,
    queue: Arc<DispatchQueue>,
    events: Arc<EventBus>,
    tasks: Arc<dyn TaskStore>,
    runner: Arc<TaskRunner>,
    busy: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    cancel: watch::Sender<bool>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        queue: DispatchQueue,
        events: Arc<EventBus>,
        tasks: Arc<dyn TaskStore>,
        plugins: Arc<PluginHost>,
    ) -> Self {
        let id = WorkerId::new();
        let runner = Arc::new(TaskRunner::new(
            config.work_dir.clone(),
            config.progress_buffer,
            Arc::clone(&events),
            plugins,
            id.clone(),
        ));
        let (shutdown, _) = watch::channel(false);
        let (cancel, _) = watch::channel(false);

        Self {
            config,
            id,
            queue: Arc::new(queue),
            events,
            tasks,
            runner,
            busy: Arc::new(AtomicBool::new(false)),
            shutdown,
            cancel,
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Idle or busy; set while a handler is active.
    pub fn status(&self) -> WorkerStatus {
        if self.busy.load(Ordering::SeqCst) {
            WorkerStatus::Busy
        } else {
            WorkerStatus::Idle
        }
    }

    /// Signal shutdown. In-flight child processes receive the cancellation.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let _ = self.cancel.send(true);
    }

    /// Run the consume loop until shutdown.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(worker_id = %self.id, "Starting worker");

        self.queue.init().await?;
        self.events.init().await?;
        tokio::fs::create_dir_all(&self.config.work_dir).await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut claim_tick = tokio::time::interval(self.config.claim_interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping worker");
                        break;
                    }
                }
                _ = claim_tick.tick() => {
                    match self.queue.claim_stale(self.id.as_str(), 5).await {
                        Ok(deliveries) => {
                            for delivery in deliveries {
                                self.process(delivery).await;
                            }
                        }
                        Err(e) => warn!("Failed to claim stale messages: {}", e),
                    }
                }
                result = self.consume_once() => {
                    if let Err(e) = result {
                        error!("Error consuming dispatch messages: {}", e);
                        // Back off on error
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
        Ok(())
    }

    async fn consume_once(&self) -> WorkerResult<()> {
        let deliveries = self.queue.consume(self.id.as_str(), 1000, 1).await?;
        for delivery in deliveries {
            self.process(delivery).await;
        }
        Ok(())
    }

    /// Drive one dispatch message through parse, claim, execute, finalise.
    async fn process(&self, delivery: Delivery) {
        // 1. Parse; garbage is terminated, not retried.
        let task = match classify(&delivery.payload) {
            MessageFate::Execute(task) => *task,
            MessageFate::Terminate(reason) => {
                self.queue.term(&delivery.message_id, &reason).await.ok();
                return;
            }
        };

        // 2. Skip redeliveries of tasks the orchestrator already closed.
        match self.tasks.get_task(&task.id).await {
            Ok(Some(stored)) if stored.status.is_terminal() => {
                self.queue
                    .term(&delivery.message_id, "task already terminal")
                    .await
                    .ok();
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(task_id = %task.id, "Store unreachable, leaving message: {}", e);
                self.queue.nack(&delivery.message_id, "store unreachable");
                return;
            }
        }

        // 3. Claim. The CAS may be a no-op on redelivery; that is fine.
        self.tasks.mark_task_assigned(&task.id, &self.id).await.ok();
        self.tasks.mark_task_running(&task.id).await.ok();

        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            worker_id = %self.id,
            "Executing task"
        );

        self.busy.store(true, Ordering::SeqCst);
        let outcome = self.execute(&task).await;
        self.busy.store(false, Ordering::SeqCst);

        // 4. Finalise.
        match outcome {
            Ok(result) => {
                let event = TaskEvent::completed(task.id.clone(), result)
                    .from_worker(self.id.clone());
                match self.events.publish_task_event(&event).await {
                    Ok(_) => {
                        info!(task_id = %task.id, "Task completed");
                        if let Err(e) = self.queue.ack(&delivery.message_id).await {
                            warn!("Failed to ack message {}: {}", delivery.message_id, e);
                        }
                    }
                    Err(e) => {
                        // Completion must reach the orchestrator; redeliver
                        // and rely on idempotent completion.
                        warn!(
                            task_id = %task.id,
                            "Failed to publish completion, leaving message: {}", e
                        );
                        self.queue.nack(&delivery.message_id, "event publish failed");
                    }
                }
            }
            Err(e) => self.finalise_failure(&delivery, &task, e).await,
        }
    }

    async fn finalise_failure(&self, delivery: &Delivery, task: &Task, error: WorkerError) {
        if error.is_benign() {
            info!(task_id = %task.id, "Task interrupted: {}", error);
        } else {
            error!(task_id = %task.id, "Task failed: {}", error);
        }

        let event =
            TaskEvent::failed(task.id.clone(), error.to_string()).from_worker(self.id.clone());
        if let Err(e) = self.events.publish_task_event(&event).await {
            warn!(task_id = %task.id, "Failed to publish failure event: {}", e);
        }

        if error.is_permanent() {
            self.queue
                .term(&delivery.message_id, &error.to_string())
                .await
                .ok();
            return;
        }

        // Transient: leave the message for redelivery, dead-lettering once
        // the delivery count exhausts the bus policy.
        match self.queue.delivery_count(&delivery.message_id).await {
            Ok(count) if count >= self.queue.max_deliveries() => {
                debug!(
                    task_id = %task.id,
                    deliveries = count,
                    "Delivery cap reached, dead-lettering"
                );
                self.queue
                    .dead_letter(&delivery.message_id, &delivery.payload, &error.to_string())
                    .await
                    .ok();
            }
            _ => self.queue.nack(&delivery.message_id, &error.to_string()),
        }
    }

    /// Run the handler inside a crash barrier: a panicking handler must not
    /// take the worker down.
    async fn execute(&self, task: &Task) -> WorkerResult<serde_json::Value> {
        let runner = Arc::clone(&self.runner);
        let owned = task.clone();
        let cancel = self.cancel.subscribe();
        let timeout = self.config.task_timeout;

        let handle = tokio::spawn(async move {
            match tokio::time::timeout(timeout, runner.run(&owned, cancel)).await {
                Ok(result) => result,
                Err(_) => Err(WorkerError::Timeout(format!(
                    "exceeded {}s",
                    timeout.as_secs()
                ))),
            }
        });

        match handle.await {
            Ok(result) => result,
            Err(join_error) if join_error.is_panic() => {
                let report = serde_json::json!({
                    "worker_id": self.id.as_str(),
                    "task_id": task.id.as_str(),
                    "error": join_error.to_string(),
                });
                if let Err(e) = self
                    .events
                    .publish_lifecycle("worker", "error", &report)
                    .await
                {
                    warn!("Failed to publish crash report: {}", e);
                }
                Err(WorkerError::internal(format!(
                    "handler panicked: {join_error}"
                )))
            }
            Err(join_error) => Err(WorkerError::internal(format!(
                "handler aborted: {join_error}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vforge_models::{JobId, TaskType};

    #[test]
    fn test_malformed_payload_is_terminated() {
        assert!(matches!(
            classify("this is not json"),
            MessageFate::Terminate(_)
        ));
        assert!(matches!(classify("{}"), MessageFate::Terminate(_)));
    }

    #[test]
    fn test_unknown_task_type_is_terminated() {
        let task = Task::new(JobId::new(), TaskType::Probe, serde_json::json!({}));
        let mut payload = serde_json::to_value(&task).unwrap();
        payload["task_type"] = serde_json::json!("reticulate");

        assert!(matches!(
            classify(&payload.to_string()),
            MessageFate::Terminate(_)
        ));
    }

    #[test]
    fn test_valid_task_is_executed() {
        let task = Task::new(
            JobId::new(),
            TaskType::Probe,
            serde_json::json!({"url": "https://example.com/in.mp4"}),
        );
        let payload = serde_json::to_string(&task).unwrap();

        match classify(&payload) {
            MessageFate::Execute(parsed) => {
                assert_eq!(parsed.id, task.id);
                assert_eq!(parsed.task_type, TaskType::Probe);
            }
            MessageFate::Terminate(reason) => panic!("terminated: {reason}"),
        }
    }
}
