//! Durable task-event consumption loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use vforge_bus::EventBus;

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorResult;
use crate::orchestrator::Orchestrator;

/// Consumes `jobs.events` as one replica of the orchestrator group and
/// feeds each event through the state machine.
pub struct EventConsumer {
    orchestrator: Arc<Orchestrator>,
    events: Arc<EventBus>,
    config: OrchestratorConfig,
    consumer_name: String,
    shutdown: watch::Sender<bool>,
}

impl EventConsumer {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        events: Arc<EventBus>,
        config: OrchestratorConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            orchestrator,
            events,
            config,
            consumer_name: format!("orchestrator-{}", Uuid::new_v4()),
            shutdown,
        }
    }

    /// Run until shutdown.
    pub async fn run(&self) -> OrchestratorResult<()> {
        info!("Starting event consumer '{}'", self.consumer_name);
        self.events.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut claim_tick = tokio::time::interval(self.config.claim_interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping event consumer");
                        break;
                    }
                }
                _ = claim_tick.tick() => {
                    if let Err(e) = self.claim_stale().await {
                        warn!("Failed to claim stale events: {}", e);
                    }
                }
                result = self.consume_batch() => {
                    if let Err(e) = result {
                        error!("Error consuming events: {}", e);
                        // Back off on error
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn consume_batch(&self) -> OrchestratorResult<()> {
        let events = self
            .events
            .consume_task_events(
                &self.consumer_name,
                self.config.event_block.as_millis() as u64,
                self.config.event_batch_size,
            )
            .await?;

        for (message_id, event) in events {
            self.apply(&message_id, event).await;
        }

        Ok(())
    }

    async fn claim_stale(&self) -> OrchestratorResult<()> {
        let events = self
            .events
            .claim_stale_task_events(&self.consumer_name, self.config.event_batch_size)
            .await?;

        if !events.is_empty() {
            info!("Claimed {} stale task events", events.len());
        }
        for (message_id, event) in events {
            self.apply(&message_id, event).await;
        }

        Ok(())
    }

    /// Apply one event, acking only on success so a transient failure
    /// (store or bus down) redelivers.
    async fn apply(&self, message_id: &str, event: vforge_models::TaskEvent) {
        match self.orchestrator.handle_task_event(&event).await {
            Ok(()) => {
                if let Err(e) = self.events.ack_task_event(message_id).await {
                    warn!("Failed to ack event {}: {}", message_id, e);
                }
            }
            Err(e) => {
                error!(
                    task_id = %event.task_id,
                    "Failed to handle task event, leaving for redelivery: {}",
                    e
                );
            }
        }
    }
}
