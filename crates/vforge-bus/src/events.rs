//! Task-event fan-in and lifecycle fan-out.

use std::pin::Pin;

use futures_util::Stream;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use vforge_models::{JobCancelledEvent, StreamLifecycleEvent, StreamTelemetry, TaskEvent};

use crate::config::BusConfig;
use crate::error::{BusError, BusResult};
use crate::subjects::{lifecycle_channel, telemetry_channel, JOBS_EVENTS_CHANNEL};

/// Event side of the bus.
///
/// Task events are dual-written: XADD to the durable `events` stream that
/// the orchestrator replicas consume as one group, and PUBLISH on the
/// `jobs.events` channel for live observers. Lifecycle notifications and
/// telemetry are fire-and-forget Pub/Sub.
#[derive(Clone)]
pub struct EventBus {
    client: redis::Client,
    config: BusConfig,
}

impl EventBus {
    /// Create a new event bus.
    pub fn new(config: BusConfig) -> BusResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> BusResult<Self> {
        Self::new(BusConfig::from_env())
    }

    /// Initialize the durable event stream and its consumer group.
    pub async fn init(&self) -> BusResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.events_stream)
            .arg(&self.config.events_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.events_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.events_group);
            }
            Err(e) => return Err(BusError::Redis(e)),
        }

        Ok(())
    }

    /// Publish a task event.
    pub async fn publish_task_event(&self, event: &TaskEvent) -> BusResult<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(event)?;

        // Durable write for the orchestrator, fan-out for observers.
        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.events_stream)
            .arg("*")
            .arg("event")
            .arg(&payload)
            .query_async(&mut conn)
            .await?;

        conn.publish::<_, _, ()>(JOBS_EVENTS_CHANNEL, &payload).await?;

        debug!(
            task_id = %event.task_id,
            event = event.event.as_str(),
            "Published task event"
        );

        Ok(message_id)
    }

    /// Consume task events as one of the orchestrator replicas.
    ///
    /// Malformed entries are acked and dropped; there is nothing to retry
    /// in a payload that cannot be parsed.
    pub async fn consume_task_events(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> BusResult<Vec<(String, TaskEvent)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.events_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.events_stream)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let mut events = Vec::new();

        for stream_key in result.keys {
            for entry in stream_key.ids {
                let message_id = entry.id.clone();
                match entry.map.get("event") {
                    Some(redis::Value::BulkString(payload)) => {
                        match serde_json::from_slice::<TaskEvent>(payload) {
                            Ok(event) => events.push((message_id, event)),
                            Err(e) => {
                                warn!("Dropping malformed task event {}: {}", message_id, e);
                                self.ack_task_event(&message_id).await.ok();
                            }
                        }
                    }
                    _ => {
                        warn!("Event entry {} has no event field, dropping", message_id);
                        self.ack_task_event(&message_id).await.ok();
                    }
                }
            }
        }

        Ok(events)
    }

    /// Acknowledge a consumed task event.
    pub async fn ack_task_event(&self, message_id: &str) -> BusResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.events_stream)
            .arg(&self.config.events_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.events_stream)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }

    /// Claim task events whose orchestrator replica went quiet.
    pub async fn claim_stale_task_events(
        &self,
        consumer_name: &str,
        count: usize,
    ) -> BusResult<Vec<(String, TaskEvent)>> {
        let min_idle_ms = self.config.visibility_timeout.as_millis() as u64;
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let reply: redis::streams::StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.events_stream)
            .arg(&self.config.events_group)
            .arg(consumer_name)
            .arg(min_idle_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let mut events = Vec::new();
        for entry in reply.claimed {
            if let Some(redis::Value::BulkString(payload)) = entry.map.get("event") {
                match serde_json::from_slice::<TaskEvent>(payload) {
                    Ok(event) => {
                        info!("Claimed stale task event {}", entry.id);
                        events.push((entry.id.clone(), event));
                    }
                    Err(e) => {
                        warn!("Dropping malformed claimed event {}: {}", entry.id, e);
                        self.ack_task_event(&entry.id).await.ok();
                    }
                }
            }
        }

        Ok(events)
    }

    /// Publish a job-cancelled lifecycle notification.
    pub async fn publish_job_cancelled(&self, event: &JobCancelledEvent) -> BusResult<()> {
        self.publish_on(&lifecycle_channel("job", "cancelled"), event)
            .await
    }

    /// Publish a stream lifecycle notification
    /// (`events.stream.started` / `events.stream.ended`).
    pub async fn publish_stream_lifecycle(&self, event: &StreamLifecycleEvent) -> BusResult<()> {
        self.publish_on(&lifecycle_channel("stream", event.action.as_str()), event)
            .await
    }

    /// Publish telemetry for one live stream.
    pub async fn publish_telemetry(&self, telemetry: &StreamTelemetry) -> BusResult<()> {
        self.publish_on(&telemetry_channel(&telemetry.stream_id), telemetry)
            .await
    }

    /// Publish an arbitrary payload on a lifecycle channel, e.g. a worker
    /// crash report on `events.worker.error`.
    pub async fn publish_lifecycle(
        &self,
        domain: &str,
        action: &str,
        payload: &serde_json::Value,
    ) -> BusResult<()> {
        self.publish_on(&lifecycle_channel(domain, action), payload)
            .await
    }

    async fn publish_on<T: Serialize>(&self, channel: &str, message: &T) -> BusResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(message)?;
        conn.publish::<_, _, ()>(channel, payload).await?;
        debug!("Published on {}", channel);
        Ok(())
    }

    /// Subscribe to live task events (the Pub/Sub mirror, not the durable
    /// stream).
    pub async fn subscribe_task_events(
        &self,
    ) -> BusResult<Pin<Box<dyn Stream<Item = TaskEvent> + Send>>> {
        self.subscribe_channel(JOBS_EVENTS_CHANNEL).await
    }

    /// Subscribe to a lifecycle channel.
    pub async fn subscribe_lifecycle(
        &self,
        domain: &str,
        action: &str,
    ) -> BusResult<Pin<Box<dyn Stream<Item = serde_json::Value> + Send>>> {
        self.subscribe_channel(&lifecycle_channel(domain, action))
            .await
    }

    /// Subscribe to telemetry for one stream.
    pub async fn subscribe_telemetry(
        &self,
        stream_id: &str,
    ) -> BusResult<Pin<Box<dyn Stream<Item = StreamTelemetry> + Send>>> {
        self.subscribe_channel(&telemetry_channel(stream_id)).await
    }

    async fn subscribe_channel<T: DeserializeOwned + Send + 'static>(
        &self,
        channel: &str,
    ) -> BusResult<Pin<Box<dyn Stream<Item = T> + Send>>> {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}
