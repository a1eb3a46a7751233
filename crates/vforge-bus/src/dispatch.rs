//! Task dispatch queue over Redis Streams.

use redis::AsyncCommands;
use tracing::{debug, info, warn};

use vforge_models::Task;

use crate::config::BusConfig;
use crate::error::{BusError, BusResult};

/// One delivered dispatch message.
///
/// The payload is handed to the worker unparsed: deciding whether a
/// malformed message is terminated or retried is the worker's call, not the
/// transport's.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Stream entry id, used for ack/term
    pub message_id: String,
    /// Raw serialised task
    pub payload: String,
}

/// Durable work queue carrying serialised tasks.
///
/// Work-queue semantics come from a Redis Stream plus one consumer group:
/// each message is delivered to a single consumer, redelivered via
/// stale-claim when the consumer dies, and dead-lettered after
/// `max_deliveries` failed attempts.
#[derive(Clone)]
pub struct DispatchQueue {
    client: redis::Client,
    config: BusConfig,
}

impl DispatchQueue {
    /// Create a new dispatch queue.
    pub fn new(config: BusConfig) -> BusResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> BusResult<Self> {
        Self::new(BusConfig::from_env())
    }

    /// Initialize the queue (create the consumer group if not exists).
    pub async fn init(&self) -> BusResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.dispatch_stream)
            .arg(&self.config.dispatch_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.dispatch_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.dispatch_group);
            }
            Err(e) => return Err(BusError::Redis(e)),
        }

        Ok(())
    }

    /// Publish a task for exactly one worker to claim.
    pub async fn publish_task(&self, task: &Task) -> BusResult<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(task)?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.dispatch_stream)
            .arg("*")
            .arg("task")
            .arg(&payload)
            .query_async(&mut conn)
            .await?;

        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            message_id = %message_id,
            "Dispatched task"
        );

        Ok(message_id)
    }

    /// Consume new messages as this consumer.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> BusResult<Vec<Delivery>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.dispatch_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.dispatch_stream)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let mut deliveries = Vec::new();

        for stream_key in result.keys {
            for entry in stream_key.ids {
                if let Some(redis::Value::BulkString(payload)) = entry.map.get("task") {
                    deliveries.push(Delivery {
                        message_id: entry.id.clone(),
                        payload: String::from_utf8_lossy(payload).to_string(),
                    });
                } else {
                    warn!("Dispatch entry {} has no task field, dropping", entry.id);
                    self.ack(&entry.id).await.ok();
                }
            }
        }

        Ok(deliveries)
    }

    /// Acknowledge a message (processing finished, successfully or not).
    pub async fn ack(&self, message_id: &str) -> BusResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.dispatch_stream)
            .arg(&self.config.dispatch_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.dispatch_stream)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acked dispatch message {}", message_id);
        Ok(())
    }

    /// Terminate a message permanently (malformed payload, unknown type).
    ///
    /// The message is removed from the pending set and never redelivered.
    pub async fn term(&self, message_id: &str, reason: &str) -> BusResult<()> {
        warn!("Terminating dispatch message {}: {}", message_id, reason);
        self.ack(message_id).await
    }

    /// Negative-acknowledge: leave the message pending so it redelivers via
    /// stale-claim after the visibility timeout.
    pub fn nack(&self, message_id: &str, reason: &str) {
        debug!(
            "Nacked dispatch message {} ({}); will redeliver after {:?}",
            message_id, reason, self.config.visibility_timeout
        );
    }

    /// Claim messages whose consumer went quiet for at least the visibility
    /// timeout. This is how crashed workers' tasks are recovered.
    pub async fn claim_stale(
        &self,
        consumer_name: &str,
        count: usize,
    ) -> BusResult<Vec<Delivery>> {
        let min_idle_ms = self.config.visibility_timeout.as_millis() as u64;
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // XAUTOCLAIM walks the pending entries list and transfers ownership
        // of entries idle past the threshold in one round trip.
        let reply: redis::streams::StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.dispatch_stream)
            .arg(&self.config.dispatch_group)
            .arg(consumer_name)
            .arg(min_idle_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let mut deliveries = Vec::new();
        for entry in reply.claimed {
            if let Some(redis::Value::BulkString(payload)) = entry.map.get("task") {
                info!("Claimed stale dispatch message {}", entry.id);
                deliveries.push(Delivery {
                    message_id: entry.id.clone(),
                    payload: String::from_utf8_lossy(payload).to_string(),
                });
            }
        }

        Ok(deliveries)
    }

    /// How many times a message has been delivered.
    pub async fn delivery_count(&self, message_id: &str) -> BusResult<u32> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let pending: Vec<Vec<redis::Value>> = redis::cmd("XPENDING")
            .arg(&self.config.dispatch_stream)
            .arg(&self.config.dispatch_group)
            .arg(message_id)
            .arg(message_id)
            .arg(1)
            .query_async(&mut conn)
            .await?;

        // Entry format: [id, consumer, idle_time_ms, delivery_count]
        let count = pending
            .first()
            .and_then(|entry| entry.get(3))
            .and_then(|v| match v {
                redis::Value::Int(n) => Some(*n as u32),
                _ => None,
            })
            .unwrap_or(1);

        Ok(count)
    }

    /// Move a message to the dead letter stream and ack the original.
    pub async fn dead_letter(
        &self,
        message_id: &str,
        payload: &str,
        error: &str,
    ) -> BusResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream)
            .arg("*")
            .arg("task")
            .arg(payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(message_id).await?;

        warn!("Dead-lettered dispatch message {}: {}", message_id, error);
        Ok(())
    }

    /// Queue length.
    pub async fn len(&self) -> BusResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.dispatch_stream).await?;
        Ok(len)
    }

    /// Max deliveries before dead-lettering.
    pub fn max_deliveries(&self) -> u32 {
        self.config.max_deliveries
    }
}
