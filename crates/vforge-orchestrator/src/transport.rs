//! Outbound bus operations behind a seam.

use async_trait::async_trait;

use vforge_bus::{BusResult, DispatchQueue, EventBus};
use vforge_models::{JobCancelledEvent, Task};

/// What the state machine needs from the bus: dispatch publication and
/// lifecycle notifications.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a task on the dispatch subject.
    async fn dispatch(&self, task: &Task) -> BusResult<()>;

    /// Publish the `events.job.cancelled` notification.
    async fn publish_job_cancelled(&self, event: &JobCancelledEvent) -> BusResult<()>;
}

/// Production transport over the Redis bus.
pub struct BusTransport {
    dispatch: DispatchQueue,
    events: EventBus,
}

impl BusTransport {
    pub fn new(dispatch: DispatchQueue, events: EventBus) -> Self {
        Self { dispatch, events }
    }
}

#[async_trait]
impl Transport for BusTransport {
    async fn dispatch(&self, task: &Task) -> BusResult<()> {
        self.dispatch.publish_task(task).await?;
        Ok(())
    }

    async fn publish_job_cancelled(&self, event: &JobCancelledEvent) -> BusResult<()> {
        self.events.publish_job_cancelled(event).await
    }
}
