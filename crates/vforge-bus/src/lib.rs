//! Redis-backed message bus for the VForge platform.
//!
//! Two transports share one Redis deployment:
//! - the dispatch queue (`jobs.dispatch`): a Redis Stream with a consumer
//!   group, giving work-queue semantics with at-least-once delivery,
//!   explicit acks, stale-claim crash recovery and a dead-letter stream;
//! - the event side: a durable `jobs.events` stream consumed by the
//!   orchestrator replicas, dual-written to a Pub/Sub channel for live
//!   observers, plus fire-and-forget lifecycle and telemetry channels.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod subjects;

pub use config::BusConfig;
pub use dispatch::{Delivery, DispatchQueue};
pub use error::{BusError, BusResult};
pub use events::EventBus;
pub use subjects::{lifecycle_channel, telemetry_channel, JOBS_EVENTS_CHANNEL};
