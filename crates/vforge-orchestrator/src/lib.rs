//! Job orchestration for the VForge platform.
//!
//! The orchestrator owns the job state machine: it accepts submissions,
//! creates the initial probe task, and advances jobs by reacting to task
//! events from workers. Every transition is compare-and-set against the
//! metadata store, so replicas can share one durable event consumer and
//! duplicate deliveries are no-ops.

pub mod config;
pub mod consumer;
pub mod error;
pub mod orchestrator;
pub mod transport;

pub use config::OrchestratorConfig;
pub use consumer::EventConsumer;
pub use error::{OrchestratorError, OrchestratorResult};
pub use orchestrator::Orchestrator;
pub use transport::{BusTransport, Transport};
