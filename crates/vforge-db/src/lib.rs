//! Postgres metadata store for the VForge platform.
//!
//! The relational store is the source of truth for job and task state; the
//! bus only transports transitions. Status updates are compare-and-set so
//! duplicate event deliveries cannot replay a transition.

pub mod error;
pub mod jobs;
pub mod store;
pub mod tasks;

pub use error::{DbError, DbResult};
pub use jobs::PgJobRepo;
pub use store::{Db, JobStore, TaskStore};
pub use tasks::PgTaskRepo;

/// Table definitions, applied out-of-band by the deployment.
pub const SCHEMA_SQL: &str = include_str!("../schema.sql");
