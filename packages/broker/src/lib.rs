//! Broker interface and a SurrealDB-backed work queue.
//!
//! Flow nodes only see the broker through three operations: `connect` to a
//! named queue, `add` a job, and `process` delivered jobs with a handler that
//! receives a completion callback. [`SurrealBroker`] implements them on top
//! of SurrealDB with at-least-once delivery.
//!
//! # Features
//!
//! - `memory` (default): in-memory storage, one database per broker instance
//! - `remote`: connect to a SurrealDB server over WebSocket

mod connection;
mod queue;
mod schema;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use jobflow_core::{DoneCallback, Job, QueueEndpoint};

pub use connection::{SurrealBroker, SurrealConfig};
pub use queue::SurrealQueue;
pub use schema::init_schema;

/// Future type returned by broker operations.
pub type BrokerFuture<T> = Pin<Box<dyn Future<Output = Result<T, BrokerError>> + Send>>;

/// Push-style callback invoked once per delivered job.
pub type JobHandler = Arc<dyn Fn(Job, DoneCallback) + Send + Sync>;

/// Shared reference to a live queue.
pub type QueueRef = Arc<dyn QueueHandle>;

/// A broker that can open named queues.
pub trait Broker: Send + Sync + 'static {
    /// Open a connection to the queue described by `endpoint`.
    fn connect(&self, endpoint: &QueueEndpoint) -> BrokerFuture<QueueRef>;
}

/// A live connection to one named queue.
pub trait QueueHandle: std::fmt::Debug + Send + Sync + 'static {
    /// Name of the queue at the broker.
    fn name(&self) -> &str;

    /// Enqueue a job.
    fn add(&self, job: Job) -> BrokerFuture<()>;

    /// Start delivering jobs to `handler`.
    fn process(&self, handler: JobHandler) -> BrokerFuture<()>;

    /// Stop delivery and release the connection. Resolves once disconnected.
    fn close(&self) -> BrokerFuture<()>;
}

/// Broker errors.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Queue {0} is closed")]
    Closed(String),
}
