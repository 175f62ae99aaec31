//! Core domain types for queue-backed flows.
//!
//! This crate contains shared types used across all packages:
//! - QueueEndpoint and EndpointEvent for named queue connections
//! - Job, Message and DoneCallback for units of work
//! - NodeStatus, Metric and OutboundBatch for the host-facing surface
//! - NodeEvent for real-time updates
//! - FlowConfig and RuntimeSettings for configuration

mod batch;
mod config;
mod endpoint;
mod events;
mod job;
mod message;
mod metric;
mod status;

pub use batch::{OutboundBatch, OutputSlot};
pub use config::{
    ConfigError, ConsumerConfig, FlowConfig, ProducerConfig, ReleasePolicy, RuntimeSettings,
    ScriptSource,
};
pub use endpoint::{ConnectionPhase, EndpointEvent, QueueEndpoint};
pub use events::{LogLevel, NodeEvent};
pub use job::{DoneCallback, Job, JobId, JobStatus};
pub use message::{CORRELATION_KEY, Message, new_correlation_id};
pub use metric::{DURATION_METRIC, Metric, duration_millis};
pub use status::{NodeStatus, StatusFill, StatusShape};
