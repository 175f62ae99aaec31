//! Actor system for queue-backed flows.
//!
//! This crate provides the Ractor-based actors that connect flow nodes to
//! named queues and run transform scripts on delivered jobs.
//!
//! # Architecture
//!
//! - `FlowSupervisor` - Deploys a flow and owns all of its actors
//! - `EndpointActor` - Shares one connection per queue endpoint between nodes
//! - `ProducerActor` - Enqueues inbound messages as jobs
//! - `ConsumerActor` - Runs a compiled script on each delivered job
//!
//! Nodes talk to the outside world only through a [`NodeHost`]; the
//! supervisor uses [`EventHost`], which turns every call into a
//! [`NodeEvent`](jobflow_core::NodeEvent) on a broadcast channel.
//!
//! # Usage
//!
//! ```ignore
//! use actors::{FlowClient, SupervisorArgs, start_supervisor};
//!
//! let (supervisor, _handle) = start_supervisor(SupervisorArgs::new(broker)).await?;
//! let flows = FlowClient::new(supervisor);
//! flows.deploy(flow).await?;
//! let job = flows.input("producer-1", message).await?;
//! ```

mod consumer;
mod dispatcher;
mod endpoint_actor;
mod host;
mod messages;
mod persistence;
mod processor;
mod producer;
pub mod registry;
mod supervisor;

pub use consumer::{ConsumerActor, ConsumerArgs};
pub use dispatcher::{ResultDispatcher, normalize};
pub use endpoint_actor::{ConnectionManager, EndpointActor, EndpointActorState};
pub use host::{EventHost, NodeHost};
pub use messages::{
    ActorError, ActorResult, ConnectError, ConsumerMessage, EndpointMessage, ProducerMessage,
    SupervisorMessage,
};
pub use persistence::{FlowStore, PersistenceError};
pub use processor::{JobOutcome, JobProcessor};
pub use producer::{ProducerActor, ProducerArgs};
pub use registry::FlowRegistry;
pub use supervisor::{FlowClient, FlowSupervisor, SupervisorArgs, start_supervisor};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
