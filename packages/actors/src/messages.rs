//! Message types for actor communication.

use broker::QueueRef;
use jobflow_core::{
    ConfigError, ConnectionPhase, DoneCallback, EndpointEvent, FlowConfig, Job, JobId, Message,
    NodeEvent,
};
use ractor::RpcReplyPort;
use tokio::sync::broadcast;

/// Messages for the EndpointActor.
#[derive(Debug)]
pub enum EndpointMessage {
    /// Get the queue handle, connecting first if needed.
    Connect {
        reply: RpcReplyPort<Result<QueueRef, ConnectError>>,
    },

    /// A broker connection attempt finished.
    ConnectFinished {
        attempt: u64,
        result: Result<QueueRef, String>,
    },

    /// A node started using this endpoint. Replies with the new use count.
    Register { reply: RpcReplyPort<usize> },

    /// A node stopped using this endpoint. Replies with the new use count.
    Deregister { reply: RpcReplyPort<usize> },

    /// Get the current use count.
    UseCount { reply: RpcReplyPort<usize> },

    /// Get the connection phase.
    GetState { reply: RpcReplyPort<ConnectionPhase> },

    /// Subscribe to connection events.
    Subscribe {
        reply: RpcReplyPort<broadcast::Receiver<EndpointEvent>>,
    },

    /// Close the connection. Replies once disconnected.
    Close { reply: RpcReplyPort<()> },
}

/// Messages for the ProducerActor.
#[derive(Debug)]
pub enum ProducerMessage {
    /// Enqueue an inbound message as a job.
    Input {
        message: Message,
        reply: Option<RpcReplyPort<Result<JobId, String>>>,
    },

    /// Deregister and stop.
    Close { reply: RpcReplyPort<()> },
}

/// Messages for the ConsumerActor.
#[derive(Debug)]
pub enum ConsumerMessage {
    /// Connect and start receiving jobs.
    Start,

    /// Run the script on a delivered job.
    ProcessJob { job: Box<Job>, done: DoneCallback },

    /// Run `close` handlers, deregister and stop.
    Close { reply: RpcReplyPort<()> },
}

/// Messages for the FlowSupervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Deploy a flow, replacing nothing: node ids must be new.
    Deploy {
        flow: Box<FlowConfig>,
        reply: RpcReplyPort<Result<(), String>>,
    },

    /// Route an inbound message to a producer.
    Input {
        producer: String,
        message: Message,
        reply: RpcReplyPort<Result<JobId, String>>,
    },

    /// List deployed node ids.
    ListNodes { reply: RpcReplyPort<Vec<String>> },

    /// Subscribe to node events.
    Subscribe {
        reply: RpcReplyPort<broadcast::Receiver<NodeEvent>>,
    },

    /// Close all nodes, then all endpoints, then stop.
    Shutdown { reply: RpcReplyPort<()> },
}

/// Why a connect request failed. Cloned to every waiter of an attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("Connection to {endpoint} failed: {reason}")]
    Failed { endpoint: String, reason: String },

    #[error("Endpoint {0} closed while connecting")]
    Closed(String),

    #[error("Endpoint {0} is unavailable")]
    Unavailable(String),
}

/// Result type for internal operations.
pub type ActorResult<T> = Result<T, ActorError>;

/// Error type for actor operations.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("Actor error: {0}")]
    Actor(String),

    #[error("Timeout")]
    Timeout,
}
