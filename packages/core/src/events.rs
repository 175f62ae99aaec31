//! Event types for real-time updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EndpointEvent, Metric, NodeStatus, OutboundBatch};

/// Severity of a node log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Events emitted by flow nodes toward the host runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NodeEvent {
    /// A node's visual status changed.
    Status {
        node: String,
        status: NodeStatus,
        timestamp: DateTime<Utc>,
    },
    /// A node emitted a batch of outbound messages.
    Output {
        node: String,
        batch: OutboundBatch,
        timestamp: DateTime<Utc>,
    },
    /// A node recorded a metric sample.
    Metric {
        node: String,
        metric: Metric,
        timestamp: DateTime<Utc>,
    },
    /// A node reported an error.
    Error {
        node: String,
        message: String,
        context: String,
        timestamp: DateTime<Utc>,
    },
    /// A node wrote a log line.
    Log {
        node: String,
        level: LogLevel,
        text: String,
        timestamp: DateTime<Utc>,
    },
    /// An endpoint's connection changed.
    Endpoint {
        change: EndpointEvent,
        timestamp: DateTime<Utc>,
    },
}

impl NodeEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            NodeEvent::Status { timestamp, .. } => *timestamp,
            NodeEvent::Output { timestamp, .. } => *timestamp,
            NodeEvent::Metric { timestamp, .. } => *timestamp,
            NodeEvent::Error { timestamp, .. } => *timestamp,
            NodeEvent::Log { timestamp, .. } => *timestamp,
            NodeEvent::Endpoint { timestamp, .. } => *timestamp,
        }
    }

    /// Get the id of the node this event belongs to, if any.
    pub fn node(&self) -> Option<&str> {
        match self {
            NodeEvent::Status { node, .. } => Some(node),
            NodeEvent::Output { node, .. } => Some(node),
            NodeEvent::Metric { node, .. } => Some(node),
            NodeEvent::Error { node, .. } => Some(node),
            NodeEvent::Log { node, .. } => Some(node),
            NodeEvent::Endpoint { .. } => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            NodeEvent::Status { node, status, .. } => {
                format!("Node {} status: {}", node, status.text)
            }
            NodeEvent::Output { node, batch, .. } => format!(
                "Node {} sent {} message(s) for {}",
                node,
                batch.message_count(),
                batch.correlation_id
            ),
            NodeEvent::Metric { node, metric, .. } => {
                format!("Node {} {} = {}", node, metric.name, metric.value)
            }
            NodeEvent::Error {
                node,
                message,
                context,
                ..
            } => format!("Node {} error in {}: {}", node, context, message),
            NodeEvent::Log {
                node, level, text, ..
            } => format!("Node {} [{}] {}", node, level, text),
            NodeEvent::Endpoint { change, .. } => match change {
                EndpointEvent::Connected { endpoint, server } => {
                    format!("Endpoint {} connected to {}", endpoint, server)
                }
                EndpointEvent::Disconnected { endpoint } => {
                    format!("Endpoint {} disconnected", endpoint)
                }
            },
        }
    }
}
