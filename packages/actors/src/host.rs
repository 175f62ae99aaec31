//! The host runtime as seen by flow nodes.

use chrono::Utc;
use jobflow_core::{LogLevel, Metric, NodeEvent, NodeStatus, OutboundBatch};
use tokio::sync::broadcast;

/// Everything a node reports outward.
pub trait NodeHost: Send + Sync + 'static {
    fn status(&self, node: &str, status: NodeStatus);

    /// Emit one positional batch of outbound messages.
    fn send(&self, node: &str, batch: OutboundBatch);

    fn metric(&self, node: &str, metric: Metric);

    /// Report an error; `context` names the node that raised it.
    fn error(&self, node: &str, message: &str, context: &str);

    fn log(&self, node: &str, level: LogLevel, text: &str);
}

/// A [`NodeHost`] that publishes every call as a [`NodeEvent`].
///
/// Logs and errors are mirrored to `tracing`.
#[derive(Debug, Clone)]
pub struct EventHost {
    event_tx: broadcast::Sender<NodeEvent>,
}

impl EventHost {
    pub fn new(event_tx: broadcast::Sender<NodeEvent>) -> Self {
        Self { event_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.event_tx.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<NodeEvent> {
        self.event_tx.clone()
    }

    fn publish(&self, event: NodeEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}

impl NodeHost for EventHost {
    fn status(&self, node: &str, status: NodeStatus) {
        self.publish(NodeEvent::Status {
            node: node.to_string(),
            status,
            timestamp: Utc::now(),
        });
    }

    fn send(&self, node: &str, batch: OutboundBatch) {
        tracing::debug!(
            "Node {} sending {} message(s) for {}",
            node,
            batch.message_count(),
            batch.correlation_id
        );
        self.publish(NodeEvent::Output {
            node: node.to_string(),
            batch,
            timestamp: Utc::now(),
        });
    }

    fn metric(&self, node: &str, metric: Metric) {
        self.publish(NodeEvent::Metric {
            node: node.to_string(),
            metric,
            timestamp: Utc::now(),
        });
    }

    fn error(&self, node: &str, message: &str, context: &str) {
        tracing::error!("[{}] {}", context, message);
        self.publish(NodeEvent::Error {
            node: node.to_string(),
            message: message.to_string(),
            context: context.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn log(&self, node: &str, level: LogLevel, text: &str) {
        match level {
            LogLevel::Info => tracing::info!("[{}] {}", node, text),
            LogLevel::Warn => tracing::warn!("[{}] {}", node, text),
            LogLevel::Error => tracing::error!("[{}] {}", node, text),
        }
        self.publish(NodeEvent::Log {
            node: node.to_string(),
            level,
            text: text.to_string(),
            timestamp: Utc::now(),
        });
    }
}
