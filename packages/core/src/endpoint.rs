//! Queue endpoint types shared by producers and consumers.

use serde::{Deserialize, Serialize};

/// Identity and connection parameters of one named queue.
///
/// Endpoints are configuration entities: many producer and consumer nodes
/// reference the same endpoint by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueEndpoint {
    /// Configuration node id referenced by producers and consumers.
    pub id: String,
    /// Name of the queue at the broker.
    pub name: String,
    /// Broker host. Empty means the broker's default host.
    #[serde(default)]
    pub address: String,
    /// Broker port.
    pub port: u16,
}

impl QueueEndpoint {
    /// Create a new endpoint.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            port,
        }
    }

    /// Server label used in connection logs, `address@port` or just the port.
    pub fn server_label(&self) -> String {
        if self.address.is_empty() {
            self.port.to_string()
        } else {
            format!("{}@{}", self.address, self.port)
        }
    }
}

impl std::fmt::Display for QueueEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.server_label())
    }
}

/// Coarse connection phase of an endpoint, without the live handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionPhase::Disconnected => write!(f, "disconnected"),
            ConnectionPhase::Connecting => write!(f, "connecting"),
            ConnectionPhase::Connected => write!(f, "connected"),
        }
    }
}

/// Lifecycle events emitted by an endpoint's connection manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EndpointEvent {
    /// A broker connection was established.
    Connected { endpoint: String, server: String },
    /// The broker connection was closed.
    Disconnected { endpoint: String },
}
