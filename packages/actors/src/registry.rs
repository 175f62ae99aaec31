//! Lookup of deployed endpoints and nodes by configuration id.

use std::collections::HashMap;

use ractor::ActorRef;

use crate::endpoint_actor::ConnectionManager;
use crate::messages::{ConsumerMessage, ProducerMessage};

/// Everything one supervisor has deployed.
///
/// Owned by the supervisor actor, so lookups never race with deploys.
#[derive(Default)]
pub struct FlowRegistry {
    endpoints: HashMap<String, ConnectionManager>,
    producers: HashMap<String, ActorRef<ProducerMessage>>,
    consumers: HashMap<String, ActorRef<ConsumerMessage>>,
}

impl FlowRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if any endpoint or node uses `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.endpoints.contains_key(id)
            || self.producers.contains_key(id)
            || self.consumers.contains_key(id)
    }

    pub fn register_endpoint(&mut self, id: &str, manager: ConnectionManager) {
        self.endpoints.insert(id.to_string(), manager);
    }

    /// Get an endpoint's connection manager by id.
    pub fn endpoint(&self, id: &str) -> Option<&ConnectionManager> {
        self.endpoints.get(id)
    }

    pub fn register_producer(&mut self, id: &str, producer: ActorRef<ProducerMessage>) {
        self.producers.insert(id.to_string(), producer);
    }

    pub fn producer(&self, id: &str) -> Option<&ActorRef<ProducerMessage>> {
        self.producers.get(id)
    }

    pub fn register_consumer(&mut self, id: &str, consumer: ActorRef<ConsumerMessage>) {
        self.consumers.insert(id.to_string(), consumer);
    }

    pub fn consumer(&self, id: &str) -> Option<&ActorRef<ConsumerMessage>> {
        self.consumers.get(id)
    }

    /// All producer and consumer ids, sorted.
    pub fn node_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .producers
            .keys()
            .chain(self.consumers.keys())
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// All endpoint ids, sorted.
    pub fn endpoint_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.endpoints.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Remove and return every producer and consumer.
    pub fn take_nodes(
        &mut self,
    ) -> (Vec<ActorRef<ProducerMessage>>, Vec<ActorRef<ConsumerMessage>>) {
        (
            self.producers.drain().map(|(_, p)| p).collect(),
            self.consumers.drain().map(|(_, c)| c).collect(),
        )
    }

    /// Remove and return every endpoint.
    pub fn take_endpoints(&mut self) -> Vec<ConnectionManager> {
        self.endpoints.drain().map(|(_, e)| e).collect()
    }
}
