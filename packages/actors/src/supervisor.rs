//! Supervisor actor that deploys flows and tears them down.

use std::sync::Arc;

use broker::Broker;
use futures_util::future::{join, join_all};
use jobflow_core::{FlowConfig, JobId, Message, NodeEvent, RuntimeSettings};
use library::ScriptLibrary;
use ractor::rpc::CallResult;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort, SupervisionEvent};
use tokio::sync::broadcast;

use crate::consumer::{ConsumerActor, ConsumerArgs};
use crate::endpoint_actor::{ConnectionManager, EndpointActorState};
use crate::host::{EventHost, NodeHost};
use crate::messages::{ActorError, ActorResult, ConsumerMessage, ProducerMessage, SupervisorMessage};
use crate::producer::{ProducerActor, ProducerArgs};
use crate::registry::FlowRegistry;

/// What the supervisor needs to build nodes.
pub struct SupervisorArgs {
    pub broker: Arc<dyn Broker>,
    pub settings: RuntimeSettings,
    pub library: Option<ScriptLibrary>,
}

impl SupervisorArgs {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            settings: RuntimeSettings::default(),
            library: None,
        }
    }

    pub fn with_settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Let consumers load scripts by name from `library`.
    pub fn with_library(mut self, library: ScriptLibrary) -> Self {
        self.library = Some(library);
        self
    }
}

/// State for the supervisor actor.
pub struct SupervisorState {
    broker: Arc<dyn Broker>,
    settings: RuntimeSettings,
    library: Option<ScriptLibrary>,
    registry: FlowRegistry,
    host: Arc<EventHost>,
}

impl SupervisorState {
    fn new(args: SupervisorArgs) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            broker: args.broker,
            settings: args.settings,
            library: args.library,
            registry: FlowRegistry::new(),
            host: Arc::new(EventHost::new(event_tx)),
        }
    }
}

async fn deploy(
    myself: &ActorRef<SupervisorMessage>,
    state: &mut SupervisorState,
    flow: FlowConfig,
) -> Result<(), String> {
    flow.validate().map_err(|e| e.to_string())?;

    let ids = flow
        .endpoints
        .iter()
        .map(|e| &e.id)
        .chain(flow.producers.iter().map(|p| &p.id))
        .chain(flow.consumers.iter().map(|c| &c.id));
    for id in ids {
        if state.registry.contains(id) {
            return Err(format!("Node {} is already deployed", id));
        }
    }

    for endpoint in flow.endpoints {
        let endpoint_state = EndpointActorState::new(endpoint.clone(), state.broker.clone())
            .with_policy(state.settings.release_policy)
            .with_event_tx(state.host.sender());
        let (manager, _handle) = ConnectionManager::start(endpoint_state)
            .await
            .map_err(|e| format!("Failed to spawn endpoint {}: {}", endpoint.id, e))?;
        state.registry.register_endpoint(&endpoint.id, manager);
    }

    let host: Arc<dyn NodeHost> = state.host.clone();

    for config in flow.producers {
        let id = config.id.clone();
        let args = ProducerArgs {
            manager: resolve(&state.registry, config.queue.as_deref()),
            config,
            host: host.clone(),
        };
        let (producer, _handle) = Actor::spawn_linked(None, ProducerActor, args, myself.get_cell())
            .await
            .map_err(|e| format!("Failed to spawn producer {}: {}", id, e))?;
        state.registry.register_producer(&id, producer);
    }

    for config in flow.consumers {
        let id = config.id.clone();
        let args = ConsumerArgs {
            manager: resolve(&state.registry, config.queue.as_deref()),
            config,
            host: host.clone(),
            library: state.library.clone(),
            settings: state.settings.clone(),
        };
        let (consumer, _handle) = Actor::spawn_linked(None, ConsumerActor, args, myself.get_cell())
            .await
            .map_err(|e| format!("Failed to spawn consumer {}: {}", id, e))?;
        state.registry.register_consumer(&id, consumer);
    }

    Ok(())
}

fn resolve(registry: &FlowRegistry, queue: Option<&str>) -> Option<ConnectionManager> {
    queue.and_then(|id| registry.endpoint(id)).cloned()
}

async fn close_producer(producer: ActorRef<ProducerMessage>) {
    if let Err(e) = ractor::rpc::call(&producer, |reply| ProducerMessage::Close { reply }, None).await {
        tracing::warn!("Failed to close producer: {}", e);
    }
}

async fn close_consumer(consumer: ActorRef<ConsumerMessage>) {
    if let Err(e) = ractor::rpc::call(&consumer, |reply| ConsumerMessage::Close { reply }, None).await {
        tracing::warn!("Failed to close consumer: {}", e);
    }
}

/// Supervisor actor that owns every deployed endpoint and node.
pub struct FlowSupervisor;

impl Actor for FlowSupervisor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = SupervisorArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting flow supervisor");
        Ok(SupervisorState::new(args))
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::Deploy { flow, reply } => {
                let result = deploy(&myself, state, *flow).await;
                match &result {
                    Ok(()) => tracing::info!(
                        "Deployed flow: {} endpoint(s), {} node(s)",
                        state.registry.endpoint_ids().len(),
                        state.registry.node_ids().len()
                    ),
                    Err(e) => tracing::warn!("Deploy failed: {}", e),
                }
                let _ = reply.send(result);
            }

            SupervisorMessage::Input {
                producer,
                message,
                reply,
            } => match state.registry.producer(&producer) {
                Some(actor) => {
                    // The producer answers the caller directly.
                    if let Err(e) = actor.send_message(ProducerMessage::Input {
                        message,
                        reply: Some(reply),
                    }) {
                        tracing::warn!("Producer {} unavailable: {}", producer, e);
                    }
                }
                None => {
                    let _ = reply.send(Err(format!("Producer not found: {}", producer)));
                }
            },

            SupervisorMessage::ListNodes { reply } => {
                let _ = reply.send(state.registry.node_ids());
            }

            SupervisorMessage::Subscribe { reply } => {
                let _ = reply.send(state.host.subscribe());
            }

            SupervisorMessage::Shutdown { reply } => {
                tracing::info!("Shutting down flow supervisor");

                let (producers, consumers) = state.registry.take_nodes();
                join(
                    join_all(producers.into_iter().map(close_producer)),
                    join_all(consumers.into_iter().map(close_consumer)),
                )
                .await;

                let endpoints = state.registry.take_endpoints();
                join_all(endpoints.iter().map(|manager| async move {
                    if let Err(e) = manager.close().await {
                        tracing::warn!("Failed to close endpoint {}: {}", manager.endpoint().name, e);
                    }
                    manager.stop();
                }))
                .await;

                let _ = reply.send(());
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                tracing::debug!("Node actor {} stopped: {:?}", cell.get_id(), reason);
            }
            SupervisionEvent::ActorFailed(cell, error) => {
                tracing::warn!("Node actor {} failed: {}", cell.get_id(), error);
            }
            _ => {}
        }
        Ok(())
    }
}

/// Start a supervisor.
pub async fn start_supervisor(
    args: SupervisorArgs,
) -> Result<(ActorRef<SupervisorMessage>, tokio::task::JoinHandle<()>), ractor::SpawnErr> {
    let (actor, handle) = Actor::spawn(None, FlowSupervisor, args).await?;

    Ok((actor, handle))
}

/// Client for a running supervisor.
#[derive(Clone)]
pub struct FlowClient {
    actor: ActorRef<SupervisorMessage>,
}

impl FlowClient {
    pub fn new(actor: ActorRef<SupervisorMessage>) -> Self {
        Self { actor }
    }

    pub fn actor(&self) -> &ActorRef<SupervisorMessage> {
        &self.actor
    }

    async fn call<T, F>(&self, build: F) -> ActorResult<T>
    where
        T: Send + 'static,
        F: FnOnce(RpcReplyPort<T>) -> SupervisorMessage,
    {
        match ractor::rpc::call(&self.actor, build, None).await {
            Ok(CallResult::Success(value)) => Ok(value),
            Ok(CallResult::Timeout) => Err(ActorError::Timeout),
            Ok(CallResult::SenderError) => Err(ActorError::Actor("Reply dropped".to_string())),
            Err(e) => Err(ActorError::Actor(e.to_string())),
        }
    }

    /// Deploy `flow`. Its ids must not clash with anything already deployed.
    pub async fn deploy(&self, flow: FlowConfig) -> ActorResult<()> {
        self.call(|reply| SupervisorMessage::Deploy {
            flow: Box::new(flow),
            reply,
        })
        .await?
        .map_err(ActorError::Actor)
    }

    /// Send `message` to the producer `producer`, returning the new job id.
    pub async fn input(&self, producer: &str, message: Message) -> ActorResult<JobId> {
        let producer = producer.to_string();
        self.call(|reply| SupervisorMessage::Input {
            producer,
            message,
            reply,
        })
        .await?
        .map_err(ActorError::Actor)
    }

    pub async fn nodes(&self) -> ActorResult<Vec<String>> {
        self.call(|reply| SupervisorMessage::ListNodes { reply }).await
    }

    pub async fn subscribe(&self) -> ActorResult<broadcast::Receiver<NodeEvent>> {
        self.call(|reply| SupervisorMessage::Subscribe { reply }).await
    }

    /// Close every node, then every endpoint, then stop the supervisor.
    pub async fn shutdown(&self) -> ActorResult<()> {
        self.call(|reply| SupervisorMessage::Shutdown { reply }).await
    }
}
