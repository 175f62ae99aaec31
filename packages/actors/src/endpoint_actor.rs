//! Endpoint actor owning the connection to one named queue.

use std::sync::Arc;

use broker::{Broker, QueueRef};
use chrono::Utc;
use jobflow_core::{ConnectionPhase, EndpointEvent, NodeEvent, QueueEndpoint, ReleasePolicy};
use ractor::rpc::CallResult;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tokio::sync::broadcast;

use crate::messages::{ActorError, ActorResult, ConnectError, EndpointMessage};

type Waiter = RpcReplyPort<Result<QueueRef, ConnectError>>;

/// Connection state machine. `Connected` always carries its handle.
enum Connection {
    Disconnected,
    Connecting { attempt: u64, waiters: Vec<Waiter> },
    Connected(QueueRef),
}

impl Connection {
    fn phase(&self) -> ConnectionPhase {
        match self {
            Connection::Disconnected => ConnectionPhase::Disconnected,
            Connection::Connecting { .. } => ConnectionPhase::Connecting,
            Connection::Connected(_) => ConnectionPhase::Connected,
        }
    }
}

/// Fans connection events out to endpoint subscribers and the flow.
#[derive(Clone)]
struct Broadcaster {
    events: broadcast::Sender<EndpointEvent>,
    event_tx: Option<broadcast::Sender<NodeEvent>>,
}

impl Broadcaster {
    fn send(&self, event: EndpointEvent) {
        let _ = self.events.send(event.clone());
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(NodeEvent::Endpoint {
                change: event,
                timestamp: Utc::now(),
            });
        }
    }
}

/// Close `handle` and announce the disconnect.
async fn close_handle(endpoint: &QueueEndpoint, handle: QueueRef, broadcaster: &Broadcaster) {
    if let Err(e) = handle.close().await {
        tracing::warn!("Error closing queue {}: {}", endpoint.name, e);
    }
    tracing::info!("{} disconnected", endpoint.name);
    broadcaster.send(EndpointEvent::Disconnected {
        endpoint: endpoint.id.clone(),
    });
}

/// State for the endpoint actor.
pub struct EndpointActorState {
    endpoint: QueueEndpoint,
    broker: Arc<dyn Broker>,
    policy: ReleasePolicy,
    connection: Connection,
    use_count: usize,
    next_attempt: u64,
    broadcaster: Broadcaster,
}

impl EndpointActorState {
    pub fn new(endpoint: QueueEndpoint, broker: Arc<dyn Broker>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            endpoint,
            broker,
            policy: ReleasePolicy::default(),
            connection: Connection::Disconnected,
            use_count: 0,
            next_attempt: 0,
            broadcaster: Broadcaster {
                events,
                event_tx: None,
            },
        }
    }

    /// Set what happens when the use count returns to zero.
    pub fn with_policy(mut self, policy: ReleasePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the flow-wide event broadcaster.
    pub fn with_event_tx(mut self, tx: broadcast::Sender<NodeEvent>) -> Self {
        self.broadcaster.event_tx = Some(tx);
        self
    }

    /// Leave the `Connected` state, returning the live handle, and reject
    /// pending waiters.
    fn take_handle(&mut self) -> Option<QueueRef> {
        match std::mem::replace(&mut self.connection, Connection::Disconnected) {
            Connection::Connected(handle) => Some(handle),
            Connection::Connecting { waiters, .. } => {
                let error = ConnectError::Closed(self.endpoint.name.clone());
                for waiter in waiters {
                    let _ = waiter.send(Err(error.clone()));
                }
                None
            }
            Connection::Disconnected => None,
        }
    }

    /// Close the connection and wait until the broker has let go of it.
    async fn disconnect(&mut self) {
        if let Some(handle) = self.take_handle() {
            close_handle(&self.endpoint, handle, &self.broadcaster).await;
        }
    }

    /// Close the connection without waiting for it.
    ///
    /// A node that just deregistered may still hold completion callbacks
    /// for jobs the broker is waiting on; those resolve only once the node
    /// has stopped, so the close must not block this actor.
    fn release(&mut self) {
        if let Some(handle) = self.take_handle() {
            let endpoint = self.endpoint.clone();
            let broadcaster = self.broadcaster.clone();
            tokio::spawn(async move {
                close_handle(&endpoint, handle, &broadcaster).await;
            });
        }
    }
}

/// Endpoint actor: one per configured queue endpoint.
pub struct EndpointActor;

impl Actor for EndpointActor {
    type Msg = EndpointMessage;
    type State = EndpointActorState;
    type Arguments = EndpointActorState;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting endpoint actor: {}", args.endpoint);
        Ok(args)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            EndpointMessage::Connect { reply } => match &mut state.connection {
                Connection::Connected(handle) => {
                    let _ = reply.send(Ok(handle.clone()));
                }
                Connection::Connecting { waiters, .. } => {
                    waiters.push(reply);
                }
                Connection::Disconnected => {
                    let attempt = state.next_attempt;
                    state.next_attempt += 1;
                    state.connection = Connection::Connecting {
                        attempt,
                        waiters: vec![reply],
                    };

                    tracing::debug!("Connecting {} (attempt {})", state.endpoint.name, attempt);
                    let connecting = state.broker.connect(&state.endpoint);
                    tokio::spawn(async move {
                        let result = connecting.await.map_err(|e| e.to_string());
                        let _ = myself.send_message(EndpointMessage::ConnectFinished { attempt, result });
                    });
                }
            },

            EndpointMessage::ConnectFinished { attempt, result } => {
                let current = matches!(
                    state.connection,
                    Connection::Connecting { attempt: a, .. } if a == attempt
                );
                if !current {
                    // Closed while connecting; nobody owns this handle.
                    if let Ok(handle) = result {
                        tracing::debug!("Dropping stale connection to {}", state.endpoint.name);
                        let _ = handle.close().await;
                    }
                    return Ok(());
                }

                let Connection::Connecting { waiters, .. } =
                    std::mem::replace(&mut state.connection, Connection::Disconnected)
                else {
                    return Ok(());
                };

                match result {
                    Ok(handle) => {
                        state.connection = Connection::Connected(handle.clone());
                        tracing::info!(
                            "{} connected to {}",
                            state.endpoint.name,
                            state.endpoint.server_label()
                        );
                        state.broadcaster.send(EndpointEvent::Connected {
                            endpoint: state.endpoint.id.clone(),
                            server: state.endpoint.server_label(),
                        });
                        for waiter in waiters {
                            let _ = waiter.send(Ok(handle.clone()));
                        }
                    }
                    Err(reason) => {
                        tracing::warn!("Failed to connect {}: {}", state.endpoint.name, reason);
                        let error = ConnectError::Failed {
                            endpoint: state.endpoint.name.clone(),
                            reason,
                        };
                        for waiter in waiters {
                            let _ = waiter.send(Err(error.clone()));
                        }
                    }
                }
            }

            EndpointMessage::Register { reply } => {
                state.use_count += 1;
                let _ = reply.send(state.use_count);
            }

            EndpointMessage::Deregister { reply } => {
                state.use_count = state.use_count.saturating_sub(1);
                if state.use_count == 0 && state.policy == ReleasePolicy::DisconnectWhenUnused {
                    state.release();
                }
                let _ = reply.send(state.use_count);
            }

            EndpointMessage::UseCount { reply } => {
                let _ = reply.send(state.use_count);
            }

            EndpointMessage::GetState { reply } => {
                let _ = reply.send(state.connection.phase());
            }

            EndpointMessage::Subscribe { reply } => {
                let _ = reply.send(state.broadcaster.events.subscribe());
            }

            EndpointMessage::Close { reply } => {
                tracing::info!("Closing endpoint: {}", state.endpoint.name);
                state.disconnect().await;
                let _ = reply.send(());
            }
        }

        Ok(())
    }
}

/// Client for an endpoint actor, shared by every node using the endpoint.
#[derive(Clone)]
pub struct ConnectionManager {
    endpoint: QueueEndpoint,
    actor: ActorRef<EndpointMessage>,
}

impl ConnectionManager {
    /// Spawn the endpoint actor.
    pub async fn start(
        state: EndpointActorState,
    ) -> Result<(Self, tokio::task::JoinHandle<()>), ractor::SpawnErr> {
        let endpoint = state.endpoint.clone();
        let (actor, handle) = Actor::spawn(None, EndpointActor, state).await?;
        Ok((Self { endpoint, actor }, handle))
    }

    pub fn endpoint(&self) -> &QueueEndpoint {
        &self.endpoint
    }

    pub fn actor(&self) -> &ActorRef<EndpointMessage> {
        &self.actor
    }

    async fn call<T, F>(&self, build: F) -> ActorResult<T>
    where
        T: Send + 'static,
        F: FnOnce(RpcReplyPort<T>) -> EndpointMessage,
    {
        match ractor::rpc::call(&self.actor, build, None).await {
            Ok(CallResult::Success(value)) => Ok(value),
            Ok(CallResult::Timeout) => Err(ActorError::Timeout),
            Ok(CallResult::SenderError) => Err(ActorError::Actor(format!(
                "Endpoint {} dropped the reply",
                self.endpoint.name
            ))),
            Err(e) => Err(ActorError::Actor(e.to_string())),
        }
    }

    /// Get the shared queue handle, connecting if needed.
    ///
    /// Concurrent calls while a connection is in flight all resolve with
    /// the outcome of that one attempt.
    pub async fn connect(&self) -> Result<QueueRef, ConnectError> {
        match self.call(|reply| EndpointMessage::Connect { reply }).await {
            Ok(result) => result,
            Err(_) => Err(ConnectError::Unavailable(self.endpoint.name.clone())),
        }
    }

    pub async fn register(&self) -> ActorResult<usize> {
        self.call(|reply| EndpointMessage::Register { reply }).await
    }

    /// Never takes the use count below zero.
    pub async fn deregister(&self) -> ActorResult<usize> {
        self.call(|reply| EndpointMessage::Deregister { reply }).await
    }

    pub async fn use_count(&self) -> ActorResult<usize> {
        self.call(|reply| EndpointMessage::UseCount { reply }).await
    }

    pub async fn state(&self) -> ActorResult<ConnectionPhase> {
        self.call(|reply| EndpointMessage::GetState { reply }).await
    }

    pub async fn subscribe(&self) -> ActorResult<broadcast::Receiver<EndpointEvent>> {
        self.call(|reply| EndpointMessage::Subscribe { reply }).await
    }

    /// Close the connection; resolves once disconnected.
    pub async fn close(&self) -> ActorResult<()> {
        self.call(|reply| EndpointMessage::Close { reply }).await
    }

    /// Stop the endpoint actor.
    pub fn stop(&self) {
        self.actor.stop(None);
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}
