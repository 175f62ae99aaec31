//! Producer actor: enqueues every inbound message as a job.

use std::sync::Arc;

use jobflow_core::{Job, JobId, LogLevel, Message, NodeStatus, ProducerConfig};
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::endpoint_actor::ConnectionManager;
use crate::host::NodeHost;
use crate::messages::ProducerMessage;

/// Producer actor arguments.
pub struct ProducerArgs {
    pub config: ProducerConfig,
    /// `None` when the configured queue reference does not resolve.
    pub manager: Option<ConnectionManager>,
    pub host: Arc<dyn NodeHost>,
}

/// State for the producer actor.
pub struct ProducerState {
    config: ProducerConfig,
    manager: Option<ConnectionManager>,
    host: Arc<dyn NodeHost>,
}

impl ProducerState {
    async fn enqueue(&self, message: Message) -> Result<JobId, String> {
        let Some(manager) = &self.manager else {
            return Err(format!("Producer {} has no queue endpoint", self.config.label()));
        };

        let handle = match manager.connect().await {
            Ok(handle) => handle,
            Err(e) => {
                self.host.status(&self.config.id, NodeStatus::disconnected());
                return Err(e.to_string());
            }
        };

        let job = Job::new(message, self.config.name.clone(), self.config.topic.clone());
        let id = job.id;
        self.host.log(&self.config.id, LogLevel::Info, "queue.add()");
        handle.add(job).await.map_err(|e| e.to_string())?;

        tracing::debug!("Producer {} added job {} to {}", self.config.label(), id, handle.name());
        Ok(id)
    }
}

/// Producer actor.
pub struct ProducerActor;

impl Actor for ProducerActor {
    type Msg = ProducerMessage;
    type State = ProducerState;
    type Arguments = ProducerArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting producer: {}", args.config.label());

        match &args.manager {
            Some(manager) => {
                manager.register().await?;
            }
            None => args.host.error(
                &args.config.id,
                "No queue endpoint configured",
                args.config.label(),
            ),
        }

        Ok(ProducerState {
            config: args.config,
            manager: args.manager,
            host: args.host,
        })
    }

    async fn post_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(manager) = &state.manager {
            let status = match manager.connect().await {
                Ok(_) => NodeStatus::connected(),
                Err(e) => {
                    tracing::warn!("Producer {}: {}", state.config.label(), e);
                    NodeStatus::disconnected()
                }
            };
            state.host.status(&state.config.id, status);
        }
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ProducerMessage::Input { message, reply } => {
                let result = state.enqueue(message).await;
                if let Err(ref e) = result {
                    tracing::warn!("Producer {} failed to add job: {}", state.config.label(), e);
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }

            ProducerMessage::Close { reply } => {
                tracing::info!("Closing producer: {}", state.config.label());
                if let Some(manager) = &state.manager
                    && let Err(e) = manager.deregister().await
                {
                    tracing::warn!("Producer {} failed to deregister: {}", state.config.label(), e);
                }
                let _ = reply.send(());
                myself.stop(None);
            }
        }

        Ok(())
    }
}
