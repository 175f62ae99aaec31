//! Consumer actor: runs a transform script on every job of its queue.

use std::sync::Arc;
use std::time::Duration;

use broker::JobHandler;
use jobflow_core::{ConsumerConfig, DoneCallback, Job, NodeStatus, RuntimeSettings, ScriptSource};
use library::ScriptLibrary;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use sandbox::SandboxExecutor;

use crate::endpoint_actor::ConnectionManager;
use crate::host::NodeHost;
use crate::messages::ConsumerMessage;
use crate::processor::{JobOutcome, JobProcessor};

/// Delay before a consumer retries a failed connection.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Consumer actor arguments.
pub struct ConsumerArgs {
    pub config: ConsumerConfig,
    /// `None` when the configured queue reference does not resolve.
    pub manager: Option<ConnectionManager>,
    pub host: Arc<dyn NodeHost>,
    /// Needed only for consumers that reference a saved script.
    pub library: Option<ScriptLibrary>,
    pub settings: RuntimeSettings,
}

/// State for the consumer actor.
pub struct ConsumerState {
    config: ConsumerConfig,
    manager: Option<ConnectionManager>,
    host: Arc<dyn NodeHost>,
    /// `None` when the node is inert.
    processor: Option<Arc<JobProcessor>>,
    retry_delay: Duration,
}

impl ConsumerState {
    fn is_inert(&self) -> bool {
        self.manager.is_none() || self.processor.is_none()
    }
}

/// Resolve and compile the consumer's script.
async fn compile(
    config: &ConsumerConfig,
    library: Option<&ScriptLibrary>,
    settings: &RuntimeSettings,
) -> Result<SandboxExecutor, String> {
    let body = match config.script_source() {
        Some(ScriptSource::Inline(body)) => body,
        Some(ScriptSource::Library(name)) => {
            let library = library.ok_or_else(|| {
                format!("Script {} requested but no function library is configured", name)
            })?;
            library.load(&name).await.map_err(|e| e.to_string())?.func
        }
        None => return Err("No script configured".to_string()),
    };

    SandboxExecutor::compile(config.label(), &body, &settings.global_context)
        .map_err(|e| e.to_string())
}

/// Consumer actor.
pub struct ConsumerActor;

impl Actor for ConsumerActor {
    type Msg = ConsumerMessage;
    type State = ConsumerState;
    type Arguments = ConsumerArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let ConsumerArgs {
            config,
            manager,
            host,
            library,
            settings,
        } = args;
        tracing::info!("Starting consumer: {}", config.label());

        match &manager {
            Some(manager) => {
                manager.register().await?;
            }
            None => host.error(&config.id, "No queue endpoint configured", config.label()),
        }

        let processor = match compile(&config, library.as_ref(), &settings).await {
            Ok(executor) => Some(Arc::new(
                JobProcessor::new(
                    config.id.clone(),
                    config.label(),
                    Arc::new(executor),
                    host.clone(),
                )
                .with_function_time(settings.function_time),
            )),
            Err(e) => {
                host.error(&config.id, &e, config.label());
                None
            }
        };

        Ok(ConsumerState {
            config,
            manager,
            host,
            processor,
            retry_delay: RETRY_DELAY,
        })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if !state.is_inert() {
            myself.send_message(ConsumerMessage::Start)?;
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
            ConsumerMessage::Start => {
                let Some(manager) = &state.manager else {
                    return Ok(());
                };

                let started = match manager.connect().await {
                    Ok(handle) => {
                        let me = myself.clone();
                        // A stopped consumer drops `done`; the broker releases the job.
                        let handler: JobHandler =
                            Arc::new(move |job: Job, done: DoneCallback| {
                                let _ = me.send_message(ConsumerMessage::ProcessJob {
                                    job: Box::new(job),
                                    done,
                                });
                            });
                        handle.process(handler).await.map_err(|e| e.to_string())
                    }
                    Err(e) => Err(e.to_string()),
                };

                match started {
                    Ok(()) => {
                        tracing::info!(
                            "Consumer {} processing {}",
                            state.config.label(),
                            manager.endpoint().name
                        );
                        state.host.status(&state.config.id, NodeStatus::connected());
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Consumer {} failed to start, retrying in {:?}: {}",
                            state.config.label(),
                            state.retry_delay,
                            e
                        );
                        state.host.status(&state.config.id, NodeStatus::disconnected());
                        let me = myself.clone();
                        let delay = state.retry_delay;
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = me.send_message(ConsumerMessage::Start);
                        });
                    }
                }
            }

            ConsumerMessage::ProcessJob { job, done } => {
                let Some(processor) = state.processor.clone() else {
                    let reason = format!("Consumer {} is not runnable", state.config.label());
                    done.complete(Err(reason));
                    return Ok(());
                };

                let outcome =
                    tokio::task::spawn_blocking(move || processor.process(*job, done)).await;
                match outcome {
                    Ok(JobOutcome::Completed { .. }) => {}
                    Ok(JobOutcome::Failed { diagnostic }) => {
                        tracing::debug!("Consumer {} job failed: {}", state.config.label(), diagnostic);
                    }
                    Err(e) => {
                        tracing::error!("Consumer {} script task panicked: {}", state.config.label(), e);
                    }
                }
            }

            ConsumerMessage::Close { reply } => {
                tracing::info!("Closing consumer: {}", state.config.label());
                if let Some(processor) = &state.processor {
                    let executor = processor.executor().clone();
                    let emitted = tokio::task::spawn_blocking(move || executor.emit("close")).await;
                    match emitted {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::warn!("Consumer {} close handlers failed: {}", state.config.label(), e)
                        }
                        Err(e) => {
                            tracing::warn!("Consumer {} close handlers panicked: {}", state.config.label(), e)
                        }
                    }
                }
                if let Some(manager) = &state.manager
                    && let Err(e) = manager.deregister().await
                {
                    tracing::warn!("Consumer {} failed to deregister: {}", state.config.label(), e);
                }
                let _ = reply.send(());
                myself.stop(None);
            }
        }

        Ok(())
    }
}
