//! Running one consumer's script on delivered jobs.

use std::sync::Arc;
use std::time::Instant;

use jobflow_core::{DoneCallback, Job, LogLevel, Metric, NodeStatus};
use sandbox::{Bridge, Invocation, JobInfo, SandboxExecutor};

use crate::dispatcher::ResultDispatcher;
use crate::host::NodeHost;

/// What happened to one job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// The script returned; `messages` were sent from its return value.
    Completed { messages: usize, millis: f64 },
    /// The script raised an error.
    Failed { diagnostic: String },
}

/// The `node` bridge for one job.
struct NodeBridge {
    node: String,
    correlation_id: String,
    host: Arc<dyn NodeHost>,
    dispatcher: ResultDispatcher,
}

impl Bridge for NodeBridge {
    fn log(&self, level: LogLevel, text: &str) {
        self.host.log(&self.node, level, text);
    }

    fn status(&self, status: NodeStatus) {
        self.host.status(&self.node, status);
    }

    fn send(&self, value: serde_json::Value) {
        self.dispatcher.dispatch(value, &self.correlation_id);
    }
}

/// Runs a compiled script once per job and reports the result.
pub struct JobProcessor {
    node: String,
    label: String,
    executor: Arc<SandboxExecutor>,
    host: Arc<dyn NodeHost>,
    function_time: bool,
}

impl JobProcessor {
    /// `label` is the consumer name used for metrics and error context.
    pub fn new(
        node: impl Into<String>,
        label: impl Into<String>,
        executor: Arc<SandboxExecutor>,
        host: Arc<dyn NodeHost>,
    ) -> Self {
        Self {
            node: node.into(),
            label: label.into(),
            executor,
            host,
            function_time: false,
        }
    }

    /// Show every job's duration as the node status.
    pub fn with_function_time(mut self, enabled: bool) -> Self {
        self.function_time = enabled;
        self
    }

    pub fn executor(&self) -> &Arc<SandboxExecutor> {
        &self.executor
    }

    /// Process one job. Blocks until the script returns.
    ///
    /// If the script never called `done`, the job is completed here with
    /// the outcome.
    pub fn process(&self, job: Job, done: DoneCallback) -> JobOutcome {
        let mut message = job.data.clone();
        let correlation_id = message.ensure_correlation_id();
        let start = Instant::now();

        self.host
            .log(&self.node, LogLevel::Info, &format!("queue.run() job {}", job.id));

        let dispatcher = ResultDispatcher::new(self.node.clone(), self.host.clone());
        let bridge = Arc::new(NodeBridge {
            node: self.node.clone(),
            correlation_id: correlation_id.clone(),
            host: self.host.clone(),
            dispatcher: dispatcher.clone(),
        });
        let invocation = Invocation::new(message, JobInfo::from(&job), done.clone(), bridge);

        let outcome = match self.executor.run(invocation) {
            Ok(value) => {
                let messages = dispatcher.dispatch(value, &correlation_id);
                let metric = Metric::duration(self.label.clone(), start.elapsed());
                let millis = metric.value;
                self.host.metric(&self.node, metric);
                if self.function_time {
                    self.host.status(&self.node, NodeStatus::duration(millis));
                }
                JobOutcome::Completed { messages, millis }
            }
            Err(failure) => JobOutcome::Failed {
                diagnostic: failure.diagnostic(),
            },
        };

        match &outcome {
            JobOutcome::Completed { messages, millis } => {
                tracing::debug!(
                    "Job {} done by {} in {}ms ({} message(s))",
                    job.id,
                    self.label,
                    millis,
                    messages
                );
                done.complete(Ok(()));
            }
            JobOutcome::Failed { diagnostic } => {
                self.host.error(&self.node, diagnostic, &self.label);
                done.complete(Err(diagnostic.clone()));
            }
        }

        outcome
    }
}
