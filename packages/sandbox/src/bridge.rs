//! The host side of the `node` bridge table.

use std::sync::Arc;

use jobflow_core::{DoneCallback, Job, LogLevel, Message, NodeStatus};
use serde::Serialize;

/// Receives everything a script pushes out through `node`.
pub trait Bridge: Send + Sync {
    /// `node.log`, `node.warn` and `node.error`.
    fn log(&self, level: LogLevel, text: &str);

    /// `node.status({fill, shape, text})`.
    fn status(&self, status: NodeStatus);

    /// `node.send(msg-or-list)`, delivered immediately.
    fn send(&self, value: serde_json::Value);
}

/// Job metadata visible to scripts as `job`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub topic: String,
}

impl From<&Job> for JobInfo {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.to_string(),
            name: job.name.clone(),
            topic: job.topic.clone(),
        }
    }
}

/// Everything one script run sees. Built fresh for every job.
#[derive(Clone)]
pub struct Invocation {
    pub message: Message,
    pub job: JobInfo,
    pub done: DoneCallback,
    pub bridge: Arc<dyn Bridge>,
}

impl Invocation {
    pub fn new(message: Message, job: JobInfo, done: DoneCallback, bridge: Arc<dyn Bridge>) -> Self {
        Self {
            message,
            job,
            done,
            bridge,
        }
    }
}
