//! Job domain types for work items placed on a queue.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::Message;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Broker-side lifecycle of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Enqueued, waiting for a consumer.
    #[default]
    Waiting,
    /// Delivered to a consumer that has not completed it yet.
    Active,
    /// Completed successfully.
    Completed,
    /// Completed with an error.
    Failed,
}

impl JobStatus {
    /// Get a simple status string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// A unit of work placed on the broker: the message plus routing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// The enqueued message.
    pub data: Message,
    /// Name of the node that enqueued the job.
    pub name: String,
    /// Topic of the node that enqueued the job.
    pub topic: String,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Create a new job carrying `data`.
    pub fn new(data: Message, name: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            id: JobId::new(),
            data,
            name: name.into(),
            topic: topic.into(),
            created_at: Utc::now(),
        }
    }
}

type DoneFn = Box<dyn FnOnce(Result<(), String>) + Send>;

/// The broker's single-shot completion signal for one delivered job.
///
/// Clones share the same slot: the first `complete` call wins and later
/// calls are ignored.
#[derive(Clone)]
pub struct DoneCallback {
    inner: Arc<Mutex<Option<DoneFn>>>,
}

impl DoneCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(Result<(), String>) + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Some(Box::new(f)))),
        }
    }

    /// A callback that discards the outcome.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// Signal completion. Returns `false` if the job was already completed.
    pub fn complete(&self, outcome: Result<(), String>) -> bool {
        let callback = match self.inner.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match callback {
            Some(callback) => {
                callback(outcome);
                true
            }
            None => false,
        }
    }

    /// Check if `complete` has been called.
    pub fn is_completed(&self) -> bool {
        match self.inner.lock() {
            Ok(slot) => slot.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

impl std::fmt::Debug for DoneCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoneCallback")
            .field("completed", &self.is_completed())
            .finish()
    }
}
