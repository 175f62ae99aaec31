//! Flow documents and runtime settings.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::QueueEndpoint;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid flow document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Duplicate node id: {0}")]
    DuplicateId(String),
    #[error("Consumer {0} has no script (set `func` or `library`)")]
    MissingScript(String),
    #[error("Invalid value for {var}: {reason}")]
    InvalidEnv { var: String, reason: String },
}

/// A producer node: enqueues every inbound message as a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Id of the referenced queue endpoint.
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub topic: String,
}

impl ProducerConfig {
    /// Name used in job metadata and logs, falling back to the node id.
    pub fn label(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }
}

/// Where a consumer's transform script comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    Inline(String),
    Library(String),
}

/// A consumer node: dequeues jobs and runs a transform script on each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Id of the referenced queue endpoint.
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub topic: String,
    /// Inline script body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub func: Option<String>,
    /// Name of a script saved in the function library.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<String>,
}

impl ConsumerConfig {
    /// Inline script wins over a library reference.
    pub fn script_source(&self) -> Option<ScriptSource> {
        match (&self.func, &self.library) {
            (Some(func), _) => Some(ScriptSource::Inline(func.clone())),
            (None, Some(name)) => Some(ScriptSource::Library(name.clone())),
            (None, None) => None,
        }
    }

    /// Name used as log/metric label, falling back to the node id.
    pub fn label(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }
}

/// A deployable flow: endpoints plus the nodes that use them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub endpoints: Vec<QueueEndpoint>,
    pub producers: Vec<ProducerConfig>,
    pub consumers: Vec<ConsumerConfig>,
}

impl FlowConfig {
    /// Parse and validate a JSON flow document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check structural rules.
    ///
    /// Dangling queue references are not rejected here; the affected node
    /// reports them itself and stays inert.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        let ids = self
            .endpoints
            .iter()
            .map(|e| &e.id)
            .chain(self.producers.iter().map(|p| &p.id))
            .chain(self.consumers.iter().map(|c| &c.id));
        for id in ids {
            if !seen.insert(id.as_str()) {
                return Err(ConfigError::DuplicateId(id.clone()));
            }
        }

        if let Some(consumer) = self.consumers.iter().find(|c| c.script_source().is_none()) {
            return Err(ConfigError::MissingScript(consumer.id.clone()));
        }

        Ok(())
    }

    pub fn endpoint(&self, id: &str) -> Option<&QueueEndpoint> {
        self.endpoints.iter().find(|e| e.id == id)
    }
}

/// What an endpoint does when its use count returns to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleasePolicy {
    /// Keep the connection open until the endpoint itself is closed.
    #[default]
    KeepOpen,
    /// Disconnect as soon as the last user deregisters.
    DisconnectWhenUnused,
}

/// Process-wide settings read from the environment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeSettings {
    /// Surface every job's duration as a transient node status.
    pub function_time: bool,
    /// Exposed to scripts as `context.global`.
    pub global_context: Map<String, Value>,
    pub release_policy: ReleasePolicy,
}

impl RuntimeSettings {
    /// Build settings from environment variables.
    ///
    /// - `JOBFLOW_FUNCTION_TIME`: any non-empty value enables duration status
    /// - `JOBFLOW_GLOBAL_CONTEXT`: JSON object
    /// - `JOBFLOW_RELEASE_POLICY`: `keep-open` (default) or `disconnect-when-unused`
    pub fn from_env() -> Result<Self, ConfigError> {
        let function_time = std::env::var("JOBFLOW_FUNCTION_TIME")
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false);

        let global_context = match std::env::var("JOBFLOW_GLOBAL_CONTEXT") {
            Ok(raw) if !raw.trim().is_empty() => match serde_json::from_str(&raw) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    return Err(ConfigError::InvalidEnv {
                        var: "JOBFLOW_GLOBAL_CONTEXT".into(),
                        reason: "expected a JSON object".into(),
                    });
                }
                Err(e) => {
                    return Err(ConfigError::InvalidEnv {
                        var: "JOBFLOW_GLOBAL_CONTEXT".into(),
                        reason: e.to_string(),
                    });
                }
            },
            _ => Map::new(),
        };

        let release_policy = match std::env::var("JOBFLOW_RELEASE_POLICY").ok().as_deref() {
            None | Some("") | Some("keep-open") => ReleasePolicy::KeepOpen,
            Some("disconnect-when-unused") => ReleasePolicy::DisconnectWhenUnused,
            Some(other) => {
                return Err(ConfigError::InvalidEnv {
                    var: "JOBFLOW_RELEASE_POLICY".into(),
                    reason: format!(
                        "unsupported policy {other} (expected keep-open|disconnect-when-unused)"
                    ),
                });
            }
        };

        Ok(Self {
            function_time,
            global_context,
            release_policy,
        })
    }

    /// Enable the duration status.
    pub fn with_function_time(mut self, enabled: bool) -> Self {
        self.function_time = enabled;
        self
    }

    /// Set the release policy.
    pub fn with_release_policy(mut self, policy: ReleasePolicy) -> Self {
        self.release_policy = policy;
        self
    }
}
