//! Where the script library keeps its entries.

use std::path::PathBuf;

use crate::LibraryError;

/// Default key prefix for library entries.
pub const DEFAULT_PREFIX: &str = "functions";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    S3,
    Filesystem,
    Memory,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::S3 => "s3",
            BackendKind::Filesystem => "filesystem",
            BackendKind::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub allow_http: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Backend {
    S3(S3Config),
    Filesystem { root: PathBuf },
    Memory,
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::S3(_) => BackendKind::S3,
            Backend::Filesystem { .. } => BackendKind::Filesystem,
            Backend::Memory => BackendKind::Memory,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LibraryConfig {
    pub backend: Backend,
    /// Key prefix under which entries are stored.
    pub prefix: String,
}

impl LibraryConfig {
    pub fn memory() -> Self {
        Self {
            backend: Backend::Memory,
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::Filesystem { root: root.into() },
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    pub fn s3(cfg: S3Config) -> Self {
        Self {
            backend: Backend::S3(cfg),
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Build a config from environment variables.
    ///
    /// - `JOBFLOW_LIBRARY_BACKEND`: `memory` (default), `filesystem` or `s3`
    /// - `JOBFLOW_LIBRARY_ROOT`: filesystem root (default `./data/library`)
    /// - `JOBFLOW_LIBRARY_PREFIX`: key prefix (default `functions`)
    ///
    /// S3 uses `JOBFLOW_LIBRARY_S3_BUCKET` (required), `AWS_REGION`
    /// (default `us-east-1`), `JOBFLOW_LIBRARY_S3_ENDPOINT`,
    /// `JOBFLOW_LIBRARY_S3_ALLOW_HTTP`, `AWS_ACCESS_KEY_ID` and
    /// `AWS_SECRET_ACCESS_KEY`.
    pub fn from_env() -> Result<Self, LibraryError> {
        let backend = env_non_empty("JOBFLOW_LIBRARY_BACKEND");
        let cfg = match backend.as_deref() {
            None | Some("memory") | Some("mem") => Self::memory(),
            Some("filesystem") | Some("fs") => {
                let root = env_non_empty("JOBFLOW_LIBRARY_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./data/library"));
                Self::filesystem(root)
            }
            Some("s3") => Self::s3(read_s3_config()?),
            Some(other) => {
                return Err(LibraryError::InvalidConfig(format!(
                    "unsupported JOBFLOW_LIBRARY_BACKEND={other} (expected memory|filesystem|s3)"
                )));
            }
        };

        Ok(match env_non_empty("JOBFLOW_LIBRARY_PREFIX") {
            Some(prefix) => cfg.with_prefix(prefix),
            None => cfg,
        })
    }
}

fn env_non_empty(var_name: &str) -> Option<String> {
    let value = std::env::var(var_name).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_bool(var_name: &str, value: &str) -> Result<bool, LibraryError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Ok(true),
        "0" | "false" | "no" | "n" => Ok(false),
        _ => Err(LibraryError::InvalidConfig(format!(
            "invalid boolean for {var_name}={value} (expected true/false)"
        ))),
    }
}

fn read_s3_config() -> Result<S3Config, LibraryError> {
    let bucket = env_non_empty("JOBFLOW_LIBRARY_S3_BUCKET").ok_or_else(|| {
        LibraryError::InvalidConfig("JOBFLOW_LIBRARY_S3_BUCKET is required for s3".into())
    })?;
    let region = env_non_empty("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string());
    let endpoint = env_non_empty("JOBFLOW_LIBRARY_S3_ENDPOINT");

    // Plain http endpoints (local MinIO and friends) imply allow_http.
    let allow_http = match env_non_empty("JOBFLOW_LIBRARY_S3_ALLOW_HTTP") {
        Some(value) => parse_bool("JOBFLOW_LIBRARY_S3_ALLOW_HTTP", &value)?,
        None => endpoint
            .as_deref()
            .is_some_and(|e| e.to_ascii_lowercase().starts_with("http://")),
    };

    Ok(S3Config {
        bucket,
        region,
        endpoint,
        allow_http,
        access_key_id: env_non_empty("AWS_ACCESS_KEY_ID"),
        secret_access_key: env_non_empty("AWS_SECRET_ACCESS_KEY"),
    })
}
