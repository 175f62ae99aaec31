//! Library entries and the store that holds them.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::TryStreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, ObjectStoreExt};
use serde::{Deserialize, Serialize};

use crate::LibraryError;
use crate::config::{Backend, BackendKind, LibraryConfig, S3Config};

fn default_outputs() -> usize {
    1
}

/// A saved transform script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub name: String,
    /// Script body.
    pub func: String,
    /// Number of output positions the script fills.
    #[serde(default = "default_outputs")]
    pub outputs: usize,
    /// Free-form description.
    #[serde(default)]
    pub info: String,
}

impl LibraryEntry {
    pub fn new(name: impl Into<String>, func: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            func: func.into(),
            outputs: default_outputs(),
            info: String::new(),
        }
    }

    pub fn with_outputs(mut self, outputs: usize) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }
}

#[derive(Clone)]
pub struct ScriptLibrary {
    kind: BackendKind,
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ScriptLibrary {
    pub async fn new(cfg: LibraryConfig) -> Result<Self, LibraryError> {
        let kind = cfg.backend.kind();
        let store: Arc<dyn ObjectStore> = match cfg.backend {
            Backend::S3(s3) => Arc::new(build_s3(s3)?),
            Backend::Filesystem { root } => {
                std::fs::create_dir_all(&root)?;
                Arc::new(object_store::local::LocalFileSystem::new_with_prefix(&root)?)
            }
            Backend::Memory => Arc::new(object_store::memory::InMemory::new()),
        };

        tracing::info!("Script library on {} backend", kind.as_str());

        Ok(Self {
            kind,
            store,
            prefix: cfg.prefix.trim_matches('/').to_string(),
        })
    }

    pub async fn from_env() -> Result<Self, LibraryError> {
        Self::new(LibraryConfig::from_env()?).await
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    fn prefix_path(&self) -> Option<Path> {
        if self.prefix.is_empty() {
            None
        } else {
            Some(Path::from(self.prefix.as_str()))
        }
    }

    fn entry_path(&self, name: &str) -> Result<Path, LibraryError> {
        if name.trim().is_empty() || name.contains('/') || name.starts_with('.') {
            return Err(LibraryError::InvalidName(name.to_string()));
        }
        if self.prefix.is_empty() {
            Ok(Path::from(format!("{name}.json")))
        } else {
            Ok(Path::from(format!("{}/{name}.json", self.prefix)))
        }
    }

    /// Save an entry, replacing any entry of the same name.
    pub async fn save(&self, entry: &LibraryEntry) -> Result<(), LibraryError> {
        let path = self.entry_path(&entry.name)?;
        let bytes = serde_json::to_vec(entry)?;
        self.store
            .put(&path, object_store::PutPayload::from(Bytes::from(bytes)))
            .await?;
        tracing::debug!("Saved library script {}", entry.name);
        Ok(())
    }

    pub async fn load(&self, name: &str) -> Result<LibraryEntry, LibraryError> {
        let path = self.entry_path(name)?;
        let result = match self.store.get(&path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(LibraryError::NotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let bytes = result.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Names of all saved scripts, sorted.
    pub async fn list(&self) -> Result<Vec<String>, LibraryError> {
        let prefix = self.prefix_path();
        let objects: Vec<_> = self.store.list(prefix.as_ref()).try_collect().await?;

        let mut names: Vec<String> = objects
            .iter()
            .filter_map(|meta| meta.location.filename())
            .filter_map(|file| file.strip_suffix(".json"))
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    pub async fn delete(&self, name: &str) -> Result<(), LibraryError> {
        let path = self.entry_path(name)?;
        match self.store.delete(&path).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => {
                Err(LibraryError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for ScriptLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptLibrary")
            .field("kind", &self.kind)
            .field("prefix", &self.prefix)
            .finish()
    }
}

fn build_s3(cfg: S3Config) -> Result<object_store::aws::AmazonS3, LibraryError> {
    let mut builder = object_store::aws::AmazonS3Builder::new()
        .with_bucket_name(cfg.bucket)
        .with_region(cfg.region);

    if let Some(endpoint) = cfg.endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    if cfg.allow_http {
        builder = builder.with_allow_http(true);
    }
    if let Some(access_key_id) = cfg.access_key_id {
        builder = builder.with_access_key_id(access_key_id);
    }
    if let Some(secret_access_key) = cfg.secret_access_key {
        builder = builder.with_secret_access_key(secret_access_key);
    }

    Ok(builder.build()?)
}
