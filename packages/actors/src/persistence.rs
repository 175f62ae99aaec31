//! File-based storage of deployed flow documents.

use std::path::{Path, PathBuf};

use jobflow_core::FlowConfig;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Named flow documents kept as JSON files in one directory.
///
/// Writes go through a temp file and a rename, so a crash never leaves a
/// half-written flow behind.
pub struct FlowStore {
    base_dir: PathBuf,
}

impl FlowStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    /// Store rooted at `./data/flows`.
    pub fn default_dir() -> Self {
        Self::new("./data/flows")
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Ensure the base directory exists.
    pub async fn init(&self) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.base_dir).await?;
        Ok(())
    }

    fn path(&self, name: &str) -> Result<PathBuf, PersistenceError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !name.starts_with('.');
        if !valid {
            return Err(PersistenceError::InvalidName(name.to_string()));
        }
        Ok(self.base_dir.join(format!("{}.json", name)))
    }

    /// Save `flow` under `name`, replacing any previous version.
    pub async fn save(&self, name: &str, flow: &FlowConfig) -> Result<(), PersistenceError> {
        let path = self.path(name)?;
        let json = serde_json::to_string_pretty(flow)?;

        self.init().await?;
        let temp_path = self.base_dir.join(format!("{}.json.tmp", name));
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, &path).await?;

        tracing::debug!("Saved flow to {:?}", path);
        Ok(())
    }

    /// Load and validate the flow saved under `name`.
    pub async fn load(&self, name: &str) -> Result<Option<FlowConfig>, PersistenceError> {
        let path = self.path(name)?;
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }

        let json = fs::read_to_string(&path).await?;
        let flow = FlowConfig::from_json_str(&json)?;
        tracing::debug!("Loaded flow from {:?}", path);

        Ok(Some(flow))
    }

    /// Delete a saved flow. Missing flows are not an error.
    pub async fn delete(&self, name: &str) -> Result<(), PersistenceError> {
        let path = self.path(name)?;
        if fs::try_exists(&path).await? {
            fs::remove_file(&path).await?;
            tracing::debug!("Deleted flow file {:?}", path);
        }
        Ok(())
    }

    /// Names of all saved flows, sorted.
    pub async fn list(&self) -> Result<Vec<String>, PersistenceError> {
        let mut names = Vec::new();
        if !fs::try_exists(&self.base_dir).await? {
            return Ok(names);
        }

        let mut entries = fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json")
                && let Some(stem) = path.file_stem()
            {
                names.push(stem.to_string_lossy().to_string());
            }
        }

        names.sort();
        Ok(names)
    }
}

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid flow: {0}")]
    Config(#[from] jobflow_core::ConfigError),

    #[error("Invalid flow name: {0:?}")]
    InvalidName(String),
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;
    use jobflow_core::QueueEndpoint;

    fn flow() -> FlowConfig {
        FlowConfig {
            endpoints: vec![QueueEndpoint::new("cfg", "q1", "", 0)],
            ..FlowConfig::default()
        }
    }

    #[tokio::test]
    async fn save_load_list_delete() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = FlowStore::new(dir.path().join("flows"));

        assert!(store.list().await?.is_empty());
        assert_eq!(store.load("main").await?, None);

        store.save("main", &flow()).await?;
        store.save("backup", &flow()).await?;
        assert_eq!(store.list().await?, vec!["backup", "main"]);
        assert_eq!(store.load("main").await?, Some(flow()));
        assert!(!dir.path().join("flows/main.json.tmp").exists());

        store.delete("main").await?;
        store.delete("main").await?;
        assert_eq!(store.list().await?, vec!["backup"]);
        Ok(())
    }

    #[tokio::test]
    async fn rejects_path_like_names() {
        let store = FlowStore::new("/tmp/unused");
        assert!(matches!(
            store.save("../escape", &flow()).await,
            Err(PersistenceError::InvalidName(_))
        ));
        assert!(matches!(
            store.load("").await,
            Err(PersistenceError::InvalidName(_))
        ));
    }
}
