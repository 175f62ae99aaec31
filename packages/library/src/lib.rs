//! Named transform scripts kept in object storage.
//!
//! Consumers may reference a saved script by name instead of carrying the
//! body inline. Entries are JSON documents stored through `object_store`, so
//! the same library works on S3, a local directory or in memory.

mod config;
mod store;

pub use config::{Backend, BackendKind, DEFAULT_PREFIX, LibraryConfig, S3Config};
pub use store::{LibraryEntry, ScriptLibrary};

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("invalid library config: {0}")]
    InvalidConfig(String),

    #[error("invalid script name: {0:?}")]
    InvalidName(String),

    #[error("script not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
