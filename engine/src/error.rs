//! Errors surfaced by the engine's loading, persistence and setup paths.
//!
//! Queries never return these: an unknown holder resolves to `Undefined`,
//! `None` or an empty list.

use authz::{AuthzError, HolderId};
use nodes::NodeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Holder not loaded: {0}")]
    UnknownHolder(HolderId),

    #[error("Track not found: {0}")]
    UnknownTrack(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Authz(#[from] AuthzError),

    #[error("Logging initialization failed: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
