//! Core error taxonomy for metacoder.

use std::path::PathBuf;

/// Errors produced by the core layer (locking, registry, workspace prep).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("lock timeout on {path:?} after {waited_ms}ms")]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    #[error("lock acquisition cancelled for {path:?}")]
    LockCancelled { path: PathBuf },

    #[error("unknown coder: {name} (available: {available})")]
    UnknownCoder { name: String, available: String },

    #[error("coder not registered: {0}")]
    CoderNotRegistered(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("config object path escapes the working directory: {0}")]
    PathEscape(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
