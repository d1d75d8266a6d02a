//! Error types for the host engine

use thiserror::Error;

/// Main error type for the host engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Dispatch error: {0}")]
    DispatchError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("Container runtime unavailable: {0}")]
    Connectivity(String),

    #[error("Clone failed: {0}")]
    CloneError(String),

    #[error("Build failed: {0}")]
    BuildError(String),

    #[error("Packaging failed: {0}")]
    PackagingError(String),

    #[error("Publish failed: {0}")]
    PublishError(String),

    #[error("Container launch failed: {0}")]
    RuntimeLaunchError(String),
}
