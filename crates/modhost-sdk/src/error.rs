//! Errors returned by module code and the services it uses.

use thiserror::Error;

/// Error type returned from module lifecycle methods and Host API helpers.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Activation failed: {0}")]
    ActivationFailed(String),

    #[error("Deactivation failed: {0}")]
    DeactivationFailed(String),

    #[error("Dispose failed: {0}")]
    DisposeFailed(String),

    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("Corrupt config at {path}: {reason}")]
    ConfigCorrupt { path: String, reason: String },

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type for module operations.
pub type ModuleResult<T> = std::result::Result<T, ModuleError>;
