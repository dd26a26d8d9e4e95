//! Host error taxonomy.

use std::path::PathBuf;

use modhost_sdk::ModuleError;
use thiserror::Error;

/// Errors surfaced by the module host.
#[derive(Debug, Error)]
pub enum HostError {
    /// A file could not be opened, parsed or instantiated. Skipped during scans.
    #[error("Failed to load {path}: {reason}")]
    LoadFailure { path: PathBuf, reason: String },

    /// Non-fatal; the extension decides how to degrade.
    #[error("Module '{module}' is missing dependency '{dependency}'")]
    MissingDependency { module: String, dependency: String },

    /// The backing file is still held after forced reclamation and deletion.
    #[error("Could not reclaim {path}; remove it manually")]
    ReclamationFailure { path: PathBuf },

    /// The host config file could not be parsed.
    #[error("Corrupt config at {path}: {reason}")]
    ConfigCorrupt { path: PathBuf, reason: String },

    /// A later file advertised an id that is already registered.
    #[error("Duplicate module id '{id}' in {path}")]
    DuplicateId { id: String, path: PathBuf },

    #[error("Module not found: {0}")]
    NotFound(String),

    #[error("Module '{id}' is in the wrong state: {reason}")]
    InvalidState { id: String, reason: String },

    #[error("Module '{id}' failed during {stage}: {reason}")]
    LifecycleFailed {
        id: String,
        stage: &'static str,
        reason: String,
    },

    #[error("Module directory {path} is inaccessible: {source}")]
    DirectoryInaccessible {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Incompatible module ABI in {path}: expected {expected}, got {got}")]
    AbiMismatch {
        path: PathBuf,
        expected: u32,
        got: u32,
    },

    #[error("Invalid host configuration: {0}")]
    Config(String),

    #[error("Module error: {0}")]
    Module(#[from] ModuleError),

    #[error("Watcher error: {0}")]
    Watcher(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    pub fn load_failure(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        HostError::LoadFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_state(id: impl Into<String>, reason: impl Into<String>) -> Self {
        HostError::InvalidState {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for host operations.
pub type Result<T> = std::result::Result<T, HostError>;
