//! Lifecycle notifications the host publishes on the event bus.
//!
//! Subscribe with `host.event_bus().on(|e: &ModuleActivated| ...)`.

use modhost_sdk::ModuleKind;

/// A module instance was created and registered.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleLoaded {
    pub id: String,
    pub kind: ModuleKind,
    pub version: semver::Version,
    pub generation: u64,
}

/// A module reached `Active`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleActivated {
    pub id: String,
}

/// An active extension handed its view to the view collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleViewReady {
    pub id: String,
}

/// A module left the active set; its descriptor remains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleUnloaded {
    pub id: String,
}

/// A lifecycle call failed or panicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleFailed {
    pub id: String,
    pub stage: &'static str,
    pub error: String,
}

/// A full load finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationReloaded {
    pub previous: Option<u64>,
    pub generation: u64,
    pub active: usize,
}

/// A released generation was dropped and its libraries closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationReclaimed {
    pub generation: u64,
}
