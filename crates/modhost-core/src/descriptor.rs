//! Module descriptors and the per-module lifecycle state machine.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use modhost_sdk::{DependencySpec, ModuleInfo, ModuleKind};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{HostError, Result};

/// Transitions kept per descriptor.
const MAX_HISTORY: usize = 32;

/// Coarse module state shown to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    Unloaded,
    Loaded,
    Active,
    Error,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleState::Unloaded => "unloaded",
            ModuleState::Loaded => "loaded",
            ModuleState::Active => "active",
            ModuleState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Fine-grained lifecycle position.
///
/// `Discovered → Loaded → Initialized → Active ⇄ Deactivated → Disposed →
/// Unloaded`. `Error` is reachable from anywhere and left only by a new
/// load (back to `Discovered`) or by recording the module as unloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStage {
    Discovered,
    Loaded,
    Initialized,
    Active,
    Deactivated,
    Disposed,
    Unloaded,
    Error,
}

impl LifecycleStage {
    pub fn can_transition_to(self, to: LifecycleStage) -> bool {
        use LifecycleStage::*;

        matches!(
            (self, to),
            (Discovered, Loaded)
                | (Loaded, Initialized)
                | (Loaded, Unloaded)
                | (Initialized, Active)
                | (Initialized, Disposed)
                | (Active, Deactivated)
                | (Deactivated, Active)
                | (Deactivated, Disposed)
                | (Disposed, Unloaded)
                | (Unloaded, Discovered)
                | (Error, Discovered)
                | (Error, Unloaded)
                | (_, Error)
        )
    }

    pub fn state(self) -> ModuleState {
        match self {
            LifecycleStage::Discovered | LifecycleStage::Disposed | LifecycleStage::Unloaded => {
                ModuleState::Unloaded
            }
            LifecycleStage::Loaded | LifecycleStage::Initialized | LifecycleStage::Deactivated => {
                ModuleState::Loaded
            }
            LifecycleStage::Active => ModuleState::Active,
            LifecycleStage::Error => ModuleState::Error,
        }
    }
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A recorded stage change.
#[derive(Debug, Clone, Serialize)]
pub struct StateTransition {
    pub from: LifecycleStage,
    pub to: LifecycleStage,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub error: Option<String>,
}

/// Everything the host knows about a module, loaded or not.
///
/// Descriptors outlive unloads so a known-but-unloaded module can still be
/// listed, reloaded, exported or deleted.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: semver::Version,
    pub kind: ModuleKind,
    pub state: ModuleState,
    pub stage: LifecycleStage,
    /// Backing file in the module directory.
    pub path: PathBuf,
    pub dependencies: Vec<DependencySpec>,
    /// Declared dependencies that were present when the module loaded.
    pub resolved_dependencies: Vec<String>,
    pub error: Option<String>,
    pub is_loaded: bool,
    /// Generation the current or last instance came from.
    pub generation: Option<u64>,
    /// Changes every time a new instance is created.
    pub instance_id: Option<Uuid>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub history: Vec<StateTransition>,
}

impl ModuleDescriptor {
    pub fn new(
        info: &ModuleInfo,
        kind: ModuleKind,
        path: impl Into<PathBuf>,
        dependencies: Vec<DependencySpec>,
    ) -> Self {
        Self {
            id: info.id.clone(),
            name: info.name.clone(),
            description: info.description.clone(),
            version: info.version.clone(),
            kind,
            state: ModuleState::Unloaded,
            stage: LifecycleStage::Discovered,
            path: path.into(),
            dependencies,
            resolved_dependencies: Vec::new(),
            error: None,
            is_loaded: false,
            generation: None,
            instance_id: None,
            loaded_at: None,
            history: Vec::new(),
        }
    }

    /// Refresh metadata from a newly discovered instance and return to
    /// `Discovered`, keeping the transition history.
    pub fn rediscover(
        &mut self,
        info: &ModuleInfo,
        kind: ModuleKind,
        path: impl Into<PathBuf>,
        dependencies: Vec<DependencySpec>,
    ) -> Result<()> {
        if self.is_loaded {
            return Err(HostError::invalid_state(
                &self.id,
                "cannot rediscover a loaded module",
            ));
        }
        self.name = info.name.clone();
        self.description = info.description.clone();
        self.version = info.version.clone();
        self.kind = kind;
        self.path = path.into();
        self.dependencies = dependencies;
        self.resolved_dependencies.clear();
        self.error = None;
        if self.stage != LifecycleStage::Discovered {
            self.transition(LifecycleStage::Discovered, "rediscovered")?;
        }
        Ok(())
    }

    /// Move to `to`, rejecting transitions the state machine does not allow.
    pub fn transition(&mut self, to: LifecycleStage, reason: impl Into<String>) -> Result<()> {
        if !self.stage.can_transition_to(to) {
            return Err(HostError::invalid_state(
                &self.id,
                format!("invalid transition {} -> {}", self.stage, to),
            ));
        }
        self.record(to, reason.into(), None);
        Ok(())
    }

    /// Move to `Error`, keeping the message.
    pub fn fail(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.error = Some(error.clone());
        self.is_loaded = false;
        self.record(LifecycleStage::Error, "lifecycle failure".into(), Some(error));
    }

    /// Record the module as loaded into `generation`.
    pub fn mark_loaded(&mut self, generation: u64) {
        self.is_loaded = true;
        self.generation = Some(generation);
        self.instance_id = Some(Uuid::new_v4());
        self.loaded_at = Some(Utc::now());
    }

    /// Record the module as no longer in the active set.
    pub fn mark_unloaded(&mut self) {
        self.is_loaded = false;
        if self.stage != LifecycleStage::Unloaded {
            let from = self.stage;
            self.record(
                LifecycleStage::Unloaded,
                format!("unloaded from {}", from),
                None,
            );
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ModuleState::Active
    }

    fn record(&mut self, to: LifecycleStage, reason: String, error: Option<String>) {
        self.history.push(StateTransition {
            from: self.stage,
            to,
            timestamp: Utc::now(),
            reason,
            error,
        });
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }
        self.stage = to;
        self.state = to.state();
    }
}
