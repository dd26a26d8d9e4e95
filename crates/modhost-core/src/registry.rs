//! Module registry: descriptors plus the live instances of the active
//! generation.
//!
//! Locks here are only held for table access, never while module code runs,
//! so a module may call back into the registry (e.g. `get_dependency` from
//! `initialize`) without deadlocking.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use modhost_sdk::{
    CapabilitySet, DependencyLookup, DependencyModule, DependencyRef, ExtensionModule,
    GenerationGuard, HostApi,
};
use parking_lot::{Mutex, RwLock};

use crate::descriptor::{LifecycleStage, ModuleDescriptor};
use crate::error::{HostError, Result};
use crate::loader::DiscoveredModule;

/// A live extension instance.
pub(crate) struct ExtensionSlot {
    // Field order is drop order: instance, then its Host API, then the
    // generation the instance's code lives in.
    pub module: Mutex<Box<dyn ExtensionModule>>,
    pub host_api: Arc<HostApi>,
    pub guard: GenerationGuard,
}

/// A live dependency instance, owned by the registry.
pub(crate) struct DependencySlot {
    pub module: Arc<dyn DependencyModule>,
    pub capabilities: Arc<CapabilitySet>,
    pub guard: GenerationGuard,
}

#[derive(Default)]
pub struct ModuleRegistry {
    /// Every known module, in first-discovery order.
    descriptors: RwLock<Vec<ModuleDescriptor>>,
    extensions: RwLock<HashMap<String, Arc<ExtensionSlot>>>,
    dependencies: RwLock<HashMap<String, DependencySlot>>,
    /// Ids of live instances in the order they were loaded.
    load_order: RwLock<Vec<String>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn descriptors(&self) -> Vec<ModuleDescriptor> {
        self.descriptors.read().clone()
    }

    pub fn descriptor(&self, id: &str) -> Option<ModuleDescriptor> {
        self.descriptors.read().iter().find(|d| d.id == id).cloned()
    }

    /// Ids of live instances in load order.
    pub fn loaded_ids(&self) -> Vec<String> {
        self.load_order.read().clone()
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.load_order.read().iter().any(|l| l == id)
    }

    /// Register a newly instantiated module as `Loaded` in `generation`,
    /// reusing its descriptor from earlier generations if there is one.
    pub(crate) fn begin_load(&self, found: &DiscoveredModule, generation: u64) -> Result<()> {
        let mut descriptors = self.descriptors.write();
        let index = match descriptors.iter().position(|d| d.id == found.info.id) {
            Some(index) => {
                descriptors[index].rediscover(
                    &found.info,
                    found.kind,
                    &found.path,
                    found.dependencies.clone(),
                )?;
                index
            }
            None => {
                descriptors.push(ModuleDescriptor::new(
                    &found.info,
                    found.kind,
                    &found.path,
                    found.dependencies.clone(),
                ));
                descriptors.len() - 1
            }
        };

        let descriptor = &mut descriptors[index];
        descriptor.transition(
            LifecycleStage::Loaded,
            format!("loaded into generation {}", generation),
        )?;
        descriptor.mark_loaded(generation);
        Ok(())
    }

    /// Remember modules found by a metadata-only scan. Descriptors with a
    /// live instance are left alone.
    pub(crate) fn record_scanned(&self, scanned: &[ModuleDescriptor]) {
        let mut descriptors = self.descriptors.write();
        for found in scanned {
            match descriptors.iter_mut().find(|d| d.id == found.id) {
                Some(existing) if existing.is_loaded => {}
                Some(existing) => {
                    existing.name = found.name.clone();
                    existing.description = found.description.clone();
                    existing.version = found.version.clone();
                    existing.kind = found.kind;
                    existing.path = found.path.clone();
                    existing.dependencies = found.dependencies.clone();
                }
                None => descriptors.push(found.clone()),
            }
        }
    }

    /// Apply `f` to the descriptor of `id`.
    pub(crate) fn update<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut ModuleDescriptor) -> R,
    ) -> Option<R> {
        self.descriptors
            .write()
            .iter_mut()
            .find(|d| d.id == id)
            .map(f)
    }

    /// Move `id` to `stage`. An invalid transition is logged, not returned:
    /// the lifecycle call it records has already happened.
    pub(crate) fn advance(&self, id: &str, stage: LifecycleStage, reason: &str) {
        match self.update(id, |d| d.transition(stage, reason)) {
            Some(Ok(())) => {}
            Some(Err(e)) => tracing::debug!(module_id = %id, "{}", e),
            None => tracing::debug!(module_id = %id, "No descriptor to advance"),
        }
    }

    pub(crate) fn fail(&self, id: &str, error: &str) {
        self.update(id, |d| d.fail(error));
    }

    /// Drop every descriptor backed by `path`. Returns their ids.
    pub(crate) fn remove_descriptors_for(&self, path: &Path) -> Vec<String> {
        let mut removed = Vec::new();
        self.descriptors.write().retain(|d| {
            if d.path == path {
                removed.push(d.id.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub(crate) fn insert_extension(&self, id: &str, slot: ExtensionSlot) {
        self.extensions.write().insert(id.to_string(), Arc::new(slot));
        self.load_order.write().push(id.to_string());
    }

    pub(crate) fn insert_dependency(&self, id: &str, slot: DependencySlot) {
        self.dependencies.write().insert(id.to_string(), slot);
        self.load_order.write().push(id.to_string());
    }

    pub(crate) fn take_extension(&self, id: &str) -> Option<Arc<ExtensionSlot>> {
        let slot = self.extensions.write().remove(id)?;
        self.load_order.write().retain(|l| l != id);
        Some(slot)
    }

    pub(crate) fn take_dependency(&self, id: &str) -> Option<DependencySlot> {
        let slot = self.dependencies.write().remove(id)?;
        self.load_order.write().retain(|l| l != id);
        Some(slot)
    }

    pub(crate) fn extension(&self, id: &str) -> Option<Arc<ExtensionSlot>> {
        self.extensions.read().get(id).cloned()
    }

    /// Ids of every descriptor with a live instance backed by `path`.
    pub(crate) fn loaded_from(&self, path: &Path) -> Vec<String> {
        self.descriptors
            .read()
            .iter()
            .filter(|d| d.is_loaded && d.path == path)
            .map(|d| d.id.clone())
            .collect()
    }

    pub fn require(&self, id: &str) -> Result<ModuleDescriptor> {
        self.descriptor(id)
            .ok_or_else(|| HostError::NotFound(id.to_string()))
    }
}

impl DependencyLookup for ModuleRegistry {
    fn has_dependency(&self, id: &str) -> bool {
        self.dependencies.read().contains_key(id)
    }

    fn get_dependency(&self, id: &str) -> Option<DependencyRef> {
        self.dependencies.read().get(id).map(|slot| {
            DependencyRef::new(
                slot.module.clone(),
                slot.capabilities.clone(),
                Some(slot.guard.clone()),
            )
        })
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("descriptors", &self.descriptors.read().len())
            .field("loaded", &*self.load_order.read())
            .finish()
    }
}
