//! Generations: the revocable boundary holding all code loaded by one scan.
//!
//! A [`Generation`] owns the opened units (library handles and their
//! manifests). Every module instance, Host API, dependency reference and
//! guarded handler holds a [`GenerationGuard`] clone, so the generation is
//! only dropped once nothing can call into its code any more.
//!
//! Dropping a generation does not close its libraries on the spot: the last
//! reference may be released from drop glue that itself lives inside one of
//! those libraries. The units are moved to a [`RetiredGenerations`] list
//! instead and closed by the host's next collection pass.

use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use modhost_sdk::{GenerationGuard, ModuleManifest};
use parking_lot::Mutex;

/// A loaded unit: one module file opened into a generation.
pub struct LoadedUnit {
    /// File in the module directory.
    pub path: PathBuf,
    /// Copy that was actually opened, if any.
    pub shadow_path: Option<PathBuf>,
    pub manifest: ModuleManifest,
    // Dropped last: the library backing `manifest`'s factories.
    keepalive: Option<Box<dyn Any + Send + Sync>>,
}

impl LoadedUnit {
    pub fn new(
        path: PathBuf,
        shadow_path: Option<PathBuf>,
        manifest: ModuleManifest,
        keepalive: Option<Box<dyn Any + Send + Sync>>,
    ) -> Self {
        Self {
            path,
            shadow_path,
            manifest,
            keepalive,
        }
    }

    pub fn is_native(&self) -> bool {
        self.keepalive.is_some()
    }
}

impl fmt::Debug for LoadedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedUnit")
            .field("path", &self.path)
            .field("shadow_path", &self.shadow_path)
            .field("modules", &self.manifest.factories().len())
            .finish()
    }
}

/// Code loaded from one scan of the module directory.
pub struct Generation {
    id: u64,
    units: Vec<LoadedUnit>,
    shadow_dir: Option<PathBuf>,
    retired: Arc<RetiredGenerations>,
}

impl Generation {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn units(&self) -> &[LoadedUnit] {
        &self.units
    }
}

impl Drop for Generation {
    fn drop(&mut self) {
        self.retired.push(RetiredGeneration {
            id: self.id,
            units: std::mem::take(&mut self.units),
            shadow_dir: self.shadow_dir.take(),
        });
    }
}

struct RetiredGeneration {
    id: u64,
    units: Vec<LoadedUnit>,
    shadow_dir: Option<PathBuf>,
}

/// Generations that have been dropped but whose libraries are not yet closed.
#[derive(Default)]
pub struct RetiredGenerations {
    entries: Mutex<Vec<RetiredGeneration>>,
}

impl RetiredGenerations {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, generation: RetiredGeneration) {
        self.entries.lock().push(generation);
    }

    /// Close the libraries of every retired generation and remove their
    /// shadow directories. Must run from host code, never from a module.
    ///
    /// Returns the ids of the generations collected.
    pub fn collect(&self) -> Vec<u64> {
        let retired = std::mem::take(&mut *self.entries.lock());
        let mut collected = Vec::with_capacity(retired.len());

        for generation in retired {
            let RetiredGeneration {
                id,
                units,
                shadow_dir,
            } = generation;
            let native = units.iter().filter(|u| u.is_native()).count();
            drop(units);

            if let Some(dir) = shadow_dir {
                if let Err(e) = std::fs::remove_dir_all(&dir) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(
                            generation = id,
                            path = %dir.display(),
                            "Failed to remove shadow directory: {}", e
                        );
                    }
                }
            }
            tracing::debug!(generation = id, native_units = native, "Generation collected");
            collected.push(id);
        }
        collected
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// The host's owning handle to the active generation.
pub struct GenerationHandle {
    inner: Arc<Generation>,
    retired: Arc<RetiredGenerations>,
}

impl GenerationHandle {
    pub fn new(
        id: u64,
        units: Vec<LoadedUnit>,
        shadow_dir: Option<PathBuf>,
        retired: Arc<RetiredGenerations>,
    ) -> Self {
        let inner = Arc::new(Generation {
            id,
            units,
            shadow_dir,
            retired: retired.clone(),
        });
        Self { inner, retired }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn units(&self) -> &[LoadedUnit] {
        &self.inner.units
    }

    /// A guard to hand to anything created from this generation's code.
    pub fn guard(&self) -> GenerationGuard {
        self.inner.clone()
    }

    /// References held outside this handle.
    pub fn outstanding(&self) -> usize {
        Arc::strong_count(&self.inner) - 1
    }

    /// Release the generation and verify it was reclaimed.
    ///
    /// The caller must already have dropped every instance it created.
    /// After dropping this handle the retired list is collected and the
    /// generation's weak count checked; if still referenced, the check is
    /// repeated `retries` times, `grace` apart.
    pub fn release(
        self,
        grace: Duration,
        retries: u32,
    ) -> std::result::Result<Reclaimed, StillReferenced> {
        let id = self.inner.id;
        let shadow_dir = self.inner.shadow_dir.clone();
        let files: Vec<PathBuf> = self.inner.units.iter().map(|u| u.path.clone()).collect();
        let pending = PendingGeneration {
            id,
            weak: Arc::downgrade(&self.inner),
            shadow_dir,
            files,
        };
        let retired = self.retired.clone();
        drop(self);

        for attempt in 0..=retries {
            retired.collect();
            if pending.is_reclaimed() {
                tracing::debug!(generation = id, attempt, "Generation reclaimed");
                return Ok(Reclaimed { generation: id });
            }
            if attempt < retries {
                std::thread::sleep(grace);
            }
        }

        Err(StillReferenced {
            generation: id,
            strong_count: pending.strong_count(),
            pending,
        })
    }
}

impl fmt::Debug for GenerationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationHandle")
            .field("id", &self.inner.id)
            .field("units", &self.inner.units)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// The generation was dropped and its libraries closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reclaimed {
    pub generation: u64,
}

/// Something outside the host still references the generation.
#[derive(Debug)]
pub struct StillReferenced {
    pub generation: u64,
    pub strong_count: usize,
    pub pending: PendingGeneration,
}

impl fmt::Display for StillReferenced {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "generation {} still has {} outstanding reference(s)",
            self.generation, self.strong_count
        )
    }
}

/// A released generation awaiting reclamation.
#[derive(Debug, Clone)]
pub struct PendingGeneration {
    id: u64,
    weak: Weak<Generation>,
    shadow_dir: Option<PathBuf>,
    files: Vec<PathBuf>,
}

impl PendingGeneration {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_reclaimed(&self) -> bool {
        self.weak.strong_count() == 0
    }

    pub fn strong_count(&self) -> usize {
        self.weak.strong_count()
    }

    pub fn shadow_dir(&self) -> Option<&Path> {
        self.shadow_dir.as_deref()
    }

    /// Module files that were opened into this generation.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generation")
            .field("id", &self.id)
            .field("units", &self.units.len())
            .finish()
    }
}
