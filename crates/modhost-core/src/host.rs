//! The module host: discovery, lifecycle orchestration and reclamation.
//!
//! All mutating operations are serialized by one operation lock. Module code
//! is never called while a registry lock is held. Host events raised during
//! an operation are queued and published once the operation lock is
//! released, so subscribers may call back into the host.
//!
//! A full load tears down the current generation first (every instance
//! deactivated and disposed in reverse load order), releases it and checks
//! that it was reclaimed, and only then opens the module directory again
//! into a fresh generation. Dependencies are initialized before any
//! extension so extensions can resolve them during `initialize`.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use modhost_sdk::{
    CapabilitySet, DependencyLookup, DependencyModule, DependencyRef, EventBus, ExtensionModule,
    GenerationGuard, HostApi, HostServices, LogSink, ModuleIdentity, ModuleKind,
    PerformanceMonitor, SharedDataStore, ViewHost,
};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::HostConfig;
use crate::descriptor::{LifecycleStage, ModuleDescriptor};
use crate::error::{HostError, Result};
use crate::events::{
    GenerationReclaimed, GenerationReloaded, ModuleActivated, ModuleFailed, ModuleLoaded,
    ModuleUnloaded, ModuleViewReady,
};
use crate::generation::{GenerationHandle, PendingGeneration};
use crate::lifecycle::{self, LifecycleCall};
use crate::loader::{
    self, BuiltinModuleTable, DiscoveredModule, LoadedGeneration, ModuleInstance, ModuleLoader,
    NativeLibraryOpener,
};
use crate::logging::TracingLogSink;
use crate::registry::{DependencySlot, ExtensionSlot, ModuleRegistry};
use crate::report::{
    DuplicateModule, LoadReport, ModuleFailure, ReclamationOutcome, ScanReport, SkippedFile,
    UnresolvedDependency,
};
use crate::view::HeadlessViewHost;

type QueuedEvent = Box<dyn FnOnce(&EventBus) + Send>;

/// Builder for [`ModuleHost`].
pub struct ModuleHostBuilder {
    config: HostConfig,
    builtin: Option<BuiltinModuleTable>,
    native: bool,
    log_sink: Option<Arc<dyn LogSink>>,
    view_host: Option<Arc<dyn ViewHost>>,
    performance: Option<Arc<PerformanceMonitor>>,
}

impl ModuleHostBuilder {
    /// Compiled-in modules enabled by marker files.
    pub fn with_builtin(mut self, table: BuiltinModuleTable) -> Self {
        self.builtin = Some(table);
        self
    }

    /// Whether native libraries are loaded (on by default).
    pub fn with_native(mut self, enabled: bool) -> Self {
        self.native = enabled;
        self
    }

    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn with_view_host(mut self, view_host: Arc<dyn ViewHost>) -> Self {
        self.view_host = Some(view_host);
        self
    }

    pub fn with_performance(mut self, performance: Arc<PerformanceMonitor>) -> Self {
        self.performance = Some(performance);
        self
    }

    pub fn build(self) -> Result<ModuleHost> {
        let config = self.config;
        config.validate()?;

        std::fs::create_dir_all(&config.module_dir).map_err(|source| {
            HostError::DirectoryInaccessible {
                path: config.module_dir.clone(),
                source,
            }
        })?;
        std::fs::create_dir_all(&config.config_dir)?;

        // Private to this host so two hosts never share shadow copies.
        let shadow_root = config
            .shadow_dir
            .join(format!("host-{}", Uuid::new_v4().simple()));

        let mut loader = ModuleLoader::new(shadow_root);
        if let Some(table) = self.builtin {
            loader =
                loader.with_opener(table.with_marker_extension(config.builtin_extension.clone()));
        }
        if self.native {
            loader = loader.with_opener(NativeLibraryOpener::with_extension(
                config.native_extension.clone(),
            ));
        }

        let registry = Arc::new(ModuleRegistry::new());
        let lookup: Weak<dyn DependencyLookup> = Arc::downgrade(&registry) as Weak<ModuleRegistry>;

        let log_sink = self
            .log_sink
            .unwrap_or_else(|| Arc::new(TracingLogSink::new()));
        let view_host = self
            .view_host
            .unwrap_or_else(|| Arc::new(HeadlessViewHost::new()));
        let mut services = HostServices::new(log_sink, view_host, config.config_dir.clone())
            .with_dependencies(lookup);
        if let Some(performance) = self.performance {
            services = services.with_performance(performance);
        }

        tracing::info!(
            module_dir = %config.module_dir.display(),
            shadow_root = %loader.shadow_root().display(),
            "Module host created"
        );

        Ok(ModuleHost {
            config,
            loader,
            registry,
            services,
            generation: Mutex::new(None),
            pending: Mutex::new(Vec::new()),
            operation: Mutex::new(()),
            outbox: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        })
    }
}

/// Loads, runs and unloads modules from one module directory.
pub struct ModuleHost {
    config: HostConfig,
    loader: ModuleLoader,
    registry: Arc<ModuleRegistry>,
    services: HostServices,
    generation: Mutex<Option<GenerationHandle>>,
    /// Released generations that were still referenced.
    pending: Mutex<Vec<PendingGeneration>>,
    operation: Mutex<()>,
    /// Host events waiting for the operation lock to be released.
    outbox: Mutex<Vec<QueuedEvent>>,
    shut_down: AtomicBool,
}

impl ModuleHost {
    pub fn builder(config: HostConfig) -> ModuleHostBuilder {
        ModuleHostBuilder {
            config,
            builtin: None,
            native: true,
            log_sink: None,
            view_host: None,
            performance: None,
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn module_dir(&self) -> &Path {
        &self.config.module_dir
    }

    pub fn services(&self) -> &HostServices {
        &self.services
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.services.event_bus
    }

    pub fn shared_data(&self) -> &Arc<SharedDataStore> {
        &self.services.shared_data
    }

    pub fn performance(&self) -> &Arc<PerformanceMonitor> {
        &self.services.performance
    }

    /// Whether the loader handles `path`.
    pub fn is_module_file(&self, path: &Path) -> bool {
        self.loader.accepts(path)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Every known module, loaded or not, in discovery order.
    pub fn descriptors(&self) -> Vec<ModuleDescriptor> {
        self.registry.descriptors()
    }

    pub fn descriptor(&self, id: &str) -> Option<ModuleDescriptor> {
        self.registry.descriptor(id)
    }

    /// Ids of live instances in load order.
    pub fn loaded_modules(&self) -> Vec<String> {
        self.registry.loaded_ids()
    }

    pub fn has_dependency(&self, id: &str) -> bool {
        self.registry.has_dependency(id)
    }

    pub fn get_dependency(&self, id: &str) -> Option<DependencyRef> {
        self.registry.get_dependency(id)
    }

    /// The Host API bound to a live extension.
    pub fn host_api(&self, id: &str) -> Option<Arc<HostApi>> {
        self.registry.extension(id).map(|slot| slot.host_api.clone())
    }

    /// Id of the generation currently loaded.
    pub fn current_generation(&self) -> Option<u64> {
        self.generation.lock().as_ref().map(GenerationHandle::id)
    }

    /// Released generations that were still referenced when last checked.
    pub fn pending_reclamations(&self) -> Vec<PendingGeneration> {
        self.pending.lock().clone()
    }

    // ========================================================================
    // Scan and load
    // ========================================================================

    /// Describe the modules on disk without running any lifecycle method.
    ///
    /// Modules not currently loaded are recorded, so they can be exported
    /// or deleted without being run first.
    pub fn scan(&self) -> Result<ScanReport> {
        self.exclusive(|| self.scan_locked())
    }

    fn scan_locked(&self) -> Result<ScanReport> {
        let (modules, issues) = self.loader.scan(&self.config.module_dir)?;
        self.registry.record_scanned(&modules);
        Ok(ScanReport {
            modules,
            skipped: issues
                .into_iter()
                .map(|issue| SkippedFile {
                    path: issue.path,
                    reason: issue.error.to_string(),
                })
                .collect(),
        })
    }

    /// Load every module in the module directory into a fresh generation.
    ///
    /// A generation that is already loaded is torn down first, so this is
    /// also the full reload. Per-file and per-module problems are collected
    /// in the report; only an unreadable module directory is an error.
    pub fn load_all(&self) -> Result<LoadReport> {
        self.exclusive(|| self.load_locked())
    }

    /// Reload one module by reloading the whole generation.
    ///
    /// Errors if the module does not come back `Active`.
    pub fn reload(&self, id: &str) -> Result<LoadReport> {
        self.exclusive(|| self.reload_locked(id))
    }

    fn reload_locked(&self, id: &str) -> Result<LoadReport> {
        let descriptor = self.registry.require(id)?;
        if descriptor.is_loaded {
            self.unload_locked(id)?;
        }

        let report = self.load_locked()?;
        let descriptor = self.registry.require(id)?;
        if !descriptor.is_active() {
            let reason = match &descriptor.error {
                Some(error) => format!("did not reload: {}", error),
                None => format!("did not reload, now {}", descriptor.state),
            };
            return Err(HostError::invalid_state(id, reason));
        }
        Ok(report)
    }

    fn load_locked(&self) -> Result<LoadReport> {
        // Fail before tearing anything down.
        if let Err(source) = std::fs::metadata(&self.config.module_dir) {
            return Err(HostError::DirectoryInaccessible {
                path: self.config.module_dir.clone(),
                source,
            });
        }

        let mut report = LoadReport::default();
        if let Some(outcome) = self.teardown_locked() {
            report.previous_generation = Some(outcome.generation());
            report.reclamation = Some(outcome);
        }

        let LoadedGeneration { handle, issues } =
            self.loader.load_generation(&self.config.module_dir)?;
        let generation = handle.id();
        report.generation = Some(generation);
        report.skipped.extend(issues.into_iter().map(|issue| SkippedFile {
            path: issue.path,
            reason: issue.error.to_string(),
        }));

        let guard = handle.guard();
        let mut claimed: Vec<(String, PathBuf)> = Vec::new();

        for pass in [ModuleKind::Dependency, ModuleKind::Extension] {
            for unit in handle.units() {
                for factory in unit.manifest.factories() {
                    if factory.kind() != pass {
                        continue;
                    }
                    let (instance, found) = match loader::instantiate(factory, &unit.path) {
                        Ok(created) => created,
                        Err(e) => {
                            tracing::warn!(path = %unit.path.display(), "Skipping module: {}", e);
                            report.skipped.push(SkippedFile {
                                path: unit.path.clone(),
                                reason: e.to_string(),
                            });
                            continue;
                        }
                    };

                    if let Some((_, kept)) = claimed.iter().find(|(id, _)| *id == found.info.id) {
                        tracing::warn!(
                            module_id = %found.info.id,
                            path = %found.path.display(),
                            kept = %kept.display(),
                            "{}",
                            HostError::DuplicateId {
                                id: found.info.id.clone(),
                                path: found.path.clone(),
                            }
                        );
                        report.duplicates.push(DuplicateModule {
                            id: found.info.id.clone(),
                            path: found.path.clone(),
                            kept: kept.clone(),
                        });
                        continue;
                    }
                    claimed.push((found.info.id.clone(), found.path.clone()));

                    match instance {
                        ModuleInstance::Dependency(module) => {
                            self.start_dependency(module, &found, generation, &guard, &mut report)
                        }
                        ModuleInstance::Extension(module) => {
                            self.start_extension(module, &found, generation, &guard, &mut report)
                        }
                    }
                }
            }
        }

        drop(guard);
        *self.generation.lock() = Some(handle);
        self.sweep_pending_locked();

        tracing::info!(
            generation,
            active = report.active.len(),
            skipped = report.skipped.len(),
            failed = report.failures.len(),
            "Generation loaded"
        );
        self.defer(GenerationReloaded {
            previous: report.previous_generation,
            generation,
            active: report.active.len(),
        });
        Ok(report)
    }

    /// Register `found` as loaded. Returns false, after recording a
    /// failure, if its descriptor cannot take a new instance.
    fn begin_load(
        &self,
        found: &DiscoveredModule,
        generation: u64,
        report: &mut LoadReport,
    ) -> bool {
        match self.registry.begin_load(found, generation) {
            Ok(()) => {
                self.defer(ModuleLoaded {
                    id: found.info.id.clone(),
                    kind: found.kind,
                    version: found.info.version.clone(),
                    generation,
                });
                true
            }
            Err(e) => {
                tracing::warn!(module_id = %found.info.id, "Cannot load module: {}", e);
                report.skipped.push(SkippedFile {
                    path: found.path.clone(),
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    fn start_dependency(
        &self,
        module: Arc<dyn DependencyModule>,
        found: &DiscoveredModule,
        generation: u64,
        guard: &GenerationGuard,
        report: &mut LoadReport,
    ) {
        let id = found.info.id.as_str();
        if !self.begin_load(found, generation, report) {
            return;
        }

        if let Err(e) = lifecycle::call(id, LifecycleCall::Initialize, || module.initialize()) {
            self.record_failure(id, e, report);
            let _ = lifecycle::call(id, LifecycleCall::Dispose, || module.dispose());
            return;
        }
        self.registry
            .advance(id, LifecycleStage::Initialized, "initialized");

        let mut capabilities = CapabilitySet::new();
        if let Err(e) = lifecycle::call_infallible(id, LifecycleCall::Initialize, || {
            module.provide_capabilities(&mut capabilities)
        }) {
            self.record_failure(id, e, report);
            let _ = lifecycle::call(id, LifecycleCall::Dispose, || module.dispose());
            return;
        }

        tracing::info!(
            module_id = %id,
            version = %found.info.version,
            capabilities = ?capabilities.names(),
            "Dependency module active"
        );
        self.registry.insert_dependency(
            id,
            DependencySlot {
                module,
                capabilities: Arc::new(capabilities),
                guard: guard.clone(),
            },
        );
        self.registry.advance(id, LifecycleStage::Active, "dependency ready");
        report.active.push(id.to_string());
        self.defer(ModuleActivated { id: id.to_string() });
    }

    fn start_extension(
        &self,
        mut module: Box<dyn ExtensionModule>,
        found: &DiscoveredModule,
        generation: u64,
        guard: &GenerationGuard,
        report: &mut LoadReport,
    ) {
        let id = found.info.id.as_str();
        if !self.begin_load(found, generation, report) {
            return;
        }

        let mut resolved = Vec::new();
        for dependency in &found.dependencies {
            if self.registry.has_dependency(&dependency.id) {
                resolved.push(dependency.id.clone());
                continue;
            }
            tracing::warn!(
                module_id = %id,
                dependency = %dependency.id,
                required = dependency.required,
                "{}",
                HostError::MissingDependency {
                    module: id.to_string(),
                    dependency: dependency.id.clone(),
                }
            );
            report.missing_dependencies.push(UnresolvedDependency {
                module: id.to_string(),
                dependency: dependency.id.clone(),
                required: dependency.required,
            });
        }
        self.registry
            .update(id, |d| d.resolved_dependencies = resolved);

        let identity = ModuleIdentity {
            id: id.to_string(),
            name: found.info.name.clone(),
            path: found.path.clone(),
        };
        let host_api = match HostApi::bind(identity, self.services.clone(), Some(guard.clone())) {
            Ok(api) => api,
            Err(e) => {
                self.record_failure(
                    id,
                    HostError::LifecycleFailed {
                        id: id.to_string(),
                        stage: LifecycleCall::Initialize.as_str(),
                        reason: e.to_string(),
                    },
                    report,
                );
                return;
            }
        };

        let api = host_api.clone();
        if let Err(e) = lifecycle::call(id, LifecycleCall::Initialize, || module.initialize(api)) {
            self.record_failure(id, e, report);
            let _ = lifecycle::call(id, LifecycleCall::Dispose, || module.dispose());
            return;
        }
        self.registry
            .advance(id, LifecycleStage::Initialized, "initialized");

        if let Err(e) = lifecycle::call(id, LifecycleCall::Activate, || module.activate()) {
            self.record_failure(id, e, report);
            let _ = lifecycle::call(id, LifecycleCall::Dispose, || module.dispose());
            return;
        }
        self.registry.advance(id, LifecycleStage::Active, "activated");

        let view = match lifecycle::call_infallible(id, LifecycleCall::View, || module.view()) {
            Ok(view) => view,
            Err(e) => {
                tracing::warn!(module_id = %id, "View unavailable: {}", e);
                None
            }
        };

        self.registry.insert_extension(
            id,
            ExtensionSlot {
                module: Mutex::new(module),
                host_api,
                guard: guard.clone(),
            },
        );
        report.active.push(id.to_string());
        tracing::info!(module_id = %id, version = %found.info.version, "Extension module active");

        self.services.view_host.module_activated(id);
        self.defer(ModuleActivated { id: id.to_string() });

        if let Some(view) = view {
            self.services
                .view_host
                .view_ready(id, view.with_guard(guard.clone()));
            self.defer(ModuleViewReady { id: id.to_string() });
        }
    }

    fn record_failure(&self, id: &str, error: HostError, report: &mut LoadReport) {
        let (stage, reason) = match &error {
            HostError::LifecycleFailed { stage, reason, .. } => (*stage, reason.clone()),
            other => ("load", other.to_string()),
        };
        tracing::error!(module_id = %id, stage, "Module failed: {}", reason);

        self.registry.fail(id, &reason);
        report.failures.push(ModuleFailure {
            id: id.to_string(),
            stage: stage.to_string(),
            error: reason.clone(),
        });
        self.defer(ModuleFailed {
            id: id.to_string(),
            stage,
            error: reason,
        });
    }

    // ========================================================================
    // Unload and teardown
    // ========================================================================

    /// Deactivate and dispose one module. Its descriptor remains, with
    /// `is_loaded == false`.
    ///
    /// The module's code stays mapped until the whole generation is
    /// released by the next load or by shutdown.
    pub fn unload(&self, id: &str) -> Result<()> {
        self.exclusive(|| self.unload_locked(id))
    }

    fn unload_locked(&self, id: &str) -> Result<()> {
        let mut errors = Vec::new();

        if let Some(slot) = self.registry.take_extension(id) {
            {
                let mut module = slot.module.lock();
                let active = self
                    .registry
                    .descriptor(id)
                    .is_some_and(|d| d.stage == LifecycleStage::Active);
                if active {
                    let result =
                        lifecycle::call(id, LifecycleCall::Deactivate, || module.deactivate());
                    if let Err(e) = result {
                        tracing::warn!(module_id = %id, "{}", e);
                        errors.push(e.to_string());
                    }
                    self.registry
                        .advance(id, LifecycleStage::Deactivated, "deactivated");
                }
                self.services.view_host.module_deactivated(id);

                if let Err(e) = lifecycle::call(id, LifecycleCall::Dispose, || module.dispose()) {
                    tracing::warn!(module_id = %id, "{}", e);
                    errors.push(e.to_string());
                }
                self.registry.advance(id, LifecycleStage::Disposed, "disposed");
            }
            // Instance first, then its Host API, then the guard.
            drop(slot);
        } else if let Some(slot) = self.registry.take_dependency(id) {
            self.registry
                .advance(id, LifecycleStage::Deactivated, "deactivated");
            if let Err(e) = lifecycle::call(id, LifecycleCall::Dispose, || slot.module.dispose()) {
                tracing::warn!(module_id = %id, "{}", e);
                errors.push(e.to_string());
            }
            self.registry.advance(id, LifecycleStage::Disposed, "disposed");
            drop(slot);
        } else {
            self.registry.require(id)?;
            return Err(HostError::invalid_state(id, "module is not loaded"));
        }

        self.registry.update(id, |d| {
            d.mark_unloaded();
            if !errors.is_empty() {
                d.error = Some(errors.join("; "));
            }
        });
        tracing::info!(module_id = %id, "Module unloaded");
        self.defer(ModuleUnloaded { id: id.to_string() });
        Ok(())
    }

    /// Unload every live module in reverse load order and release the
    /// generation.
    fn teardown_locked(&self) -> Option<ReclamationOutcome> {
        for id in self.registry.loaded_ids().iter().rev() {
            if let Err(e) = self.unload_locked(id) {
                tracing::warn!(module_id = %id, "Unload during teardown failed: {}", e);
            }
        }

        let handle = self.generation.lock().take()?;
        Some(self.release_generation(handle))
    }

    fn release_generation(&self, handle: GenerationHandle) -> ReclamationOutcome {
        let generation = handle.id();
        match handle.release(self.config.reclaim_grace(), self.config.reclaim_retries) {
            Ok(reclaimed) => {
                tracing::info!(generation = reclaimed.generation, "Generation reclaimed");
                self.defer(GenerationReclaimed {
                    generation: reclaimed.generation,
                });
                ReclamationOutcome::Reclaimed { generation }
            }
            Err(still) => {
                tracing::warn!(
                    generation,
                    strong_count = still.strong_count,
                    "Generation still referenced after unload; a handler, shared value or \
                     view handle outlived its module"
                );
                let outcome = ReclamationOutcome::StillReferenced {
                    generation,
                    strong_count: still.strong_count,
                };
                self.pending.lock().push(still.pending);
                outcome
            }
        }
    }

    /// Collect retired generations and forget pending ones that have since
    /// been dropped. Returns the ids newly reclaimed.
    pub fn sweep_pending(&self) -> Vec<u64> {
        self.exclusive(|| self.sweep_pending_locked())
    }

    fn sweep_pending_locked(&self) -> Vec<u64> {
        self.loader.retired().collect();

        let mut reclaimed = Vec::new();
        self.pending.lock().retain(|pending| {
            if pending.is_reclaimed() {
                reclaimed.push(pending.id());
                false
            } else {
                true
            }
        });

        for generation in &reclaimed {
            tracing::info!(generation, "Pending generation reclaimed");
            self.defer(GenerationReclaimed {
                generation: *generation,
            });
        }
        reclaimed
    }

    // ========================================================================
    // File operations
    // ========================================================================

    /// Delete the file backing an unloaded module and forget every
    /// descriptor it provided.
    ///
    /// Removal is retried after a collection pass and a grace period, then
    /// once more with the read-only flag cleared.
    pub fn delete_physically(&self, id: &str) -> Result<()> {
        self.exclusive(|| self.delete_locked(id))
    }

    fn delete_locked(&self, id: &str) -> Result<()> {
        let descriptor = self.registry.require(id)?;
        if descriptor.is_loaded {
            return Err(HostError::invalid_state(
                id,
                "unload the module before deleting it",
            ));
        }
        let still_loaded = self.registry.loaded_from(&descriptor.path);
        if !still_loaded.is_empty() {
            return Err(HostError::invalid_state(
                id,
                format!(
                    "{} also provides loaded module(s): {}",
                    descriptor.path.display(),
                    still_loaded.join(", ")
                ),
            ));
        }

        self.remove_file(&descriptor.path)?;
        let removed = self.registry.remove_descriptors_for(&descriptor.path);
        tracing::info!(
            path = %descriptor.path.display(),
            modules = ?removed,
            "Module file deleted"
        );
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        let attempt = || match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        };

        let Err(first) = attempt() else {
            return Ok(());
        };
        tracing::warn!(
            path = %path.display(),
            "Delete failed, collecting and retrying: {}",
            first
        );
        self.sweep_pending_locked();
        std::thread::sleep(self.config.reclaim_grace());

        let Err(second) = attempt() else {
            return Ok(());
        };
        tracing::warn!(path = %path.display(), "Delete failed again, forcing: {}", second);
        if let Ok(metadata) = std::fs::metadata(path) {
            let mut permissions = metadata.permissions();
            permissions.set_readonly(false);
            let _ = std::fs::set_permissions(path, permissions);
        }

        attempt().map_err(|e| {
            tracing::error!(path = %path.display(), "Forced delete failed: {}", e);
            HostError::ReclamationFailure {
                path: path.to_path_buf(),
            }
        })
    }

    /// Copy the file backing `id` to `destination`. A directory destination
    /// keeps the file name. Returns the path written.
    pub fn export_copy(&self, id: &str, destination: impl AsRef<Path>) -> Result<PathBuf> {
        let descriptor = self.registry.require(id)?;
        let destination = destination.as_ref();
        let target = if destination.is_dir() {
            let file_name = descriptor
                .path
                .file_name()
                .ok_or_else(|| HostError::invalid_state(id, "module path has no file name"))?;
            destination.join(file_name)
        } else {
            destination.to_path_buf()
        };

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(&descriptor.path, &target)?;
        tracing::info!(module_id = %id, target = %target.display(), "Module exported");
        Ok(target)
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Unload everything, release the generation and clear host-wide
    /// services. Idempotent.
    pub fn shutdown(&self) -> Option<ReclamationOutcome> {
        let outcome = self.exclusive(|| {
            if self.shut_down.swap(true, Ordering::SeqCst) {
                return None;
            }
            Some(self.teardown_locked())
        })?;

        // Subscribers have now heard about the teardown; anything they
        // loaded in response goes down with the rest.
        let _op = self.operation.lock();
        let late = self.teardown_locked();
        // Stray handlers and shared values are the usual reason a generation
        // stays referenced; dropping them here lets the sweep finish it.
        self.services.event_bus.clear();
        self.services.shared_data.clear();
        self.sweep_pending_locked();
        self.outbox.lock().clear();

        let shadow_root = self.loader.shadow_root();
        if shadow_root.exists() {
            if let Err(e) = std::fs::remove_dir(shadow_root) {
                tracing::debug!(path = %shadow_root.display(), "Shadow root kept: {}", e);
            }
        }
        tracing::info!("Module host shut down");
        outcome.or(late)
    }

    // ========================================================================
    // Host events
    // ========================================================================

    /// Run `f` under the operation lock, then publish the events it raised.
    fn exclusive<R>(&self, f: impl FnOnce() -> R) -> R {
        let result = {
            let _op = self.operation.lock();
            f()
        };
        self.flush_events();
        result
    }

    fn defer<T: Any + Send>(&self, event: T) {
        self.outbox.lock().push(Box::new(move |bus: &EventBus| {
            bus.publish(event);
        }));
    }

    fn flush_events(&self) {
        let queued = std::mem::take(&mut *self.outbox.lock());
        let bus: &EventBus = &self.services.event_bus;
        for publish in queued {
            publish(bus);
        }
    }
}

impl Drop for ModuleHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ModuleHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleHost")
            .field("module_dir", &self.config.module_dir)
            .field("generation", &self.current_generation())
            .field("registry", &self.registry)
            .finish()
    }
}
