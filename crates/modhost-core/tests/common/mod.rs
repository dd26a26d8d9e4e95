//! Shared fixtures: compiled-in test modules enabled by marker files.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use modhost_core::sdk::prelude::*;
use modhost_core::sdk::{EventHandler, ModuleManifest};
use modhost_core::{BuiltinModuleTable, HostConfig, ModuleHost};
use parking_lot::Mutex;
use tempfile::TempDir;

/// Published by test modules from every lifecycle method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Called {
    pub id: &'static str,
    pub stage: &'static str,
}

fn report(host: &Option<Arc<HostApi>>, id: &'static str, stage: &'static str) {
    if let Some(host) = host {
        host.publish(Called { id, stage });
    }
}

// ============================================================================
// Dependency: key/value store
// ============================================================================

pub trait KeyValue: Send + Sync {
    fn set(&self, key: &str, value: &str);
    fn get(&self, key: &str) -> Option<String>;
}

#[derive(Default)]
struct MemoryStore(Mutex<HashMap<String, String>>);

impl KeyValue for MemoryStore {
    fn set(&self, key: &str, value: &str) {
        self.0.lock().insert(key.to_string(), value.to_string());
    }

    fn get(&self, key: &str) -> Option<String> {
        self.0.lock().get(key).cloned()
    }
}

pub struct Store {
    entries: Arc<MemoryStore>,
}

impl DependencyModule for Store {
    fn info(&self) -> ModuleInfo {
        ModuleInfo::new("test.store", "Store", Version::new(1, 2, 0))
    }

    fn initialize(&self) -> ModuleResult<()> {
        Ok(())
    }

    fn dispose(&self) -> ModuleResult<()> {
        Ok(())
    }

    fn provide_capabilities(&self, capabilities: &mut CapabilitySet) {
        capabilities.provide::<dyn KeyValue>(self.entries.clone());
    }
}

fn store() -> Arc<dyn DependencyModule> {
    Arc::new(Store {
        entries: Arc::new(MemoryStore::default()),
    })
}

// ============================================================================
// Extensions
// ============================================================================

/// Writes through the store capability during initialize.
#[derive(Default)]
pub struct Notes {
    host: Option<Arc<HostApi>>,
    store: Option<DependencyRef>,
}

impl ExtensionModule for Notes {
    fn info(&self) -> ModuleInfo {
        ModuleInfo::new("test.notes", "Notes", Version::new(0, 3, 0))
    }

    fn dependencies(&self) -> Vec<DependencySpec> {
        vec![DependencySpec::required("test.store")]
    }

    fn initialize(&mut self, host: Arc<HostApi>) -> ModuleResult<()> {
        let store = host
            .get_dependency("test.store")
            .ok_or_else(|| ModuleError::MissingDependency("test.store".into()))?;
        let kv = store
            .capability::<dyn KeyValue>()
            .ok_or_else(|| ModuleError::MissingDependency("key/value capability".into()))?;
        kv.set("notes", "ready");
        self.store = Some(store);
        self.host = Some(host);
        report(&self.host, "test.notes", "initialize");
        Ok(())
    }

    fn activate(&mut self) -> ModuleResult<()> {
        report(&self.host, "test.notes", "activate");
        Ok(())
    }

    fn deactivate(&mut self) -> ModuleResult<()> {
        report(&self.host, "test.notes", "deactivate");
        Ok(())
    }

    fn dispose(&mut self) -> ModuleResult<()> {
        report(&self.host, "test.notes", "dispose");
        self.store = None;
        Ok(())
    }
}

/// No dependencies; offers a view.
#[derive(Default)]
pub struct Clock {
    host: Option<Arc<HostApi>>,
}

impl ExtensionModule for Clock {
    fn info(&self) -> ModuleInfo {
        ModuleInfo::new("test.clock", "Clock", Version::new(2, 0, 1))
    }

    fn initialize(&mut self, host: Arc<HostApi>) -> ModuleResult<()> {
        self.host = Some(host);
        report(&self.host, "test.clock", "initialize");
        Ok(())
    }

    fn activate(&mut self) -> ModuleResult<()> {
        report(&self.host, "test.clock", "activate");
        Ok(())
    }

    fn deactivate(&mut self) -> ModuleResult<()> {
        report(&self.host, "test.clock", "deactivate");
        Ok(())
    }

    fn view(&self) -> Option<ViewHandle> {
        Some(ViewHandle::new(String::from("12:00")))
    }

    fn dispose(&mut self) -> ModuleResult<()> {
        report(&self.host, "test.clock", "dispose");
        Ok(())
    }
}

/// Records whether its optional dependency was present.
#[derive(Default)]
pub struct Orphan {
    host: Option<Arc<HostApi>>,
}

/// Published by [`Orphan`] during initialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanLookup {
    pub has: bool,
    pub found: bool,
}

impl ExtensionModule for Orphan {
    fn info(&self) -> ModuleInfo {
        ModuleInfo::new("test.orphan", "Orphan", Version::new(0, 1, 0))
    }

    fn dependencies(&self) -> Vec<DependencySpec> {
        vec![DependencySpec::optional("test.missing")]
    }

    fn initialize(&mut self, host: Arc<HostApi>) -> ModuleResult<()> {
        host.publish(OrphanLookup {
            has: host.has_dependency("test.missing"),
            found: host.get_dependency("test.missing").is_some(),
        });
        self.host = Some(host);
        Ok(())
    }

    fn activate(&mut self) -> ModuleResult<()> {
        Ok(())
    }

    fn deactivate(&mut self) -> ModuleResult<()> {
        Ok(())
    }

    fn dispose(&mut self) -> ModuleResult<()> {
        Ok(())
    }
}

/// Panics in initialize.
pub struct Faulty;

impl ExtensionModule for Faulty {
    fn info(&self) -> ModuleInfo {
        ModuleInfo::new("test.faulty", "Faulty", Version::new(0, 0, 1))
    }

    fn initialize(&mut self, _host: Arc<HostApi>) -> ModuleResult<()> {
        panic!("faulty module refuses to start");
    }

    fn activate(&mut self) -> ModuleResult<()> {
        Ok(())
    }

    fn deactivate(&mut self) -> ModuleResult<()> {
        Ok(())
    }

    fn dispose(&mut self) -> ModuleResult<()> {
        Ok(())
    }
}

/// Event that [`Leaky`] listens for.
#[derive(Debug, Clone)]
pub struct Ping;

/// Subscribes in initialize and never unsubscribes.
#[derive(Default)]
pub struct Leaky {
    handler: Option<EventHandler<Ping>>,
}

impl ExtensionModule for Leaky {
    fn info(&self) -> ModuleInfo {
        ModuleInfo::new("test.leaky", "Leaky", Version::new(0, 1, 0))
    }

    fn initialize(&mut self, host: Arc<HostApi>) -> ModuleResult<()> {
        self.handler = Some(host.subscribe(|_: &Ping| {}));
        Ok(())
    }

    fn activate(&mut self) -> ModuleResult<()> {
        Ok(())
    }

    fn deactivate(&mut self) -> ModuleResult<()> {
        Ok(())
    }

    fn dispose(&mut self) -> ModuleResult<()> {
        Ok(())
    }
}

/// Subscribes in initialize and unsubscribes in dispose.
#[derive(Default)]
pub struct Tidy {
    host: Option<Arc<HostApi>>,
    handler: Option<EventHandler<Ping>>,
}

impl ExtensionModule for Tidy {
    fn info(&self) -> ModuleInfo {
        ModuleInfo::new("test.tidy", "Tidy", Version::new(0, 1, 0))
    }

    fn initialize(&mut self, host: Arc<HostApi>) -> ModuleResult<()> {
        self.handler = Some(host.subscribe(|_: &Ping| {}));
        self.host = Some(host);
        Ok(())
    }

    fn activate(&mut self) -> ModuleResult<()> {
        Ok(())
    }

    fn deactivate(&mut self) -> ModuleResult<()> {
        Ok(())
    }

    fn dispose(&mut self) -> ModuleResult<()> {
        if let (Some(host), Some(handler)) = (&self.host, self.handler.take()) {
            host.unsubscribe(&handler);
        }
        Ok(())
    }
}

fn notes() -> Box<dyn ExtensionModule> {
    Box::new(Notes::default())
}

fn clock() -> Box<dyn ExtensionModule> {
    Box::new(Clock::default())
}

fn orphan() -> Box<dyn ExtensionModule> {
    Box::new(Orphan::default())
}

fn faulty() -> Box<dyn ExtensionModule> {
    Box::new(Faulty)
}

fn leaky() -> Box<dyn ExtensionModule> {
    Box::new(Leaky::default())
}

fn tidy() -> Box<dyn ExtensionModule> {
    Box::new(Tidy::default())
}

// ============================================================================
// Marker stems
// ============================================================================

pub fn table() -> BuiltinModuleTable {
    BuiltinModuleTable::new()
        .register("store", || ModuleManifest::new().with_dependency(store))
        .register("notes", || ModuleManifest::new().with_extension(notes))
        .register("clock", || ModuleManifest::new().with_extension(clock))
        .register("clock_copy", || ModuleManifest::new().with_extension(clock))
        .register("orphan", || ModuleManifest::new().with_extension(orphan))
        .register("faulty", || ModuleManifest::new().with_extension(faulty))
        .register("leaky", || ModuleManifest::new().with_extension(leaky))
        .register("tidy", || ModuleManifest::new().with_extension(tidy))
        .register("bundle", || {
            ModuleManifest::new()
                .with_dependency(store)
                .with_extension(notes)
        })
}

pub struct Fixture {
    pub host: ModuleHost,
    pub dir: TempDir,
}

impl Fixture {
    pub fn new(stems: &[&str]) -> Self {
        Self::with_config(stems, |_| {})
    }

    pub fn with_config(stems: &[&str], adjust: impl FnOnce(&mut HostConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = HostConfig::with_base_dir(dir.path());
        config.reclaim_grace_ms = 5;
        config.reclaim_retries = 1;
        adjust(&mut config);

        let host = ModuleHost::builder(config)
            .with_builtin(table())
            .with_native(false)
            .build()
            .unwrap();
        for stem in stems {
            touch(host.module_dir(), stem);
        }
        Self { host, dir }
    }

    /// Split into a shareable host and the directory that must outlive it.
    pub fn into_shared(self) -> (Arc<ModuleHost>, TempDir) {
        (Arc::new(self.host), self.dir)
    }

    pub fn module_dir(&self) -> PathBuf {
        self.host.module_dir().to_path_buf()
    }

    /// Collect every `T` published on the host's bus from now on.
    pub fn record<T: Clone + Send + Sync + 'static>(&self) -> Arc<Mutex<Vec<T>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        self.host.event_bus().on(move |event: &T| sink.lock().push(event.clone()));
        seen
    }
}

pub fn touch(dir: &Path, stem: &str) -> PathBuf {
    let path = dir.join(format!("{}.module", stem));
    std::fs::write(&path, b"").unwrap();
    path
}
