//! Host API facade bound to a single module.
//!
//! A `HostApi` can only be created with the identity of the module that owns
//! it. Everything a module needs from the host goes through it: logging,
//! file helpers, window requests, dependency lookup, config persistence and
//! the shared services.

use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ModuleError, ModuleResult};
use crate::event_bus::{EventBus, EventHandler};
use crate::module::DependencyRef;
use crate::performance::PerformanceMonitor;
use crate::shared_data::SharedDataStore;
use crate::types::{GenerationGuard, ViewHandle};

/// File name of the per-module config document.
pub const CONFIG_FILE_NAME: &str = "config.json";

// ============================================================================
// Collaborator seams
// ============================================================================

/// Log severities available to modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// One log line emitted by a module.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub module_id: String,
    pub module_name: String,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Destination of every module log call.
pub trait LogSink: Send + Sync {
    fn emit(&self, record: &LogRecord);
}

/// Opaque identifier of a window created by the view collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowId(pub u64);

/// A request to open a window, handled by the view collaborator.
#[derive(Debug, Clone)]
pub struct WindowRequest {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
    pub view: Option<ViewHandle>,
}

impl WindowRequest {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            width: 640,
            height: 480,
            resizable: true,
            view: None,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_view(mut self, view: ViewHandle) -> Self {
        self.view = Some(view);
        self
    }

    pub fn fixed_size(mut self) -> Self {
        self.resizable = false;
        self
    }
}

/// The presentation layer, as seen from the host.
///
/// The host reports activation and view readiness; modules request windows
/// through their Host API. Implementations that keep a `ViewHandle` must
/// drop it on `module_deactivated`, or the module's generation stays alive.
pub trait ViewHost: Send + Sync {
    fn create_window(&self, module_id: &str, request: WindowRequest) -> ModuleResult<WindowId>;

    fn module_activated(&self, _module_id: &str) {}

    fn view_ready(&self, _module_id: &str, _view: ViewHandle) {}

    fn module_deactivated(&self, _module_id: &str) {}
}

/// Dependency lookup offered by the host's resolver.
pub trait DependencyLookup: Send + Sync {
    fn has_dependency(&self, id: &str) -> bool;

    fn get_dependency(&self, id: &str) -> Option<DependencyRef>;
}

// ============================================================================
// Host API
// ============================================================================

/// Identity of the module a Host API is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleIdentity {
    pub id: String,
    pub name: String,
    /// Backing file the module was loaded from.
    pub path: PathBuf,
}

/// Host-wide services shared by every bound Host API.
#[derive(Clone)]
pub struct HostServices {
    pub event_bus: Arc<EventBus>,
    pub shared_data: Arc<SharedDataStore>,
    pub performance: Arc<PerformanceMonitor>,
    pub log_sink: Arc<dyn LogSink>,
    pub view_host: Arc<dyn ViewHost>,
    /// Weak so a module holding its Host API never keeps the resolver alive.
    pub dependencies: Weak<dyn DependencyLookup>,
    /// Root of the per-module config directories.
    pub config_root: PathBuf,
}

struct NoDependencies;

impl DependencyLookup for NoDependencies {
    fn has_dependency(&self, _id: &str) -> bool {
        false
    }

    fn get_dependency(&self, _id: &str) -> Option<DependencyRef> {
        None
    }
}

impl HostServices {
    pub fn new(
        log_sink: Arc<dyn LogSink>,
        view_host: Arc<dyn ViewHost>,
        config_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            event_bus: Arc::new(EventBus::new()),
            shared_data: Arc::new(SharedDataStore::new()),
            performance: Arc::new(PerformanceMonitor::new()),
            log_sink,
            view_host,
            dependencies: Weak::<NoDependencies>::new(),
            config_root: config_root.into(),
        }
    }

    pub fn with_dependencies(mut self, lookup: Weak<dyn DependencyLookup>) -> Self {
        self.dependencies = lookup;
        self
    }

    pub fn with_performance(mut self, performance: Arc<PerformanceMonitor>) -> Self {
        self.performance = performance;
        self
    }
}

impl fmt::Debug for HostServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostServices")
            .field("config_root", &self.config_root)
            .finish_non_exhaustive()
    }
}

/// Capability object bound 1:1 to a module instance.
pub struct HostApi {
    identity: ModuleIdentity,
    services: HostServices,
    guard: Option<GenerationGuard>,
}

impl HostApi {
    /// Bind a Host API to a module identity.
    ///
    /// `guard` is the generation the module was loaded from; handlers and
    /// shared values registered through this API keep it alive.
    pub fn bind(
        identity: ModuleIdentity,
        services: HostServices,
        guard: Option<GenerationGuard>,
    ) -> ModuleResult<Arc<Self>> {
        if identity.id.trim().is_empty() {
            return Err(ModuleError::InvalidMetadata(
                "host API requires a module id".into(),
            ));
        }
        Ok(Arc::new(Self {
            identity,
            services,
            guard,
        }))
    }

    pub fn id(&self) -> &str {
        &self.identity.id
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn path(&self) -> &Path {
        &self.identity.path
    }

    pub fn identity(&self) -> &ModuleIdentity {
        &self.identity
    }

    // ---- Logging -----------------------------------------------------------

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let record = LogRecord {
            module_id: self.identity.id.clone(),
            module_name: self.identity.name.clone(),
            level,
            message: message.into(),
            timestamp: Utc::now(),
        };
        self.services.log_sink.emit(&record);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    // ---- Files -------------------------------------------------------------

    /// The module's own directory under the config root.
    pub fn data_dir(&self) -> PathBuf {
        self.services.config_root.join(&self.identity.id)
    }

    /// Absolute paths pass through; relative ones resolve under
    /// [`data_dir`](Self::data_dir).
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir().join(path)
        }
    }

    pub async fn read_file(&self, path: impl AsRef<Path>) -> ModuleResult<String> {
        Ok(tokio::fs::read_to_string(self.resolve_path(path)).await?)
    }

    pub async fn read_bytes(&self, path: impl AsRef<Path>) -> ModuleResult<Vec<u8>> {
        Ok(tokio::fs::read(self.resolve_path(path)).await?)
    }

    /// Write (create or truncate) a file, creating parent directories.
    pub async fn write_file(
        &self,
        path: impl AsRef<Path>,
        contents: impl AsRef<[u8]>,
    ) -> ModuleResult<()> {
        let path = self.resolve_path(path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await?;
        Ok(())
    }

    /// Create a new file; fails if it already exists.
    pub async fn create_file(
        &self,
        path: impl AsRef<Path>,
        contents: impl AsRef<[u8]>,
    ) -> ModuleResult<()> {
        use tokio::io::AsyncWriteExt;

        let path = self.resolve_path(path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(contents.as_ref()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Delete a file. Returns `false` if it did not exist.
    pub async fn delete_file(&self, path: impl AsRef<Path>) -> ModuleResult<bool> {
        match tokio::fs::remove_file(self.resolve_path(path)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn file_exists(&self, path: impl AsRef<Path>) -> bool {
        tokio::fs::metadata(self.resolve_path(path))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Files directly inside `dir` whose name matches `pattern`
    /// (`*` and `?` wildcards), sorted by path.
    pub async fn search_files(
        &self,
        dir: impl AsRef<Path>,
        pattern: &str,
    ) -> ModuleResult<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(self.resolve_path(dir)).await?;
        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if wildcard_match(pattern, &entry.file_name().to_string_lossy()) {
                found.push(entry.path());
            }
        }
        found.sort();
        Ok(found)
    }

    pub async fn create_directory(&self, path: impl AsRef<Path>) -> ModuleResult<PathBuf> {
        let path = self.resolve_path(path);
        tokio::fs::create_dir_all(&path).await?;
        Ok(path)
    }

    pub async fn directory_exists(&self, path: impl AsRef<Path>) -> bool {
        tokio::fs::metadata(self.resolve_path(path))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    // ---- Windows -----------------------------------------------------------

    /// Ask the view collaborator for a window.
    pub fn create_window(&self, mut request: WindowRequest) -> ModuleResult<WindowId> {
        if let Some(guard) = &self.guard {
            request.view = request.view.map(|view| {
                if view.is_guarded() {
                    view
                } else {
                    view.with_guard(guard.clone())
                }
            });
        }
        self.services
            .view_host
            .create_window(&self.identity.id, request)
    }

    // ---- Dependencies ------------------------------------------------------

    pub fn has_dependency(&self, id: &str) -> bool {
        self.services
            .dependencies
            .upgrade()
            .is_some_and(|lookup| lookup.has_dependency(id))
    }

    /// Reference to a loaded dependency module. `None` is not an error: the
    /// caller should degrade rather than fail.
    pub fn get_dependency(&self, id: &str) -> Option<DependencyRef> {
        self.services
            .dependencies
            .upgrade()
            .and_then(|lookup| lookup.get_dependency(id))
    }

    // ---- Config ------------------------------------------------------------

    pub fn config_path(&self) -> PathBuf {
        self.data_dir().join(CONFIG_FILE_NAME)
    }

    /// Load the module config, distinguishing absence from corruption.
    pub fn try_load_config<T: DeserializeOwned>(&self) -> ModuleResult<Option<T>> {
        let path = self.config_path();
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| ModuleError::ConfigCorrupt {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }

    /// Load the module config, falling back to `default` when it is absent
    /// or unreadable. Corruption is logged at warn level.
    pub fn load_config<T: DeserializeOwned>(&self, default: T) -> T {
        match self.try_load_config() {
            Ok(Some(config)) => config,
            Ok(None) => default,
            Err(e) => {
                self.warn(format!("Using default config: {}", e));
                default
            }
        }
    }

    /// Persist the module config as pretty-printed JSON.
    pub fn save_config<T: Serialize>(&self, config: &T) -> ModuleResult<()> {
        let path = self.config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(config)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    // ---- Shared services ---------------------------------------------------

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.services.event_bus
    }

    pub fn shared_data(&self) -> &Arc<SharedDataStore> {
        &self.services.shared_data
    }

    pub fn performance(&self) -> &Arc<PerformanceMonitor> {
        &self.services.performance
    }

    /// Subscribe to events of type `T` on behalf of this module.
    ///
    /// The handler pins the module's generation until it is unsubscribed.
    pub fn subscribe<T, F>(&self, f: F) -> EventHandler<T>
    where
        T: Any,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let pinned = Pinned {
            inner: f,
            _guard: self.guard.clone(),
        };
        let handler: EventHandler<T> = Arc::new(move |event: &T| pinned.call(event));
        self.services.event_bus.subscribe(handler.clone());
        handler
    }

    pub fn unsubscribe<T: Any>(&self, handler: &EventHandler<T>) -> bool {
        self.services.event_bus.unsubscribe(handler)
    }

    pub fn publish<T: Any>(&self, event: T) -> usize {
        self.services.event_bus.publish(event)
    }

    /// Store a shared value on behalf of this module.
    pub fn share<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.services
            .shared_data
            .set_with_guard(key, value, self.guard.clone());
    }

    pub fn start_timer(&self, operation: &str) {
        self.services
            .performance
            .start_timer(&self.identity.id, operation);
    }

    pub fn stop_timer(&self, operation: &str) -> Option<Duration> {
        self.services
            .performance
            .stop_timer(&self.identity.id, operation)
    }
}

impl fmt::Debug for HostApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostApi")
            .field("identity", &self.identity)
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}

/// A module closure together with the generation it lives in.
struct Pinned<F> {
    inner: F,
    _guard: Option<GenerationGuard>,
}

impl<F> Pinned<F> {
    fn call<T>(&self, event: &T)
    where
        F: Fn(&T),
    {
        (self.inner)(event)
    }
}

fn wildcard_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    let (mut pi, mut ni) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ni < n.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ni));
            pi += 1;
        } else if let Some((sp, sn)) = star {
            pi = sp + 1;
            ni = sn + 1;
            star = Some((sp, sn + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<LogRecord>>,
    }

    impl LogSink for RecordingSink {
        fn emit(&self, record: &LogRecord) {
            self.records.lock().push(record.clone());
        }
    }

    #[derive(Default)]
    struct RecordingViews {
        requests: Mutex<Vec<(String, WindowRequest)>>,
    }

    impl ViewHost for RecordingViews {
        fn create_window(&self, module_id: &str, request: WindowRequest) -> ModuleResult<WindowId> {
            let mut requests = self.requests.lock();
            requests.push((module_id.to_string(), request));
            Ok(WindowId(requests.len() as u64))
        }
    }

    struct Fixture {
        dir: TempDir,
        sink: Arc<RecordingSink>,
        views: Arc<RecordingViews>,
        services: HostServices,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let views = Arc::new(RecordingViews::default());
        let services = HostServices::new(sink.clone(), views.clone(), dir.path());
        Fixture {
            dir,
            sink,
            views,
            services,
        }
    }

    fn bind(fx: &Fixture, guard: Option<GenerationGuard>) -> Arc<HostApi> {
        HostApi::bind(
            ModuleIdentity {
                id: "notes".into(),
                name: "Notes".into(),
                path: fx.dir.path().join("notes.module"),
            },
            fx.services.clone(),
            guard,
        )
        .unwrap()
    }

    #[test]
    fn test_bind_requires_identity() {
        let fx = fixture();
        let result = HostApi::bind(
            ModuleIdentity {
                id: " ".into(),
                name: "Nobody".into(),
                path: PathBuf::new(),
            },
            fx.services.clone(),
            None,
        );
        assert!(matches!(result, Err(ModuleError::InvalidMetadata(_))));
    }

    #[test]
    fn test_logging_funnels_through_sink() {
        let fx = fixture();
        let api = bind(&fx, None);

        api.debug("d");
        api.info("i");
        api.warn("w");
        api.error("e");

        let records = fx.sink.records.lock();
        let levels: Vec<_> = records.iter().map(|r| r.level).collect();
        assert_eq!(
            levels,
            vec![LogLevel::Debug, LogLevel::Info, LogLevel::Warn, LogLevel::Error]
        );
        assert!(records.iter().all(|r| r.module_id == "notes" && r.module_name == "Notes"));
    }

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct NotesConfig {
        font_size: u32,
        wrap: bool,
    }

    #[test]
    fn test_config_missing_uses_default() {
        let fx = fixture();
        let api = bind(&fx, None);

        let config = api.load_config(NotesConfig {
            font_size: 12,
            wrap: true,
        });
        assert_eq!(config.font_size, 12);
        assert!(fx.sink.records.lock().is_empty());
    }

    #[test]
    fn test_config_roundtrip() {
        let fx = fixture();
        let api = bind(&fx, None);

        let saved = NotesConfig {
            font_size: 14,
            wrap: false,
        };
        api.save_config(&saved).unwrap();

        assert!(fx.dir.path().join("notes").join(CONFIG_FILE_NAME).exists());
        assert_eq!(api.load_config(NotesConfig::default()), saved);
    }

    #[test]
    fn test_corrupt_config_falls_back_with_warning() {
        let fx = fixture();
        let api = bind(&fx, None);
        std::fs::create_dir_all(api.data_dir()).unwrap();
        std::fs::write(api.config_path(), "{ not json").unwrap();

        assert!(matches!(
            api.try_load_config::<NotesConfig>(),
            Err(ModuleError::ConfigCorrupt { .. })
        ));
        let config = api.load_config(NotesConfig {
            font_size: 9,
            wrap: true,
        });
        assert_eq!(config.font_size, 9);

        let records = fx.sink.records.lock();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, LogLevel::Warn);
    }

    #[tokio::test]
    async fn test_file_helpers() {
        let fx = fixture();
        let api = bind(&fx, None);

        api.write_file("drafts/a.txt", "alpha").await.unwrap();
        api.create_file("drafts/b.txt", "beta").await.unwrap();
        api.create_file("drafts/notes.md", "# notes").await.unwrap();

        assert!(api.create_file("drafts/b.txt", "again").await.is_err());
        assert_eq!(api.read_file("drafts/a.txt").await.unwrap(), "alpha");
        assert_eq!(api.read_bytes("drafts/b.txt").await.unwrap(), b"beta");
        assert!(api.file_exists("drafts/a.txt").await);
        assert!(api.directory_exists("drafts").await);
        assert!(!api.file_exists("drafts").await);

        let found = api.search_files("drafts", "*.txt").await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("a.txt"));

        assert!(api.delete_file("drafts/a.txt").await.unwrap());
        assert!(!api.delete_file("drafts/a.txt").await.unwrap());
        assert!(!api.file_exists("drafts/a.txt").await);

        let created = api.create_directory("archive/2024").await.unwrap();
        assert!(created.starts_with(fx.dir.path().join("notes")));
        assert!(api.directory_exists("archive/2024").await);
    }

    #[test]
    fn test_absolute_paths_pass_through() {
        let fx = fixture();
        let api = bind(&fx, None);
        let abs = fx.dir.path().join("elsewhere.txt");
        assert_eq!(api.resolve_path(&abs), abs);
    }

    #[test]
    fn test_create_window_delegates_and_guards_view() {
        let fx = fixture();
        let api = bind(&fx, Some(Arc::new(())));

        let id = api
            .create_window(
                WindowRequest::new("Notes")
                    .with_size(300, 200)
                    .with_view(ViewHandle::new("panel")),
            )
            .unwrap();
        assert_eq!(id, WindowId(1));

        let requests = fx.views.requests.lock();
        let (module_id, request) = &requests[0];
        assert_eq!(module_id, "notes");
        assert_eq!(request.width, 300);
        assert!(request.view.as_ref().is_some_and(|v| v.is_guarded()));
    }

    #[test]
    fn test_dependency_lookup_without_resolver() {
        let fx = fixture();
        let api = bind(&fx, None);
        assert!(!api.has_dependency("storage"));
        assert!(api.get_dependency("storage").is_none());
    }

    #[test]
    fn test_subscription_and_share_pin_generation() {
        #[derive(Debug)]
        struct Ping;

        let fx = fixture();
        let generation: GenerationGuard = Arc::new(());
        let weak = Arc::downgrade(&generation);
        let api = bind(&fx, Some(generation));

        let handler = api.subscribe(|_: &Ping| {});
        api.share("notes.count", 3usize);
        drop(api);

        assert!(weak.upgrade().is_some());
        assert_eq!(fx.services.event_bus.publish(Ping), 1);

        fx.services.event_bus.unsubscribe(&handler);
        drop(handler);
        assert!(weak.upgrade().is_some());

        fx.services.shared_data.remove("notes.count");
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_timers_use_module_id() {
        let fx = fixture();
        let api = bind(&fx, None);

        api.start_timer("render");
        assert!(api.stop_timer("render").is_some());
        assert_eq!(fx.services.performance.get_stats("notes").operation_count, 1);
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("*.txt", "a.txt"));
        assert!(wildcard_match("note?.md", "note1.md"));
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("a*b*c", "aXXbYYc"));
        assert!(!wildcard_match("*.txt", "a.md"));
        assert!(!wildcard_match("note?.md", "note.md"));
    }
}
