//! ModHost Module SDK
//!
//! Everything that crosses the boundary between the ModHost host process and
//! a loadable module: the two capability contracts, module metadata, the
//! shared services (event bus, shared data store, performance monitor) and
//! the per-module Host API.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use modhost_sdk::prelude::*;
//!
//! pub struct Hello {
//!     host: Option<Arc<HostApi>>,
//! }
//!
//! impl Hello {
//!     pub fn new() -> Self {
//!         Self { host: None }
//!     }
//! }
//!
//! impl ExtensionModule for Hello {
//!     fn info(&self) -> ModuleInfo {
//!         ModuleInfo::new("hello", "Hello", Version::new(0, 1, 0))
//!     }
//!
//!     fn initialize(&mut self, host: Arc<HostApi>) -> ModuleResult<()> {
//!         host.info("hello from a module");
//!         self.host = Some(host);
//!         Ok(())
//!     }
//!
//!     fn activate(&mut self) -> ModuleResult<()> { Ok(()) }
//!     fn deactivate(&mut self) -> ModuleResult<()> { Ok(()) }
//!     fn dispose(&mut self) -> ModuleResult<()> {
//!         self.host = None;
//!         Ok(())
//!     }
//! }
//!
//! declare_modules! {
//!     extension => Hello::new,
//! }
//! ```

pub mod error;
pub mod event_bus;
pub mod host_api;
#[macro_use]
pub mod macros;
pub mod manifest;
pub mod module;
pub mod performance;
pub mod shared_data;
pub mod types;

pub use error::{ModuleError, ModuleResult};
pub use event_bus::{EventBus, EventHandler};
pub use host_api::{
    DependencyLookup, HostApi, HostServices, LogLevel, LogRecord, LogSink, ModuleIdentity,
    ViewHost, WindowId, WindowRequest, CONFIG_FILE_NAME,
};
pub use manifest::{
    AbiVersionFn, DependencyFactory, ExtensionFactory, ManifestFn, ModuleFactory, ModuleManifest,
    ABI_VERSION_SYMBOL, MANIFEST_SYMBOL, MODHOST_ABI_VERSION, MODHOST_SDK_VERSION,
};
pub use module::{Capability, CapabilitySet, DependencyModule, DependencyRef, ExtensionModule};
pub use performance::{MemorySampler, PerformanceMonitor, PerformanceStats, ProcessMemorySampler};
pub use shared_data::SharedDataStore;
pub use types::{DependencySpec, GenerationGuard, ModuleInfo, ModuleKind, ViewHandle};

/// Prelude module with common imports
pub mod prelude {
    pub use crate::declare_modules;
    pub use crate::error::{ModuleError, ModuleResult};
    pub use crate::event_bus::EventHandler;
    pub use crate::host_api::{HostApi, WindowRequest};
    pub use crate::module::{CapabilitySet, DependencyModule, DependencyRef, ExtensionModule};
    pub use crate::types::{DependencySpec, ModuleInfo, ModuleKind, ViewHandle};
    pub use semver::Version;
    pub use std::sync::Arc;
}
