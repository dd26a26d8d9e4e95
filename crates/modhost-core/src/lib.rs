//! ModHost core runtime.
//!
//! Loads modules from a directory into revocable generations, drives their
//! lifecycle, resolves dependencies between them and hot-reloads them when
//! the directory changes.
//!
//! ```no_run
//! use modhost_core::{HostConfig, ModuleHost};
//!
//! # fn main() -> modhost_core::Result<()> {
//! let host = ModuleHost::builder(HostConfig::default()).build()?;
//! let report = host.load_all()?;
//! println!("{} module(s) active", report.active.len());
//! host.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod generation;
pub mod host;
pub mod lifecycle;
pub mod loader;
pub mod logging;
pub mod registry;
pub mod report;
pub mod view;
pub mod watcher;

pub use config::{env_vars, HostConfig, BUILTIN_MARKER_EXTENSION};
pub use descriptor::{LifecycleStage, ModuleDescriptor, ModuleState, StateTransition};
pub use error::{HostError, Result};
pub use generation::{GenerationHandle, PendingGeneration, Reclaimed, StillReferenced};
pub use host::{ModuleHost, ModuleHostBuilder};
pub use loader::{BuiltinModuleTable, ManifestProvider, ModuleLoader, NativeLibraryOpener};
pub use logging::TracingLogSink;
pub use registry::ModuleRegistry;
pub use report::{
    DuplicateModule, LoadReport, ModuleFailure, ReclamationOutcome, ScanReport, SkippedFile,
    UnresolvedDependency,
};
pub use view::HeadlessViewHost;
pub use watcher::ModuleWatcher;

/// The module SDK, re-exported for hosts that embed modules directly.
pub use modhost_sdk as sdk;
