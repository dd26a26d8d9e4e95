//! Module manifest: the factory table a loadable unit exposes to the host.
//!
//! A native module library exports two symbols with fixed signatures,
//! normally generated by [`declare_modules!`](crate::declare_modules):
//!
//! - `modhost_abi_version() -> u32`
//! - `modhost_module_manifest() -> *mut ModuleManifest`
//!
//! The host checks the ABI version first and only then asks for the
//! manifest, taking ownership of the returned box.

use std::fmt;
use std::sync::Arc;

use crate::module::{DependencyModule, ExtensionModule};
use crate::types::ModuleKind;

/// ABI version of the manifest entry points. Bumped on any change to the
/// module traits or the manifest layout.
pub const MODHOST_ABI_VERSION: u32 = 1;

/// Version of the SDK a manifest was built against.
pub const MODHOST_SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Symbol of the ABI version function (nul-terminated).
pub const ABI_VERSION_SYMBOL: &[u8] = b"modhost_abi_version\0";

/// Symbol of the manifest function (nul-terminated).
pub const MANIFEST_SYMBOL: &[u8] = b"modhost_module_manifest\0";

pub type AbiVersionFn = unsafe extern "C" fn() -> u32;

pub type ManifestFn = unsafe extern "C" fn() -> *mut ModuleManifest;

/// Creates a fresh extension instance.
pub type ExtensionFactory = fn() -> Box<dyn ExtensionModule>;

/// Creates a fresh dependency instance.
pub type DependencyFactory = fn() -> Arc<dyn DependencyModule>;

/// One constructible module type.
#[derive(Clone, Copy)]
pub enum ModuleFactory {
    Extension(ExtensionFactory),
    Dependency(DependencyFactory),
}

impl ModuleFactory {
    pub fn kind(&self) -> ModuleKind {
        match self {
            ModuleFactory::Extension(_) => ModuleKind::Extension,
            ModuleFactory::Dependency(_) => ModuleKind::Dependency,
        }
    }
}

impl fmt::Debug for ModuleFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleFactory({})", self.kind())
    }
}

/// Every module type a loadable unit provides.
#[derive(Debug, Clone)]
pub struct ModuleManifest {
    abi_version: u32,
    sdk_version: &'static str,
    factories: Vec<ModuleFactory>,
}

impl ModuleManifest {
    pub fn new() -> Self {
        Self {
            abi_version: MODHOST_ABI_VERSION,
            sdk_version: MODHOST_SDK_VERSION,
            factories: Vec::new(),
        }
    }

    pub fn with_extension(mut self, factory: ExtensionFactory) -> Self {
        self.factories.push(ModuleFactory::Extension(factory));
        self
    }

    pub fn with_dependency(mut self, factory: DependencyFactory) -> Self {
        self.factories.push(ModuleFactory::Dependency(factory));
        self
    }

    pub fn abi_version(&self) -> u32 {
        self.abi_version
    }

    pub fn sdk_version(&self) -> &'static str {
        self.sdk_version
    }

    /// Factories in declaration order.
    pub fn factories(&self) -> &[ModuleFactory] {
        &self.factories
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for ModuleManifest {
    fn default() -> Self {
        Self::new()
    }
}
