//! Capability contracts implemented by loadable modules.
//!
//! A module is either an [`ExtensionModule`] (has a view and a full
//! activate/deactivate lifecycle) or a [`DependencyModule`] (service only,
//! consumed by extensions). Lifecycle methods are synchronous; the host calls
//! them on its control thread and expects them to return promptly.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::error::ModuleResult;
use crate::host_api::HostApi;
use crate::types::{DependencySpec, GenerationGuard, ModuleInfo, ModuleKind, ViewHandle};

/// Contract for modules with a UI surface.
///
/// Call order is `initialize → activate ⇄ deactivate → dispose`. The host
/// never calls `activate` on a module whose `initialize` failed.
pub trait ExtensionModule: Send + Sync {
    /// Identity and display metadata.
    fn info(&self) -> ModuleInfo;

    fn kind(&self) -> ModuleKind {
        ModuleKind::Extension
    }

    /// Dependencies this module would like resolved before `initialize`.
    fn dependencies(&self) -> Vec<DependencySpec> {
        Vec::new()
    }

    /// Receive the bound Host API. Optional dependencies should be checked
    /// here with [`HostApi::has_dependency`] and degraded around.
    fn initialize(&mut self, host: Arc<HostApi>) -> ModuleResult<()>;

    fn activate(&mut self) -> ModuleResult<()>;

    fn deactivate(&mut self) -> ModuleResult<()>;

    /// Opaque view surface, embedded by the view collaborator.
    fn view(&self) -> Option<ViewHandle> {
        None
    }

    /// Release everything the module holds. Subscriptions and timers that
    /// survive `dispose` keep the module's generation from being reclaimed.
    fn dispose(&mut self) -> ModuleResult<()>;
}

/// Contract for service-only modules.
///
/// Dependency instances are owned by the host and shared by reference, so
/// the methods take `&self`; use interior mutability for state.
pub trait DependencyModule: Send + Sync {
    fn info(&self) -> ModuleInfo;

    fn initialize(&self) -> ModuleResult<()>;

    fn dispose(&self) -> ModuleResult<()>;

    /// Register the typed capabilities consumers can request.
    ///
    /// Called once, after a successful `initialize`.
    fn provide_capabilities(&self, _capabilities: &mut CapabilitySet) {}
}

/// Typed capabilities offered by a dependency module, keyed by type.
///
/// A dependency registers `Arc<dyn SomeTrait>` values and consumers look
/// them up by the same trait object type.
#[derive(Default)]
pub struct CapabilitySet {
    entries: HashMap<TypeId, CapabilityEntry>,
}

struct CapabilityEntry {
    name: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability. A later registration of the same type replaces
    /// the earlier one.
    pub fn provide<C>(&mut self, capability: Arc<C>)
    where
        C: ?Sized + Send + Sync + 'static,
    {
        self.entries.insert(
            TypeId::of::<Arc<C>>(),
            CapabilityEntry {
                name: type_name::<C>(),
                value: Box::new(capability),
            },
        );
    }

    pub fn get<C>(&self) -> Option<Arc<C>>
    where
        C: ?Sized + Send + Sync + 'static,
    {
        self.entries
            .get(&TypeId::of::<Arc<C>>())
            .and_then(|entry| entry.value.downcast_ref::<Arc<C>>())
            .cloned()
    }

    pub fn contains<C>(&self) -> bool
    where
        C: ?Sized + Send + Sync + 'static,
    {
        self.entries.contains_key(&TypeId::of::<Arc<C>>())
    }

    /// Type names of the registered capabilities, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.values().map(|e| e.name).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// A capability obtained from a [`DependencyRef`].
///
/// Holds the generation of the providing module, so the code behind the
/// trait object stays mapped while the capability is alive.
pub struct Capability<C: ?Sized> {
    inner: Arc<C>,
    _guard: Option<GenerationGuard>,
}

impl<C: ?Sized> Capability<C> {
    pub fn as_arc(&self) -> &Arc<C> {
        &self.inner
    }
}

impl<C: ?Sized> Clone for Capability<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _guard: self._guard.clone(),
        }
    }
}

impl<C: ?Sized> Deref for Capability<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.inner
    }
}

/// Reference to a resolved dependency module, handed to extensions.
///
/// The host keeps ownership of the dependency itself; this only borrows it
/// for as long as the reference is held.
#[derive(Clone)]
pub struct DependencyRef {
    // Field order is drop order: the module must go before its generation.
    module: Arc<dyn DependencyModule>,
    capabilities: Arc<CapabilitySet>,
    guard: Option<GenerationGuard>,
}

impl DependencyRef {
    pub fn new(
        module: Arc<dyn DependencyModule>,
        capabilities: Arc<CapabilitySet>,
        guard: Option<GenerationGuard>,
    ) -> Self {
        Self {
            module,
            capabilities,
            guard,
        }
    }

    pub fn info(&self) -> ModuleInfo {
        self.module.info()
    }

    pub fn id(&self) -> String {
        self.module.info().id
    }

    /// Look up a typed capability, e.g. `dep.capability::<dyn Counter>()`.
    pub fn capability<C>(&self) -> Option<Capability<C>>
    where
        C: ?Sized + Send + Sync + 'static,
    {
        self.capabilities.get::<C>().map(|inner| Capability {
            inner,
            _guard: self.guard.clone(),
        })
    }

    pub fn has_capability<C>(&self) -> bool
    where
        C: ?Sized + Send + Sync + 'static,
    {
        self.capabilities.contains::<C>()
    }

    pub fn capability_names(&self) -> Vec<&'static str> {
        self.capabilities.names()
    }

    pub fn module(&self) -> &Arc<dyn DependencyModule> {
        &self.module
    }
}

impl fmt::Debug for DependencyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyRef")
            .field("id", &self.module.info().id)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}
