//! Export macro tests.
//!
//! Exercises the entry points generated by `declare_modules!` the same way
//! the native loader calls them.

use modhost_sdk::prelude::*;
use modhost_sdk::{ModuleFactory, ModuleManifest, MODHOST_ABI_VERSION};

struct Storage;

impl Storage {
    fn new() -> Self {
        Storage
    }
}

impl DependencyModule for Storage {
    fn info(&self) -> ModuleInfo {
        ModuleInfo::new("test.storage", "Storage", Version::new(1, 0, 0))
    }

    fn initialize(&self) -> ModuleResult<()> {
        Ok(())
    }

    fn dispose(&self) -> ModuleResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Panel {
    active: bool,
}

impl Panel {
    fn new() -> Self {
        Self::default()
    }
}

impl ExtensionModule for Panel {
    fn info(&self) -> ModuleInfo {
        ModuleInfo::new("test.panel", "Panel", Version::new(0, 3, 1))
    }

    fn dependencies(&self) -> Vec<DependencySpec> {
        vec![DependencySpec::required("test.storage")]
    }

    fn initialize(&mut self, _host: Arc<HostApi>) -> ModuleResult<()> {
        Ok(())
    }

    fn activate(&mut self) -> ModuleResult<()> {
        self.active = true;
        Ok(())
    }

    fn deactivate(&mut self) -> ModuleResult<()> {
        self.active = false;
        Ok(())
    }

    fn dispose(&mut self) -> ModuleResult<()> {
        Ok(())
    }
}

declare_modules! {
    dependency => Storage::new,
    extension => Panel::new,
}

#[test]
fn test_manifest_lists_declared_modules() {
    let manifest = modhost_manifest();
    let kinds: Vec<_> = manifest.factories().iter().map(|f| f.kind()).collect();
    assert_eq!(kinds, vec![ModuleKind::Dependency, ModuleKind::Extension]);

    match manifest.factories()[1] {
        ModuleFactory::Extension(make) => {
            let mut panel = make();
            assert_eq!(panel.info().id, "test.panel");
            assert_eq!(panel.kind(), ModuleKind::Extension);
            assert_eq!(panel.dependencies().len(), 1);
            assert!(panel.activate().is_ok());
        }
        ModuleFactory::Dependency(_) => panic!("expected extension factory"),
    }
}

#[test]
fn test_exported_entry_points() {
    assert_eq!(modhost_abi_version(), MODHOST_ABI_VERSION);

    let raw = modhost_module_manifest();
    assert!(!raw.is_null());
    // SAFETY: the pointer comes from Box::into_raw in the generated export.
    let manifest: Box<ModuleManifest> = unsafe { Box::from_raw(raw) };
    assert_eq!(manifest.factories().len(), 2);
}

#[test]
fn test_each_factory_call_is_a_fresh_instance() {
    let manifest = modhost_manifest();
    let ModuleFactory::Dependency(make) = manifest.factories()[0] else {
        panic!("expected dependency factory");
    };
    let a = make();
    let b = make();
    assert!(!Arc::ptr_eq(&a, &b));
}
