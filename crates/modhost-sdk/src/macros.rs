//! Declarative macros for module crates.

/// Declare the modules a crate provides and export the fixed entry points.
///
/// Generates a `modhost_manifest()` function returning the
/// [`ModuleManifest`](crate::ModuleManifest), plus the two `#[no_mangle]`
/// symbols the native loader resolves. Constructors are called once per
/// generation.
///
/// # Example
///
/// ```rust,ignore
/// use modhost_sdk::prelude::*;
///
/// declare_modules! {
///     dependency => StorageService::new,
///     extension => NotesPanel::new,
/// }
/// ```
#[macro_export]
macro_rules! declare_modules {
    (@entry $manifest:ident, dependency, $ctor:path) => {
        $manifest.with_dependency(
            || -> ::std::sync::Arc<dyn $crate::DependencyModule> {
                ::std::sync::Arc::new($ctor())
            },
        )
    };
    (@entry $manifest:ident, extension, $ctor:path) => {
        $manifest.with_extension(|| -> ::std::boxed::Box<dyn $crate::ExtensionModule> {
            ::std::boxed::Box::new($ctor())
        })
    };
    ($($kind:ident => $ctor:path),* $(,)?) => {
        /// Factory table of every module in this crate.
        pub fn modhost_manifest() -> $crate::ModuleManifest {
            let manifest = $crate::ModuleManifest::new();
            $(
                let manifest = $crate::declare_modules!(@entry manifest, $kind, $ctor);
            )*
            manifest
        }

        #[no_mangle]
        pub extern "C" fn modhost_abi_version() -> u32 {
            $crate::MODHOST_ABI_VERSION
        }

        /// Ownership of the returned manifest passes to the caller.
        #[no_mangle]
        pub extern "C" fn modhost_module_manifest() -> *mut $crate::ModuleManifest {
            ::std::boxed::Box::into_raw(::std::boxed::Box::new(modhost_manifest()))
        }
    };
}
