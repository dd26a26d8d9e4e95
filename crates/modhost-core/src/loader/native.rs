//! Native module libraries (.so, .dylib, .dll) loaded with libloading.
//!
//! The file is copied into the generation's shadow directory and the copy is
//! opened. The original stays free to be rewritten or deleted while the
//! generation is mapped, and a reload never gets the previous image back
//! from the dynamic loader's cache.

use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use modhost_sdk::{
    AbiVersionFn, ManifestFn, ABI_VERSION_SYMBOL, MANIFEST_SYMBOL, MODHOST_ABI_VERSION,
};

use super::{OpenedUnit, UnitOpener};
use crate::config::native_extension;
use crate::error::{HostError, Result};

#[derive(Debug, Clone)]
pub struct NativeLibraryOpener {
    extension: String,
}

impl Default for NativeLibraryOpener {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeLibraryOpener {
    pub fn new() -> Self {
        Self::with_extension(native_extension())
    }

    pub fn with_extension(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
        }
    }

    fn shadow_copy(path: &Path, shadow_dir: &Path) -> Result<PathBuf> {
        let file_name = path
            .file_name()
            .ok_or_else(|| HostError::load_failure(path, "library path has no file name"))?;
        std::fs::create_dir_all(shadow_dir)?;
        let shadow = shadow_dir.join(file_name);
        std::fs::copy(path, &shadow)
            .map_err(|e| HostError::load_failure(path, format!("shadow copy failed: {}", e)))?;
        Ok(shadow)
    }
}

impl UnitOpener for NativeLibraryOpener {
    fn name(&self) -> &'static str {
        "native"
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some(self.extension.as_str())
    }

    fn open(&self, path: &Path, shadow_dir: &Path) -> Result<OpenedUnit> {
        let shadow = Self::shadow_copy(path, shadow_dir)?;

        // SAFETY: loading runs the library's initializers; module libraries
        // are trusted code built against the SDK.
        let library = unsafe { Library::new(&shadow) }
            .map_err(|e| HostError::load_failure(path, format!("failed to load library: {}", e)))?;

        let abi = {
            let version_fn: Symbol<AbiVersionFn> = unsafe { library.get(ABI_VERSION_SYMBOL) }
                .map_err(|e| HostError::load_failure(path, format!("missing ABI version: {}", e)))?;
            unsafe { version_fn() }
        };
        if abi != MODHOST_ABI_VERSION {
            return Err(HostError::AbiMismatch {
                path: path.to_path_buf(),
                expected: MODHOST_ABI_VERSION,
                got: abi,
            });
        }

        let manifest = {
            let manifest_fn: Symbol<ManifestFn> = unsafe { library.get(MANIFEST_SYMBOL) }
                .map_err(|e| HostError::load_failure(path, format!("missing manifest: {}", e)))?;
            let raw = unsafe { manifest_fn() };
            if raw.is_null() {
                return Err(HostError::load_failure(path, "manifest function returned null"));
            }
            // SAFETY: the pointer was produced by Box::into_raw in the
            // library's generated export and is handed over exactly once.
            *unsafe { Box::from_raw(raw) }
        };

        if manifest.sdk_version() != modhost_sdk::MODHOST_SDK_VERSION {
            tracing::warn!(
                path = %path.display(),
                module_sdk = manifest.sdk_version(),
                host_sdk = modhost_sdk::MODHOST_SDK_VERSION,
                "Module built against a different SDK version"
            );
        }

        Ok(OpenedUnit {
            manifest,
            shadow_path: Some(shadow),
            keepalive: Some(Box::new(library)),
        })
    }
}
