//! Compiled-in modules enabled by marker files.
//!
//! A marker file `<stem>.module` in the module directory enables the
//! manifest registered under `<stem>`. Markers go through the same scan,
//! generation, reload, export and delete paths as native libraries.

use std::collections::HashMap;
use std::path::Path;

use modhost_sdk::ModuleManifest;

use super::{OpenedUnit, UnitOpener};
use crate::config::BUILTIN_MARKER_EXTENSION;
use crate::error::{HostError, Result};

/// Produces the manifest of a compiled-in module crate.
pub type ManifestProvider = fn() -> ModuleManifest;

#[derive(Debug, Clone)]
pub struct BuiltinModuleTable {
    extension: String,
    entries: HashMap<String, ManifestProvider>,
}

impl Default for BuiltinModuleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl BuiltinModuleTable {
    pub fn new() -> Self {
        Self::with_extension(BUILTIN_MARKER_EXTENSION)
    }

    pub fn with_extension(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            entries: HashMap::new(),
        }
    }

    /// Switch the marker file extension, keeping every registration.
    pub fn with_marker_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn marker_extension(&self) -> &str {
        &self.extension
    }

    /// Register `provider` under the marker stem `stem`.
    pub fn register(mut self, stem: impl Into<String>, provider: ManifestProvider) -> Self {
        self.entries.insert(stem.into(), provider);
        self
    }

    pub fn contains(&self, stem: &str) -> bool {
        self.entries.contains_key(stem)
    }

    /// Registered stems, sorted.
    pub fn stems(&self) -> Vec<&str> {
        let mut stems: Vec<_> = self.entries.keys().map(String::as_str).collect();
        stems.sort_unstable();
        stems
    }

    pub fn marker_file_name(&self, stem: &str) -> String {
        format!("{}.{}", stem, self.extension)
    }
}

impl UnitOpener for BuiltinModuleTable {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some(self.extension.as_str())
    }

    fn open(&self, path: &Path, _shadow_dir: &Path) -> Result<OpenedUnit> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| HostError::load_failure(path, "marker file has no name"))?;

        let provider = self.entries.get(stem).ok_or_else(|| {
            HostError::load_failure(path, format!("no built-in module set named '{}'", stem))
        })?;

        Ok(OpenedUnit {
            manifest: provider(),
            shadow_path: None,
            keepalive: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty() -> ModuleManifest {
        ModuleManifest::new()
    }

    #[test]
    fn test_accepts_marker_extension_only() {
        let table = BuiltinModuleTable::new().register("clock", empty);
        assert!(table.accepts(Path::new("/mods/clock.module")));
        assert!(table.accepts(Path::new("/mods/unknown.module")));
        assert!(!table.accepts(Path::new("/mods/clock.so")));
        assert_eq!(table.marker_file_name("clock"), "clock.module");
    }

    #[test]
    fn test_marker_extension_can_be_switched() {
        let table = BuiltinModuleTable::new()
            .register("clock", empty)
            .with_marker_extension("plugin");
        assert_eq!(table.marker_extension(), "plugin");
        assert!(table.contains("clock"));
        assert!(table.accepts(Path::new("/mods/clock.plugin")));
        assert!(!table.accepts(Path::new("/mods/clock.module")));
        assert_eq!(table.marker_file_name("clock"), "clock.plugin");
    }

    #[test]
    fn test_open_registered_stem() {
        let table = BuiltinModuleTable::new().register("clock", empty);
        let opened = table
            .open(Path::new("/mods/clock.module"), Path::new("/unused"))
            .unwrap();
        assert!(opened.keepalive.is_none());
        assert!(opened.manifest.is_empty());
    }

    #[test]
    fn test_open_unknown_stem_fails() {
        let table = BuiltinModuleTable::new();
        let err = table
            .open(Path::new("/mods/ghost.module"), Path::new("/unused"))
            .err()
            .unwrap();
        assert!(matches!(err, HostError::LoadFailure { .. }));
    }
}
