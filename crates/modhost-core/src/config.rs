//! Host configuration.
//!
//! Sources, lowest priority first:
//! 1. built-in defaults under the platform data directory
//! 2. an optional TOML file
//! 3. environment variables (see [`env_vars`])

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HostError, Result};

/// Environment variables that override file configuration.
pub mod env_vars {
    pub const MODULE_DIR: &str = "MODHOST_MODULE_DIR";
    pub const CONFIG_DIR: &str = "MODHOST_CONFIG_DIR";
    pub const SHADOW_DIR: &str = "MODHOST_SHADOW_DIR";
    pub const DEBOUNCE_MS: &str = "MODHOST_DEBOUNCE_MS";
}

/// Extension of the marker files that enable compiled-in modules.
pub const BUILTIN_MARKER_EXTENSION: &str = "module";

/// Platform extension of native module libraries.
pub fn native_extension() -> &'static str {
    std::env::consts::DLL_EXTENSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Directory scanned and watched for module files.
    pub module_dir: PathBuf,
    /// Root of the per-module config directories.
    pub config_dir: PathBuf,
    /// Where native libraries are copied before being opened.
    pub shadow_dir: PathBuf,
    /// Quiet period after the last file event before a reload.
    pub debounce_ms: u64,
    /// Wait between reclamation checks.
    pub reclaim_grace_ms: u64,
    /// Reclamation checks after the first one.
    pub reclaim_retries: u32,
    /// Extension of built-in marker files.
    pub builtin_extension: String,
    /// Extension of native libraries.
    pub native_extension: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("modhost");
        Self::with_base_dir(base)
    }
}

impl HostConfig {
    /// Defaults with every directory placed under `base`.
    pub fn with_base_dir(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            module_dir: base.join("modules"),
            config_dir: base.join("config"),
            shadow_dir: base.join("shadow"),
            debounce_ms: 500,
            reclaim_grace_ms: 100,
            reclaim_retries: 1,
            builtin_extension: BUILTIN_MARKER_EXTENSION.to_string(),
            native_extension: native_extension().to_string(),
        }
    }

    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                let config: HostConfig =
                    toml::from_str(&content).map_err(|e| HostError::ConfigCorrupt {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    })?;
                tracing::info!(category = "config", path = %path.display(), "Loaded host config");
                config
            }
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(env_vars::MODULE_DIR) {
            self.module_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(env_vars::CONFIG_DIR) {
            self.config_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(env_vars::SHADOW_DIR) {
            self.shadow_dir = PathBuf::from(dir);
        }
        if let Some(ms) = lookup(env_vars::DEBOUNCE_MS) {
            match ms.trim().parse() {
                Ok(ms) => self.debounce_ms = ms,
                Err(_) => tracing::warn!(
                    category = "config",
                    value = %ms,
                    "Ignoring invalid {}", env_vars::DEBOUNCE_MS
                ),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.module_dir.as_os_str().is_empty() {
            return Err(HostError::Config("module_dir is empty".into()));
        }
        // Shadow copies inside the watched directory would retrigger reloads.
        if self.shadow_dir.starts_with(&self.module_dir) {
            return Err(HostError::Config(format!(
                "shadow_dir {} must not be inside module_dir {}",
                self.shadow_dir.display(),
                self.module_dir.display()
            )));
        }
        if self.builtin_extension.is_empty() || self.native_extension.is_empty() {
            return Err(HostError::Config("module file extensions must be set".into()));
        }
        if self.builtin_extension == self.native_extension {
            return Err(HostError::Config(format!(
                "builtin and native modules both use the .{} extension",
                self.native_extension
            )));
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn reclaim_grace(&self) -> Duration {
        Duration::from_millis(self.reclaim_grace_ms)
    }
}
