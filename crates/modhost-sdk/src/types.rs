//! Module metadata shared by the host and every module.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ModuleError, ModuleResult};

/// Keeps a loaded generation alive for as long as it is held.
///
/// Anything created by module code (instances, views, handlers, shared
/// values) carries one of these so the code it points into cannot be
/// unmapped underneath it.
pub type GenerationGuard = Arc<dyn Any + Send + Sync>;

/// The two capability contracts a module can implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    /// Has a UI surface and a full activate/deactivate lifecycle.
    Extension,
    /// Service-only module consumed by extensions.
    Dependency,
}

impl ModuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::Extension => "extension",
            ModuleKind::Dependency => "dependency",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity and display metadata of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// Unique module identifier, also used as the config directory name.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Short description.
    #[serde(default)]
    pub description: String,
    /// Module version.
    pub version: semver::Version,
}

impl ModuleInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: semver::Version) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            version,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Reject metadata the loader cannot register.
    ///
    /// The id doubles as a directory name, so path separators and relative
    /// components are refused.
    pub fn validate(&self) -> ModuleResult<()> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err(ModuleError::InvalidMetadata("module id is empty".into()));
        }
        if id != self.id {
            return Err(ModuleError::InvalidMetadata(format!(
                "module id '{}' has surrounding whitespace",
                self.id
            )));
        }
        if id == "." || id == ".." || id.contains(['/', '\\']) {
            return Err(ModuleError::InvalidMetadata(format!(
                "module id '{}' is not a valid directory name",
                self.id
            )));
        }
        if self.name.trim().is_empty() {
            return Err(ModuleError::InvalidMetadata(format!(
                "module '{}' has no name",
                self.id
            )));
        }
        Ok(())
    }
}

/// A dependency declared by an extension module.
///
/// `required` is metadata only: the loader never blocks an extension on a
/// missing dependency, the module decides how to degrade in `initialize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    pub id: String,
    #[serde(default)]
    pub required: bool,
}

impl DependencySpec {
    pub fn required(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            required: true,
        }
    }

    pub fn optional(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            required: false,
        }
    }
}

/// Opaque handle to the view surface of an extension module.
///
/// The host never looks inside; it is handed to the view collaborator which
/// downcasts it to whatever its toolkit expects.
#[derive(Clone)]
pub struct ViewHandle {
    view: Arc<dyn Any + Send + Sync>,
    guard: Option<GenerationGuard>,
}

impl ViewHandle {
    pub fn new<T: Any + Send + Sync>(view: T) -> Self {
        Self {
            view: Arc::new(view),
            guard: None,
        }
    }

    /// Attach the generation that produced the view.
    pub fn with_guard(mut self, guard: GenerationGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.view.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.view.is::<T>()
    }

    pub fn is_guarded(&self) -> bool {
        self.guard.is_some()
    }
}

impl fmt::Debug for ViewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewHandle")
            .field("guarded", &self.guard.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_info_builder() {
        let info = ModuleInfo::new("notes", "Notes", semver::Version::new(1, 2, 0))
            .with_description("Quick notes panel");

        assert_eq!(info.id, "notes");
        assert_eq!(info.description, "Quick notes panel");
        assert!(info.validate().is_ok());
    }

    #[test]
    fn test_module_info_rejects_bad_ids() {
        for id in ["", "  ", "a/b", "..", "x\\y", " padded"] {
            let info = ModuleInfo::new(id, "Name", semver::Version::new(0, 1, 0));
            assert!(info.validate().is_err(), "id {:?} should be rejected", id);
        }

        let nameless = ModuleInfo::new("ok", " ", semver::Version::new(0, 1, 0));
        assert!(matches!(
            nameless.validate(),
            Err(ModuleError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn test_module_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&ModuleKind::Dependency).unwrap(),
            "\"dependency\""
        );
        assert_eq!(ModuleKind::Extension.to_string(), "extension");
    }

    #[test]
    fn test_dependency_spec_defaults_to_optional() {
        let spec: DependencySpec = serde_json::from_str(r#"{"id":"storage"}"#).unwrap();
        assert!(!spec.required);
        assert!(DependencySpec::required("storage").required);
    }

    #[test]
    fn test_view_handle_downcast() {
        struct Panel {
            rows: usize,
        }

        let handle = ViewHandle::new(Panel { rows: 3 });
        assert!(handle.is::<Panel>());
        assert_eq!(handle.downcast_ref::<Panel>().map(|p| p.rows), Some(3));
        assert!(handle.downcast_ref::<String>().is_none());
        assert!(!handle.is_guarded());

        let guarded = handle.with_guard(Arc::new(()));
        assert!(guarded.is_guarded());
    }
}
