//! Outcomes of scans and loads, returned to callers instead of aborting.

use std::path::PathBuf;

use serde::Serialize;

use crate::descriptor::ModuleDescriptor;

/// A module file or factory that was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// A module whose id was already claimed by an earlier file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateModule {
    pub id: String,
    pub path: PathBuf,
    /// File whose module was kept.
    pub kept: PathBuf,
}

/// A declared dependency with no active provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedDependency {
    pub module: String,
    pub dependency: String,
    pub required: bool,
}

/// A lifecycle call that failed; the module is left in `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleFailure {
    pub id: String,
    pub stage: String,
    pub error: String,
}

/// What became of a released generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReclamationOutcome {
    Reclaimed { generation: u64 },
    StillReferenced { generation: u64, strong_count: usize },
}

impl ReclamationOutcome {
    pub fn generation(&self) -> u64 {
        match self {
            ReclamationOutcome::Reclaimed { generation }
            | ReclamationOutcome::StillReferenced { generation, .. } => *generation,
        }
    }

    pub fn is_reclaimed(&self) -> bool {
        matches!(self, ReclamationOutcome::Reclaimed { .. })
    }
}

/// Result of a full load or reload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub generation: Option<u64>,
    pub previous_generation: Option<u64>,
    /// How the previous generation was released, if there was one.
    pub reclamation: Option<ReclamationOutcome>,
    /// Ids that reached `Active`, in activation order.
    pub active: Vec<String>,
    pub skipped: Vec<SkippedFile>,
    pub duplicates: Vec<DuplicateModule>,
    pub missing_dependencies: Vec<UnresolvedDependency>,
    pub failures: Vec<ModuleFailure>,
}

impl LoadReport {
    /// No file skipped, no duplicate and no lifecycle failure.
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.duplicates.is_empty() && self.failures.is_empty()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active.iter().any(|a| a == id)
    }
}

/// Result of a metadata-only scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub modules: Vec<ModuleDescriptor>,
    pub skipped: Vec<SkippedFile>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_report() {
        let mut report = LoadReport {
            active: vec!["a".into()],
            ..Default::default()
        };
        assert!(report.is_clean());
        assert!(report.is_active("a"));

        report.missing_dependencies.push(UnresolvedDependency {
            module: "a".into(),
            dependency: "b".into(),
            required: true,
        });
        // Missing dependencies are non-fatal.
        assert!(report.is_clean());

        report.failures.push(ModuleFailure {
            id: "c".into(),
            stage: "initialize".into(),
            error: "boom".into(),
        });
        assert!(!report.is_clean());
    }

    #[test]
    fn test_reclamation_outcome_json() {
        let outcome = ReclamationOutcome::StillReferenced {
            generation: 3,
            strong_count: 2,
        };
        let json = serde_json::to_value(outcome).unwrap();
        assert_eq!(json["outcome"], "still_referenced");
        assert_eq!(json["generation"], 3);
        assert_eq!(outcome.generation(), 3);
        assert!(!outcome.is_reclaimed());
    }
}
