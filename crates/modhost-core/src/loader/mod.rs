//! Module loader.
//!
//! Scans the module directory for files an opener accepts, opens each one
//! into a fresh generation and hands back the generation handle together
//! with the files that failed. One bad file never aborts a scan.

mod builtin;
mod native;

pub use builtin::{BuiltinModuleTable, ManifestProvider};
pub use native::NativeLibraryOpener;

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use modhost_sdk::{
    DependencyModule, DependencySpec, ExtensionModule, ModuleFactory, ModuleInfo, ModuleKind,
    ModuleManifest,
};

use crate::descriptor::ModuleDescriptor;
use crate::error::{HostError, Result};
use crate::generation::{GenerationHandle, LoadedUnit, RetiredGenerations};
use crate::lifecycle::panic_message;

/// A file opened by a [`UnitOpener`].
pub struct OpenedUnit {
    pub manifest: ModuleManifest,
    /// Copy of the file that was actually opened.
    pub shadow_path: Option<PathBuf>,
    /// Keeps the underlying library open.
    pub keepalive: Option<Box<dyn Any + Send + Sync>>,
}

/// Opens one kind of module file.
pub trait UnitOpener: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this opener handles `path`, judged by name only.
    fn accepts(&self, path: &Path) -> bool;

    /// Open `path`. `shadow_dir` is private to the generation being built
    /// and may be used for copies of the file.
    fn open(&self, path: &Path, shadow_dir: &Path) -> Result<OpenedUnit>;
}

/// A file that could not be opened.
#[derive(Debug)]
pub struct LoadIssue {
    pub path: PathBuf,
    pub error: HostError,
}

/// Result of opening a directory into a generation.
#[derive(Debug)]
pub struct LoadedGeneration {
    pub handle: GenerationHandle,
    pub issues: Vec<LoadIssue>,
}

/// One module type found in a unit, instantiated only to read its metadata.
#[derive(Debug, Clone)]
pub struct DiscoveredModule {
    pub info: ModuleInfo,
    pub kind: ModuleKind,
    pub dependencies: Vec<DependencySpec>,
    pub path: PathBuf,
}

pub struct ModuleLoader {
    openers: Vec<Box<dyn UnitOpener>>,
    shadow_root: PathBuf,
    next_generation: AtomicU64,
    retired: Arc<RetiredGenerations>,
}

impl ModuleLoader {
    /// `shadow_root` must be private to this loader; generation directories
    /// are created inside it.
    pub fn new(shadow_root: impl Into<PathBuf>) -> Self {
        Self {
            openers: Vec::new(),
            shadow_root: shadow_root.into(),
            next_generation: AtomicU64::new(1),
            retired: Arc::new(RetiredGenerations::new()),
        }
    }

    pub fn with_opener(mut self, opener: impl UnitOpener + 'static) -> Self {
        self.openers.push(Box::new(opener));
        self
    }

    pub fn shadow_root(&self) -> &Path {
        &self.shadow_root
    }

    pub fn retired(&self) -> &Arc<RetiredGenerations> {
        &self.retired
    }

    /// Whether any opener handles `path`.
    pub fn accepts(&self, path: &Path) -> bool {
        self.openers.iter().any(|o| o.accepts(path))
    }

    /// Candidate module files in `dir`, sorted by file name.
    pub fn candidate_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(dir).map_err(|source| HostError::DirectoryInaccessible {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && self.accepts(path))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Open every candidate file in `dir` into a new generation.
    pub fn load_generation(&self, dir: &Path) -> Result<LoadedGeneration> {
        let files = self.candidate_files(dir)?;
        let id = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let shadow_dir = self.shadow_root.join(format!("gen-{}", id));

        let mut units = Vec::with_capacity(files.len());
        let mut issues = Vec::new();

        for path in files {
            match self.open_unit(&path, &shadow_dir) {
                Ok(opened) => {
                    tracing::debug!(
                        generation = id,
                        path = %path.display(),
                        modules = opened.manifest.factories().len(),
                        "Opened module file"
                    );
                    units.push(LoadedUnit::new(
                        path,
                        opened.shadow_path,
                        opened.manifest,
                        opened.keepalive,
                    ));
                }
                Err(error) => {
                    tracing::warn!(
                        generation = id,
                        path = %path.display(),
                        "Skipping module file: {}", error
                    );
                    issues.push(LoadIssue { path, error });
                }
            }
        }

        tracing::info!(
            generation = id,
            units = units.len(),
            failed = issues.len(),
            "Loaded generation from {}", dir.display()
        );

        let shadow_dir = shadow_dir.exists().then_some(shadow_dir);
        Ok(LoadedGeneration {
            handle: GenerationHandle::new(id, units, shadow_dir, self.retired.clone()),
            issues,
        })
    }

    fn open_unit(&self, path: &Path, shadow_dir: &Path) -> Result<OpenedUnit> {
        let opener = self
            .openers
            .iter()
            .find(|o| o.accepts(path))
            .ok_or_else(|| HostError::load_failure(path, "no opener accepts this file"))?;

        match catch_unwind(AssertUnwindSafe(|| opener.open(path, shadow_dir))) {
            Ok(result) => result,
            Err(payload) => Err(HostError::load_failure(
                path,
                format!("{} opener panicked: {}", opener.name(), panic_message(&*payload)),
            )),
        }
    }

    /// Describe the modules in `dir` without running any lifecycle method.
    ///
    /// Each module type is instantiated once to read its metadata and
    /// dropped again; the temporary generation is released before returning.
    pub fn scan(&self, dir: &Path) -> Result<(Vec<ModuleDescriptor>, Vec<LoadIssue>)> {
        let LoadedGeneration { handle, mut issues } = self.load_generation(dir)?;

        let mut descriptors: Vec<ModuleDescriptor> = Vec::new();
        for unit in handle.units() {
            for factory in unit.manifest.factories() {
                match discover(factory, &unit.path) {
                    Ok(found) => {
                        if descriptors.iter().any(|d| d.id == found.info.id) {
                            issues.push(LoadIssue {
                                path: unit.path.clone(),
                                error: HostError::DuplicateId {
                                    id: found.info.id.clone(),
                                    path: unit.path.clone(),
                                },
                            });
                            continue;
                        }
                        descriptors.push(ModuleDescriptor::new(
                            &found.info,
                            found.kind,
                            &found.path,
                            found.dependencies,
                        ));
                    }
                    Err(error) => issues.push(LoadIssue {
                        path: unit.path.clone(),
                        error,
                    }),
                }
            }
        }

        if let Err(still) = handle.release(Duration::ZERO, 0) {
            tracing::warn!("Scan generation not reclaimed: {}", still);
        }
        Ok((descriptors, issues))
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("openers", &self.openers.iter().map(|o| o.name()).collect::<Vec<_>>())
            .field("shadow_root", &self.shadow_root)
            .finish()
    }
}

/// A freshly constructed module, not yet initialized.
pub enum ModuleInstance {
    Extension(Box<dyn ExtensionModule>),
    Dependency(Arc<dyn DependencyModule>),
}

/// Construct one module from `factory` and read its metadata.
///
/// Panics in the constructor or metadata getters become load failures, as
/// do invalid metadata and a kind that disagrees with the registration.
pub fn instantiate(
    factory: &ModuleFactory,
    path: &Path,
) -> Result<(ModuleInstance, DiscoveredModule)> {
    let construct = || match factory {
        ModuleFactory::Extension(make) => {
            let module = make();
            let metadata = (module.info(), module.kind(), module.dependencies());
            (ModuleInstance::Extension(module), metadata)
        }
        ModuleFactory::Dependency(make) => {
            let module = make();
            let metadata = (module.info(), ModuleKind::Dependency, Vec::new());
            (ModuleInstance::Dependency(module), metadata)
        }
    };

    let (instance, (info, kind, dependencies)) =
        catch_unwind(AssertUnwindSafe(construct)).map_err(|payload| {
            HostError::load_failure(
                path,
                format!("module constructor panicked: {}", panic_message(&*payload)),
            )
        })?;
    info.validate()
        .map_err(|e| HostError::load_failure(path, e))?;
    if kind != factory.kind() {
        return Err(HostError::load_failure(
            path,
            format!(
                "module '{}' reports kind {} but was registered as {}",
                info.id,
                kind,
                factory.kind()
            ),
        ));
    }

    Ok((
        instance,
        DiscoveredModule {
            info,
            kind,
            dependencies,
            path: path.to_path_buf(),
        },
    ))
}

/// Instantiate a factory just long enough to read its metadata.
pub fn discover(factory: &ModuleFactory, path: &Path) -> Result<DiscoveredModule> {
    instantiate(factory, path).map(|(_, found)| found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use modhost_sdk::{HostApi, ModuleResult};

    struct Probe;

    impl ExtensionModule for Probe {
        fn info(&self) -> ModuleInfo {
            ModuleInfo::new("probe", "Probe", semver::Version::new(0, 1, 0))
        }

        fn initialize(&mut self, _host: Arc<HostApi>) -> ModuleResult<()> {
            Ok(())
        }

        fn activate(&mut self) -> ModuleResult<()> {
            Ok(())
        }

        fn deactivate(&mut self) -> ModuleResult<()> {
            Ok(())
        }

        fn dispose(&mut self) -> ModuleResult<()> {
            Ok(())
        }
    }

    struct Nameless;

    impl ExtensionModule for Nameless {
        fn info(&self) -> ModuleInfo {
            ModuleInfo::new("", "Nameless", semver::Version::new(0, 1, 0))
        }

        fn initialize(&mut self, _host: Arc<HostApi>) -> ModuleResult<()> {
            Ok(())
        }

        fn activate(&mut self) -> ModuleResult<()> {
            Ok(())
        }

        fn deactivate(&mut self) -> ModuleResult<()> {
            Ok(())
        }

        fn dispose(&mut self) -> ModuleResult<()> {
            Ok(())
        }
    }

    fn probe() -> Box<dyn ExtensionModule> {
        Box::new(Probe)
    }

    fn nameless() -> Box<dyn ExtensionModule> {
        Box::new(Nameless)
    }

    fn probes() -> ModuleManifest {
        ModuleManifest::new().with_extension(probe)
    }

    fn twice() -> ModuleManifest {
        ModuleManifest::new().with_extension(probe)
    }

    fn loader(shadow: &Path) -> ModuleLoader {
        ModuleLoader::new(shadow).with_opener(
            BuiltinModuleTable::new()
                .register("probes", probes)
                .register("twice", twice),
        )
    }

    #[test]
    fn test_candidate_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.module", "a.module", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.module")).unwrap();

        let files = loader(&dir.path().join("shadow"))
            .candidate_files(dir.path())
            .unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.module", "b.module"]);
    }

    #[test]
    fn test_missing_directory_is_inaccessible() {
        let dir = tempfile::tempdir().unwrap();
        let err = loader(&dir.path().join("shadow"))
            .load_generation(&dir.path().join("absent"))
            .err()
            .unwrap();
        assert!(matches!(err, HostError::DirectoryInaccessible { .. }));
    }

    #[test]
    fn test_scan_reports_bad_files_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["probes.module", "twice.module", "ghost.module"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }

        let loader = loader(&dir.path().join("shadow"));
        let (modules, issues) = loader.scan(dir.path()).unwrap();

        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].id, "probe");
        assert!(!modules[0].is_loaded);
        assert_eq!(issues.len(), 2);
        assert!(issues
            .iter()
            .any(|i| matches!(i.error, HostError::LoadFailure { .. })));
        assert!(issues
            .iter()
            .any(|i| matches!(i.error, HostError::DuplicateId { .. })));
        assert!(loader.retired().is_empty());
    }

    #[test]
    fn test_generation_ids_increase() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader(&dir.path().join("shadow"));
        let first = loader.load_generation(dir.path()).unwrap().handle;
        let second = loader.load_generation(dir.path()).unwrap().handle;
        assert!(second.id() > first.id());
    }

    #[test]
    fn test_invalid_metadata_is_load_failure() {
        let factory = ModuleFactory::Extension(nameless);
        let err = discover(&factory, Path::new("/mods/x.module")).unwrap_err();
        assert!(matches!(err, HostError::LoadFailure { .. }));

        let found =
            discover(&ModuleFactory::Extension(probe), Path::new("/mods/x.module")).unwrap();
        assert_eq!(found.kind, ModuleKind::Extension);
    }
}
