//! The install pipeline.
//!
//! One [`Installer`] installs one package archive. Steps run strictly in
//! order and none is retried:
//!
//! 1. validate (runtime, manager, platform, installed dependencies)
//! 2. pre-install hooks
//! 3. extract into `<gem_home>/gems/<full_name>`
//! 4. build native extensions
//! 5. post-build hooks (a failure here removes what steps 3-4 created)
//! 6. generate executables
//! 7. write the spec to `<gem_home>/specifications` and cache the archive
//! 8. post-install hooks (failures are reported, the install stands)
//!
//! Step 7 is the commit point: before it nothing is visible to later
//! dependency checks. Installs sharing a gem home must be serialized by the
//! caller.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gemkit_schema::{Dependency, Specification};

use crate::archive::{Archive, PackageFile};
use crate::builder::{CommandRunner, ExtensionBuilders, ProcessRunner};
use crate::config::{Environment, InstallConfig};
use crate::error::{InstallError, InstallStep};
use crate::executables::ExecutableGenerator;
use crate::hooks::{HookPoint, HookRegistry};
use crate::index::Index;
use crate::paths;
use crate::reporter::{NullReporter, Reporter};
use crate::store::SpecStore;

/// Installs a single package archive into a gem home.
pub struct Installer {
    archive: Box<dyn Archive>,
    spec: Specification,
    config: InstallConfig,
    gem_dir: PathBuf,
    store: SpecStore,
    installed: Index,
    hooks: Arc<HookRegistry>,
    environment: Option<Environment>,
    reporter: Arc<dyn Reporter>,
    runner: Arc<dyn CommandRunner>,
    builders: Arc<ExtensionBuilders>,
    symlinks_supported: bool,
}

impl Installer {
    /// Prepare to install `archive`. The installed index is loaded from the
    /// gem home's specification store.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::Spec`] if a path field of the specification
    /// is unsafe (checked even with `force`), or if the specification store
    /// exists but cannot be listed.
    pub fn new(archive: impl Archive + 'static, config: InstallConfig) -> Result<Self, InstallError> {
        let spec = archive.specification().clone();
        spec.validate()?;
        let gem_dir = config.gem_dir(&spec.full_name());
        let store = SpecStore::new(&config.gem_home);
        let installed = store.load_index()?;
        let runner = Arc::new(ProcessRunner::new(config.build_timeout()));

        Ok(Self {
            archive: Box::new(archive),
            spec,
            config,
            gem_dir,
            store,
            installed,
            hooks: Arc::new(HookRegistry::new()),
            environment: None,
            reporter: Arc::new(NullReporter),
            runner,
            builders: Arc::new(ExtensionBuilders::default()),
            symlinks_supported: cfg!(unix),
        })
    }

    /// Open the archive at `path` and prepare to install it.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::Archive`] if the archive cannot be read, or
    /// any error from [`Installer::new`].
    pub fn open(path: impl Into<PathBuf>, config: InstallConfig) -> Result<Self, InstallError> {
        Self::new(PackageFile::open(path)?, config)
    }

    /// Check dependencies against `index` instead of the store contents.
    #[must_use]
    pub fn with_index(mut self, index: Index) -> Self {
        self.installed = index;
        self
    }

    /// Use a shared hook registry.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Validate against `environment` instead of probing the interpreter.
    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Send progress to `reporter`.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Run extension build commands through `runner`.
    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Use a custom set of extension builders.
    #[must_use]
    pub fn with_builders(mut self, builders: Arc<ExtensionBuilders>) -> Self {
        self.builders = builders;
        self
    }

    /// Override whether symlink mode is available on this platform.
    #[must_use]
    pub fn with_symlink_support(mut self, supported: bool) -> Self {
        self.symlinks_supported = supported;
        self
    }

    /// The package being installed.
    pub fn spec(&self) -> &Specification {
        &self.spec
    }

    /// Where the package is extracted.
    pub fn gem_dir(&self) -> &Path {
        &self.gem_dir
    }

    /// The install options.
    pub fn config(&self) -> &InstallConfig {
        &self.config
    }

    /// Installed packages, including this one once committed.
    pub fn index(&self) -> &Index {
        &self.installed
    }

    /// Take the installed index, e.g. to reuse it for the next install.
    pub fn into_index(self) -> Index {
        self.installed
    }

    /// Where the archive is cached after a successful install.
    pub fn cache_file(&self) -> PathBuf {
        paths::cache_dir(&self.config.gem_home).join(self.spec.file_name())
    }

    /// Whether some installed package satisfies `dep`.
    pub fn installation_satisfies_dependency(&self, dep: &Dependency) -> bool {
        self.installed
            .search(dep.name.as_str())
            .iter()
            .any(|installed| dep.matches_spec(installed))
    }

    /// Succeed if `dep` of `spec` is satisfied by an installed package.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::DependencyUnsatisfied`] naming `dep`.
    pub fn ensure_dependency(
        &self,
        spec: &Specification,
        dep: &Dependency,
    ) -> Result<(), InstallError> {
        if self.installation_satisfies_dependency(dep) {
            Ok(())
        } else {
            Err(InstallError::DependencyUnsatisfied {
                package: spec.name.clone(),
                dependency: dep.clone(),
            })
        }
    }

    /// Run the whole pipeline, returning the committed specification with
    /// `loaded_from` pointing at its stored file.
    ///
    /// # Errors
    ///
    /// Returns the error of the first step that fails; see
    /// [`InstallError::step`].
    pub fn install(&mut self) -> Result<Specification, InstallError> {
        let (name, version) = (self.spec.name.clone(), self.spec.version.clone());
        self.reporter.installing(&name, &version);

        match self.run_steps() {
            Ok(spec) => {
                self.reporter
                    .done(&name, &version, &self.gem_dir.display().to_string());
                Ok(spec)
            }
            Err(e) => {
                tracing::debug!("install of {} failed during {}", self.spec.full_name(), e.step());
                self.reporter.failed(&name, &version, &e.to_string());
                Err(e)
            }
        }
    }

    fn run_steps(&mut self) -> Result<Specification, InstallError> {
        let hooks = Arc::clone(&self.hooks);

        if self.config.force {
            tracing::debug!("force set, skipping validation");
        } else {
            self.validate()?;
        }

        hooks.run(HookPoint::PreInstall, self)?;

        self.ensure_layout()?;
        self.extract()?;

        self.builders.build_all(
            &self.spec,
            &self.gem_dir,
            &self.config,
            &*self.runner,
            &*self.reporter,
        )?;

        if let Err(e) = hooks.run(HookPoint::PostBuild, self) {
            self.rollback();
            return Err(e);
        }

        let generated = ExecutableGenerator::new(
            &self.spec,
            &self.gem_dir,
            &self.config,
            &self.installed,
            &*self.reporter,
        )
        .symlinks_supported(self.symlinks_supported)
        .generate()?;
        tracing::debug!("generated {} executables", generated.len());

        let spec_path = self.store.write(&self.spec)?;
        self.write_cache()?;

        let mut committed = self.spec.clone();
        committed.loaded_from = Some(spec_path);
        self.installed.add(committed.clone());

        if let Err(e) = hooks.run(HookPoint::PostInstall, self) {
            tracing::warn!("{e}");
            self.reporter.warning(&e.to_string());
        }

        if !generated.is_empty() {
            self.check_bin_dir_on_path();
        }
        if let Some(message) = &self.spec.post_install_message {
            self.reporter.message(message);
        }

        Ok(committed)
    }

    fn validate(&self) -> Result<(), InstallError> {
        let environment = self
            .environment
            .clone()
            .unwrap_or_else(|| Environment::detect(&self.config.interpreter));
        let spec = &self.spec;

        if !spec
            .required_runtime_version
            .is_satisfied_by(&environment.runtime_version)
        {
            return Err(InstallError::VersionMismatch {
                package: spec.name.clone(),
                component: environment.runtime_name,
                requirement: spec.required_runtime_version.clone(),
            });
        }

        if !spec
            .required_manager_version
            .is_satisfied_by(&environment.manager_version)
        {
            return Err(InstallError::VersionMismatch {
                package: spec.name.clone(),
                component: environment.manager_name,
                requirement: spec.required_manager_version.clone(),
            });
        }

        if !environment.accepts_platform(&spec.platform) {
            return Err(InstallError::IncompatiblePlatform {
                package: spec.full_name(),
                platform: spec.platform.clone(),
            });
        }

        if !self.config.ignore_dependencies {
            for dep in spec.runtime_dependencies() {
                self.ensure_dependency(spec, dep)?;
            }
        }

        Ok(())
    }

    fn ensure_layout(&self) -> Result<(), InstallError> {
        let root = &self.config.gem_home;
        for dir in [
            paths::gems_dir(root),
            paths::specifications_dir(root),
            paths::cache_dir(root),
        ] {
            fs::create_dir_all(&dir).map_err(|e| InstallError::io(InstallStep::Extract, &dir, e))?;
        }
        Ok(())
    }

    fn extract(&self) -> Result<(), InstallError> {
        // Files from an earlier install of the same version must not linger.
        match fs::remove_dir_all(&self.gem_dir) {
            Ok(()) => tracing::debug!("removed previous {}", self.gem_dir.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(InstallError::io(InstallStep::Extract, &self.gem_dir, e)),
        }

        self.archive.extract_to(&self.gem_dir)?;
        Ok(())
    }

    fn write_cache(&self) -> Result<(), InstallError> {
        let cache_file = self.cache_file();
        let source = self.archive.path();
        let same = match (fs::canonicalize(source), fs::canonicalize(&cache_file)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if !same {
            fs::copy(source, &cache_file)
                .map_err(|e| InstallError::io(InstallStep::WriteMetadata, &cache_file, e))?;
        }
        Ok(())
    }

    fn rollback(&self) {
        tracing::debug!("rolling back {}", self.spec.full_name());
        if let Err(e) = fs::remove_dir_all(&self.gem_dir) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!("failed to remove {}: {e}", self.gem_dir.display());
            }
        }
        let cache_file = self.cache_file();
        if let Err(e) = fs::remove_file(&cache_file) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!("failed to remove {}: {e}", cache_file.display());
            }
        }
    }

    fn check_bin_dir_on_path(&self) {
        let bin_dir = self.config.bin_dir();
        if !paths::is_on_path(&bin_dir) {
            let msg = format!(
                "You don't have {} in your PATH,\n\t  gem executables will not run.",
                bin_dir.display()
            );
            tracing::warn!("{msg}");
            self.reporter.warning(&msg);
        }
    }
}

impl fmt::Debug for Installer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Installer")
            .field("archive", &self.archive)
            .field("spec", &self.spec.full_name())
            .field("gem_dir", &self.gem_dir)
            .field("installed", &self.installed)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}
