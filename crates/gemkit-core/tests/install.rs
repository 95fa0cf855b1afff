//! End-to-end installs into temporary gem homes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use gemkit_core::{
    Archive, ArchiveError, BuildCommand, CommandOutput, CommandRunner, Environment, HookRegistry,
    Index, InstallConfig, InstallError, InstallStep, Installer, Reporter, SpecStore,
};
use gemkit_schema::{SpecError, Specification, Version};
use tempfile::{TempDir, tempdir};

const WRAPPER_MARKER: &str = "This file was generated by RubyGems.";

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempdir().unwrap(),
        }
    }

    fn home(&self) -> PathBuf {
        self.dir.path().join("home")
    }

    fn config(&self) -> InstallConfig {
        let mut config = InstallConfig::new(self.home());
        config.interpreter = PathBuf::from("/usr/local/bin/ruby");
        config
    }

    /// Build `<name>-<version>.gem` with `lib/<name>.rb` and whatever `edit`
    /// adds to the spec.
    fn package(
        &self,
        name: &str,
        version: &str,
        edit: impl FnOnce(&mut Specification, &Path),
    ) -> PathBuf {
        let src = self.dir.path().join(format!("src-{name}-{version}"));
        fs::create_dir_all(src.join("lib")).unwrap();
        fs::write(src.join(format!("lib/{name}.rb")), "# lib\n").unwrap();

        let mut spec = Specification::new(name, Version::new(version).unwrap());
        spec.files.insert(format!("lib/{name}.rb"));
        edit(&mut spec, &src);

        gemkit_core::PackageFile::build(&spec, &src, &self.dir.path().join("pkg")).unwrap()
    }

    /// A package shipping `bin/<exe>` starting with `first_line`.
    fn package_with_exe(&self, name: &str, version: &str, exe: &str, first_line: &str) -> PathBuf {
        let body = format!("{first_line}\nputs '{name} {version}'\n");
        self.package(name, version, |spec, src| {
            fs::create_dir_all(src.join("bin")).unwrap();
            fs::write(src.join("bin").join(exe), &body).unwrap();
            spec.files.insert(format!("bin/{exe}"));
            spec.executables.push(exe.to_string());
        })
    }

    fn installer(&self, archive: &Path, config: InstallConfig) -> Installer {
        Installer::open(archive, config)
            .unwrap()
            .with_environment(Environment::new(Version::new("3.3.0").unwrap()))
    }

    fn install(&self, archive: &Path, config: InstallConfig) -> Result<Specification, InstallError> {
        self.installer(archive, config).install()
    }
}

#[derive(Debug, Default)]
struct RecordingReporter {
    warnings: Mutex<Vec<String>>,
    messages: Mutex<Vec<String>>,
}

impl RecordingReporter {
    fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap().clone()
    }
}

impl Reporter for RecordingReporter {
    fn section(&self, _: &str) {}
    fn installing(&self, _: &str, _: &Version) {}
    fn done(&self, _: &str, _: &Version, _: &str) {}
    fn failed(&self, _: &str, _: &Version, _: &str) {}
    fn info(&self, _: &str) {}
    fn warning(&self, msg: &str) {
        self.warnings.lock().unwrap().push(msg.to_string());
    }
    fn message(&self, msg: &str) {
        self.messages.lock().unwrap().push(msg.to_string());
    }
}

#[derive(Debug)]
struct FailingRunner;

impl CommandRunner for FailingRunner {
    fn run(&self, _: &BuildCommand, _: &Path) -> io::Result<CommandOutput> {
        Ok(CommandOutput {
            exit_code: Some(2),
            output: "extconf.rb:1: mkmf not found\n".to_string(),
        })
    }
}

/// An archive whose specification is taken as given, bypassing the checks
/// `PackageFile` applies when reading metadata.
#[derive(Debug)]
struct UncheckedArchive {
    path: PathBuf,
    spec: Specification,
}

impl Archive for UncheckedArchive {
    fn path(&self) -> &Path {
        &self.path
    }

    fn specification(&self) -> &Specification {
        &self.spec
    }

    fn extract_to(&self, dir: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
        fs::create_dir_all(dir.join("bin")).unwrap();
        fs::write(dir.join("bin/x"), "#!/usr/bin/ruby\n").unwrap();
        Ok(vec![PathBuf::from("bin/x")])
    }
}

fn assert_rejected(fx: &Fixture, spec: Specification, field: &str) {
    let archive = UncheckedArchive {
        path: fx.dir.path().join("unchecked.gem"),
        spec,
    };
    let mut config = fx.config();
    config.force = true;

    match Installer::new(archive, config) {
        Err(InstallError::Spec(SpecError::Invalid { field: got, .. })) => assert_eq!(got, field),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("{field} was accepted"),
    }
}

#[test]
fn test_unsafe_spec_fields_rejected_even_with_force() {
    let fx = Fixture::new();

    assert_rejected(
        &fx,
        Specification::new("../../../escaped", Version::new("1").unwrap()),
        "name",
    );

    let mut spec = Specification::new("a", Version::new("1").unwrap());
    spec.platform = "../../x".to_string();
    assert_rejected(&fx, spec, "platform");

    let mut spec = Specification::new("a", Version::new("1").unwrap());
    spec.executables.push("../x".to_string());
    assert_rejected(&fx, spec, "executable");

    let mut spec = Specification::new("a", Version::new("1").unwrap());
    spec.extensions.push("../../x/extconf.rb".to_string());
    assert_rejected(&fx, spec, "extension");

    assert!(!fx.dir.path().join("escaped-1").exists());
    assert!(!fx.home().exists());
    assert!(!fx.dir.path().join("x").exists());
}

#[test]
fn test_unsatisfied_dependency_unless_ignored() {
    let fx = Fixture::new();
    let archive = fx.package("a", "2", |spec, _| {
        spec.add_dependency("b", "> 5".parse().unwrap());
    });

    let err = fx.install(&archive, fx.config()).unwrap_err();
    assert!(matches!(err, InstallError::DependencyUnsatisfied { .. }));
    assert_eq!(err.to_string(), "a requires b (> 5)");
    assert!(!fx.home().join("gems/a-2").exists());

    let mut config = fx.config();
    config.ignore_dependencies = true;
    fx.install(&archive, config).unwrap();
    assert!(fx.home().join("specifications/a-2.gemspec").is_file());
}

#[test]
fn test_dependency_satisfied_by_earlier_install() {
    let fx = Fixture::new();
    fx.install(&fx.package("b", "6", |_, _| {}), fx.config())
        .unwrap();

    let archive = fx.package("a", "2", |spec, _| {
        spec.add_dependency("b", "> 5".parse().unwrap());
    });
    fx.install(&archive, fx.config()).unwrap();
}

#[test]
fn test_pre_install_false_leaves_nothing_on_disk() {
    let fx = Fixture::new();
    let mut hooks = HookRegistry::new();
    hooks.pre_install(|_| false);

    let archive = fx.package("a", "2", |_, _| {});
    let err = fx
        .installer(&archive, fx.config())
        .with_hooks(Arc::new(hooks))
        .install()
        .unwrap_err();

    assert_eq!(err.step(), InstallStep::PreInstall);
    assert!(err.to_string().contains("tests/install.rs"));
    assert!(!fx.home().join("gems/a-2").exists());
    assert!(!fx.home().join("specifications/a-2.gemspec").exists());
    assert!(!fx.home().join("cache/a-2.gem").exists());
}

#[test]
fn test_unit_and_none_hooks_proceed() {
    let fx = Fixture::new();
    let mut hooks = HookRegistry::new();
    hooks
        .pre_install(|_| ())
        .post_build(|_| None::<bool>)
        .post_install(|_| true);

    let archive = fx.package("a", "2", |_, _| {});
    fx.installer(&archive, fx.config())
        .with_hooks(Arc::new(hooks))
        .install()
        .unwrap();
    assert!(fx.home().join("gems/a-2/lib/a.rb").is_file());
}

#[test]
fn test_post_build_false_rolls_back() {
    let fx = Fixture::new();
    let mut hooks = HookRegistry::new();
    hooks.post_build(|installer| {
        assert!(installer.gem_dir().join("lib/a.rb").is_file());
        false
    });

    let archive = fx.package("a", "2", |_, _| {});
    let mut installer = fx.installer(&archive, fx.config()).with_hooks(Arc::new(hooks));
    let err = installer.install().unwrap_err();

    assert_eq!(err.step(), InstallStep::PostBuild);
    assert!(!fx.home().join("gems/a-2").exists());
    assert!(!fx.home().join("specifications/a-2.gemspec").exists());
    assert!(!fx.home().join("cache/a-2.gem").exists());
    assert!(installer.index().search("a").is_empty());
}

#[test]
fn test_cache_file_written_between_hooks() {
    let fx = Fixture::new();
    let before = Arc::new(AtomicBool::new(true));
    let after = Arc::new(AtomicBool::new(false));

    let mut hooks = HookRegistry::new();
    {
        let before = Arc::clone(&before);
        hooks.pre_install(move |installer| {
            before.store(installer.cache_file().exists(), Ordering::SeqCst);
        });
    }
    {
        let after = Arc::clone(&after);
        hooks.post_install(move |installer| {
            after.store(installer.cache_file().exists(), Ordering::SeqCst);
        });
    }

    let archive = fx.package("a", "2", |_, _| {});
    fx.installer(&archive, fx.config())
        .with_hooks(Arc::new(hooks))
        .install()
        .unwrap();

    assert!(!before.load(Ordering::SeqCst));
    assert!(after.load(Ordering::SeqCst));
}

#[test]
fn test_post_install_failure_only_warns() {
    let fx = Fixture::new();
    let reporter = Arc::new(RecordingReporter::default());
    let mut hooks = HookRegistry::new();
    hooks.post_install(|_| false);

    let archive = fx.package("a", "2", |spec, _| {
        spec.post_install_message = Some("Thanks for installing a!".to_string());
    });
    fx.installer(&archive, fx.config())
        .with_hooks(Arc::new(hooks))
        .with_reporter(reporter.clone())
        .install()
        .unwrap();

    assert!(fx.home().join("specifications/a-2.gemspec").is_file());
    assert!(
        reporter
            .warnings()
            .iter()
            .any(|w| w.starts_with("post-install hook at"))
    );
    assert_eq!(
        *reporter.messages.lock().unwrap(),
        vec!["Thanks for installing a!".to_string()]
    );
}

#[test]
fn test_installed_specs_round_trip_through_store() {
    let fx = Fixture::new();
    let mut installer = fx.installer(
        &fx.package("a", "2", |spec, _| {
            spec.summary = "a package".to_string();
            spec.add_dependency("b", ">= 0".parse().unwrap());
            spec.add_development_dependency("rake", "~> 13".parse().unwrap());
        }),
        InstallConfig {
            ignore_dependencies: true,
            ..fx.config()
        },
    );
    installer.install().unwrap();

    let stored = SpecStore::new(&fx.home()).load_index().unwrap();
    assert!(stored.contained_in(installer.index()));
    assert!(installer.index().contained_in(&stored));

    let spec = &stored.search("a")[0];
    assert_eq!(spec.summary, "a package");
    assert!(spec.files.is_empty());
    assert_eq!(
        spec.loaded_from.as_deref(),
        Some(fx.home().join("specifications/a-2.gemspec").as_path())
    );
}

#[test]
fn test_index_carries_across_installs() {
    let fx = Fixture::new();
    let mut first = fx.installer(&fx.package("b", "6", |_, _| {}), fx.config());
    first.install().unwrap();
    let index: Index = first.into_index();

    let archive = fx.package("a", "2", |spec, _| {
        spec.add_dependency("b", "= 6".parse().unwrap());
    });
    let mut second = fx.installer(&archive, fx.config()).with_index(index);
    second.install().unwrap();
    assert_eq!(second.index().spec_names(), vec!["a", "b"]);
}

#[test]
fn test_wrapper_rewrites_env_directive() {
    let fx = Fixture::new();
    let archive = fx.package_with_exe("a", "2", "executable", "#!/usr/bin/env ruby18 -ws");
    fx.install(&archive, fx.config()).unwrap();

    let wrapper = fs::read_to_string(fx.home().join("bin/executable")).unwrap();
    assert_eq!(wrapper.lines().next(), Some("#!/usr/local/bin/ruby -ws"));
    assert!(wrapper.contains(WRAPPER_MARKER));
    assert!(wrapper.contains("gem 'a', version"));
    assert!(wrapper.contains("load Gem.bin_path('a', 'executable', version)"));
}

#[test]
fn test_executable_conflict_between_packages() {
    let fx = Fixture::new();
    fx.install(
        &fx.package_with_exe("a", "2", "executable", "#!/usr/bin/ruby"),
        fx.config(),
    )
    .unwrap();

    let other = fx.package_with_exe("b", "1", "executable", "#!/usr/bin/ruby");
    let err = fx.install(&other, fx.config()).unwrap_err();
    match &err {
        InstallError::ExecutableConflict {
            executable,
            package,
            existing,
        } => {
            assert_eq!(executable, "executable");
            assert_eq!(package, "b");
            assert_eq!(existing, "installed executable from a");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.step(), InstallStep::GenerateExecutables);

    let mut config = fx.config();
    config.force = true;
    fx.install(&other, config).unwrap();
    let wrapper = fs::read_to_string(fx.home().join("bin/executable")).unwrap();
    assert!(wrapper.contains("gem 'b', version"));
}

#[test]
fn test_same_package_may_replace_its_wrapper() {
    let fx = Fixture::new();
    fx.install(
        &fx.package_with_exe("a", "1", "executable", "#!/usr/bin/ruby"),
        fx.config(),
    )
    .unwrap();
    fx.install(
        &fx.package_with_exe("a", "2", "executable", "#!/usr/bin/ruby"),
        fx.config(),
    )
    .unwrap();
}

#[test]
fn test_foreign_file_conflicts_only_in_default_bin_dir() {
    let fx = Fixture::new();
    let archive = fx.package_with_exe("a", "2", "executable", "#!/usr/bin/ruby");

    let default_bin = fx.home().join("bin");
    fs::create_dir_all(&default_bin).unwrap();
    fs::write(default_bin.join("executable"), "#!/bin/sh\necho mine\n").unwrap();

    let err = fx.install(&archive, fx.config()).unwrap_err();
    match err {
        InstallError::ExecutableConflict { existing, .. } => {
            assert_eq!(PathBuf::from(existing), default_bin.join("executable"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let custom_bin = fx.dir.path().join("custom-bin");
    fs::create_dir_all(&custom_bin).unwrap();
    fs::write(custom_bin.join("executable"), "#!/bin/sh\necho mine\n").unwrap();

    let mut config = fx.config();
    config.bin_dir = Some(custom_bin.clone());
    fx.install(&archive, config).unwrap();
    let wrapper = fs::read_to_string(custom_bin.join("executable")).unwrap();
    assert!(wrapper.contains(WRAPPER_MARKER));
}

#[test]
fn test_format_executable() {
    let fx = Fixture::new();
    let mut config = fx.config();
    config.format_executable = true;
    config.exec_format = Some("foo-%s-bar".to_string());

    fx.install(
        &fx.package_with_exe("a", "2", "executable", "#!/usr/bin/ruby"),
        config,
    )
    .unwrap();

    assert!(fx.home().join("bin/foo-executable-bar").is_file());
    assert!(!fx.home().join("bin/executable").exists());
}

#[test]
fn test_missing_executable_is_skipped_with_warning() {
    let fx = Fixture::new();
    let reporter = Arc::new(RecordingReporter::default());
    let archive = fx.package("a", "2", |spec, _| {
        spec.executables.push("ghost".to_string());
    });

    fx.installer(&archive, fx.config())
        .with_reporter(reporter.clone())
        .install()
        .unwrap();

    assert!(!fx.home().join("bin/ghost").exists());
    assert!(
        reporter
            .warnings()
            .iter()
            .any(|w| w.contains("skipping executable ghost"))
    );
}

#[test]
fn test_symlink_fallback_installs_wrapper() {
    let fx = Fixture::new();
    let reporter = Arc::new(RecordingReporter::default());
    let mut config = fx.config();
    config.wrappers = false;

    fx.installer(
        &fx.package_with_exe("a", "2", "executable", "#!/usr/bin/ruby"),
        config,
    )
    .with_symlink_support(false)
    .with_reporter(reporter.clone())
    .install()
    .unwrap();

    let dest = fx.home().join("bin/executable");
    assert!(!fs::symlink_metadata(&dest).unwrap().file_type().is_symlink());
    assert!(fs::read_to_string(&dest).unwrap().contains(WRAPPER_MARKER));
    assert!(
        reporter
            .warnings()
            .iter()
            .any(|w| w.starts_with("Unable to use symlinks on"))
    );
}

#[test]
fn test_extension_failure_reports_log() {
    let fx = Fixture::new();
    let archive = fx.package("a", "2", |spec, src| {
        fs::create_dir_all(src.join("ext/a")).unwrap();
        fs::write(src.join("ext/a/extconf.rb"), "require 'mkmf'\n").unwrap();
        spec.files.insert("ext/a/extconf.rb".to_string());
        spec.extensions.push("ext/a/extconf.rb".to_string());
    });

    let err = fx
        .installer(&archive, fx.config())
        .with_runner(Arc::new(FailingRunner))
        .install()
        .unwrap_err();

    assert_eq!(err.step(), InstallStep::BuildExtensions);
    let log = fx.home().join("gems/a-2/gem_make.out");
    assert!(err.to_string().contains("mkmf not found"));
    assert!(err.to_string().ends_with(&format!("Results logged to {}", log.display())));
    assert!(log.is_file());
    assert!(!fx.home().join("specifications/a-2.gemspec").exists());
}

#[cfg(unix)]
mod unix {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_symlink_never_moves_backward() {
        let fx = Fixture::new();
        let mut config = fx.config();
        config.wrappers = false;
        let dest = fx.home().join("bin/executable");

        let v1 = fx.package_with_exe("a", "1", "executable", "#!/usr/bin/ruby");
        let v3 = fx.package_with_exe("a", "3", "executable", "#!/usr/bin/ruby");

        fx.install(&v1, config.clone()).unwrap();
        assert_eq!(
            fs::read_link(&dest).unwrap(),
            fx.home().join("gems/a-1/bin/executable")
        );

        fx.install(&v3, config.clone()).unwrap();
        assert_eq!(
            fs::read_link(&dest).unwrap(),
            fx.home().join("gems/a-3/bin/executable")
        );

        fx.install(&v1, config).unwrap();
        assert_eq!(
            fs::read_link(&dest).unwrap(),
            fx.home().join("gems/a-3/bin/executable")
        );
    }

    #[test]
    fn test_wrapper_replaces_symlink_without_touching_target() {
        let fx = Fixture::new();
        let mut symlinks = fx.config();
        symlinks.wrappers = false;
        fx.install(
            &fx.package_with_exe("a", "1", "executable", "#!/usr/bin/ruby"),
            symlinks,
        )
        .unwrap();

        fx.install(
            &fx.package_with_exe("a", "2", "executable", "#!/usr/bin/ruby"),
            fx.config(),
        )
        .unwrap();

        let dest = fx.home().join("bin/executable");
        assert!(!fs::symlink_metadata(&dest).unwrap().file_type().is_symlink());
        assert!(fs::read_to_string(&dest).unwrap().contains(WRAPPER_MARKER));

        let real = fs::read_to_string(fx.home().join("gems/a-1/bin/executable")).unwrap();
        assert_eq!(real, "#!/usr/bin/ruby\nputs 'a 1'\n");
    }

    #[test]
    fn test_real_executable_gets_exec_bits() {
        let fx = Fixture::new();
        fx.install(
            &fx.package_with_exe("a", "2", "executable", "#!/usr/bin/ruby"),
            fx.config(),
        )
        .unwrap();

        let mode = fs::metadata(fx.home().join("gems/a-2/bin/executable"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o111, 0o111);

        let wrapper_mode = fs::metadata(fx.home().join("bin/executable"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(wrapper_mode & 0o777, 0o755);
    }

    #[test]
    fn test_unwritable_bin_dir() {
        let fx = Fixture::new();
        let bin_dir = fx.dir.path().join("locked-bin");
        fs::create_dir_all(&bin_dir).unwrap();
        fs::set_permissions(&bin_dir, fs::Permissions::from_mode(0o555)).unwrap();

        // Permission bits do not apply to root.
        if fs::write(bin_dir.join("probe"), "").is_ok() {
            return;
        }

        let mut config = fx.config();
        config.bin_dir = Some(bin_dir.clone());
        let err = fx
            .install(
                &fx.package_with_exe("a", "2", "executable", "#!/usr/bin/ruby"),
                config,
            )
            .unwrap_err();

        fs::set_permissions(&bin_dir, fs::Permissions::from_mode(0o755)).unwrap();

        match err {
            InstallError::FilePermission { path, .. } => assert_eq!(path, bin_dir),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            format!("{}", InstallError::FilePermission {
                path: bin_dir.clone(),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            }),
            format!("You don't have write permissions for the {} directory.", bin_dir.display())
        );
    }
}
