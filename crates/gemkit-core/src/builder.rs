//! Native extension builds.
//!
//! Each extension descriptor declared by a package (`ext/foo/extconf.rb`,
//! `ext/foo/configure`, ...) is matched to an [`ExtensionBuilder`] that knows
//! which commands turn it into a loadable library. Commands run out of
//! process through a [`CommandRunner`], inside the descriptor's directory.
//!
//! ## Build log
//!
//! Every command line and its combined stdout/stderr is appended to
//! `<gem_dir>/gem_make.out`. The log is kept whether the build succeeds or
//! not. On failure the error carries the last 20 lines and the log path.
//! A package without extensions produces no log.
//!
//! ## Environment
//!
//! | Variable | Value |
//! |---|---|
//! | `MAKEFLAGS` | `-j<logical cpus>` (make invocations only) |
//! | `GEM_HOME` | Install root |

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use gemkit_schema::Specification;
use wait_timeout::ChildExt;

use crate::config::InstallConfig;
use crate::error::{InstallError, InstallStep};
use crate::paths::BUILD_LOG_NAME;
use crate::reporter::Reporter;

/// Number of log lines quoted in a build failure.
const LOG_TAIL_LINES: usize = 20;

/// One external command of an extension build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCommand {
    /// Program to execute.
    pub program: PathBuf,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

impl BuildCommand {
    /// A command running `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl fmt::Display for BuildCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Result of running a [`BuildCommand`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, or `None` if the process was killed.
    pub exit_code: Option<i32>,
    /// Interleaved stdout and stderr.
    pub output: String,
}

impl CommandOutput {
    /// Whether the command exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs build commands. Swappable so tests never spawn a compiler.
pub trait CommandRunner: fmt::Debug + Send + Sync {
    /// Run `command` with `cwd` as working directory and wait for it.
    ///
    /// # Errors
    ///
    /// Returns an error only if the process could not be started or its
    /// output could not be captured. A non-zero exit is not an error here.
    fn run(&self, command: &BuildCommand, cwd: &Path) -> io::Result<CommandOutput>;
}

/// Spawns real processes, optionally killing them after a timeout.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    /// A runner that kills commands running longer than `timeout`.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, command: &BuildCommand, cwd: &Path) -> io::Result<CommandOutput> {
        // Both streams share one file so their lines stay interleaved.
        let mut capture = tempfile::tempfile()?;

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k, v)))
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::from(capture.try_clone()?))
            .stderr(Stdio::from(capture.try_clone()?))
            .spawn()?;

        let (exit_code, timed_out) = match self.timeout {
            Some(limit) => match child.wait_timeout(limit)? {
                Some(status) => (status.code(), None),
                None => {
                    child.kill()?;
                    child.wait()?;
                    (None, Some(limit))
                }
            },
            None => (child.wait()?.code(), None),
        };

        capture.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        capture.read_to_end(&mut bytes)?;
        let mut output = String::from_utf8_lossy(&bytes).into_owned();
        if let Some(limit) = timed_out {
            output.push_str(&format!(
                "\n{command} timed out after {}s\n",
                limit.as_secs_f32()
            ));
        }

        Ok(CommandOutput { exit_code, output })
    }
}

/// Everything a builder needs to plan its commands.
#[derive(Debug, Clone)]
pub struct BuildContext<'a> {
    /// Package directory.
    pub gem_dir: &'a Path,
    /// Directory holding the descriptor; commands run here.
    pub extension_dir: PathBuf,
    /// Descriptor file name (`extconf.rb`, `configure`, ...).
    pub descriptor: &'a str,
    /// Where compiled libraries are installed (`<gem_dir>/lib`).
    pub lib_dir: PathBuf,
    /// Interpreter for Ruby-driven descriptors.
    pub interpreter: &'a Path,
    /// User-supplied arguments passed to the configure step.
    pub build_args: &'a [String],
    /// Install root, exported as `GEM_HOME`.
    pub gem_home: &'a Path,
}

/// Knows how to build one kind of extension descriptor.
pub trait ExtensionBuilder: fmt::Debug + Send + Sync {
    /// Whether this builder handles the descriptor file `name`.
    fn handles(&self, name: &str) -> bool;

    /// The commands to run, in order. The build stops at the first failure.
    fn commands(&self, ctx: &BuildContext<'_>) -> Vec<BuildCommand>;
}

/// `extconf.rb`: generate a Makefile with the interpreter, then make.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtConfBuilder;

impl ExtensionBuilder for ExtConfBuilder {
    fn handles(&self, name: &str) -> bool {
        name == "extconf.rb"
    }

    fn commands(&self, ctx: &BuildContext<'_>) -> Vec<BuildCommand> {
        let lib = ctx.lib_dir.display().to_string();
        vec![
            BuildCommand::new(ctx.interpreter)
                .arg(ctx.descriptor)
                .args(ctx.build_args.iter().cloned()),
            make(ctx),
            make(ctx).args([
                "install".to_string(),
                format!("sitearchdir={lib}"),
                format!("sitelibdir={lib}"),
            ]),
        ]
    }
}

/// `configure`: an autoconf script run with `sh`, then make.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigureBuilder;

impl ExtensionBuilder for ConfigureBuilder {
    fn handles(&self, name: &str) -> bool {
        name == "configure"
    }

    fn commands(&self, ctx: &BuildContext<'_>) -> Vec<BuildCommand> {
        vec![
            BuildCommand::new("sh")
                .arg(format!("./{}", ctx.descriptor))
                .arg(format!("--prefix={}", ctx.gem_dir.display()))
                .args(ctx.build_args.iter().cloned()),
            make(ctx),
            make(ctx).arg("install"),
        ]
    }
}

/// `Rakefile`: the default rake task with the install dirs passed in.
#[derive(Debug, Clone, Copy, Default)]
pub struct RakeBuilder;

impl ExtensionBuilder for RakeBuilder {
    fn handles(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case("rakefile")
    }

    fn commands(&self, ctx: &BuildContext<'_>) -> Vec<BuildCommand> {
        let lib = ctx.lib_dir.display().to_string();
        vec![
            BuildCommand::new(ctx.interpreter)
                .args(["-S", "rake"])
                .arg(format!("RUBYARCHDIR={lib}"))
                .arg(format!("RUBYLIBDIR={lib}"))
                .args(ctx.build_args.iter().cloned())
                .env("GEM_HOME", ctx.gem_home.display().to_string()),
        ]
    }
}

/// `CMakeLists.txt`: configure with cmake, then make.
#[derive(Debug, Clone, Copy, Default)]
pub struct CMakeBuilder;

impl ExtensionBuilder for CMakeBuilder {
    fn handles(&self, name: &str) -> bool {
        name == "CMakeLists.txt"
    }

    fn commands(&self, ctx: &BuildContext<'_>) -> Vec<BuildCommand> {
        vec![
            BuildCommand::new("cmake")
                .arg(".")
                .arg(format!("-DCMAKE_INSTALL_PREFIX={}", ctx.gem_dir.display()))
                .args(ctx.build_args.iter().cloned()),
            make(ctx),
        ]
    }
}

fn make(ctx: &BuildContext<'_>) -> BuildCommand {
    BuildCommand::new(make_program())
        .env("MAKEFLAGS", format!("-j{}", num_cpus::get()))
        .env("GEM_HOME", ctx.gem_home.display().to_string())
}

fn make_program() -> PathBuf {
    which::which("gmake")
        .or_else(|_| which::which("make"))
        .unwrap_or_else(|_| PathBuf::from("make"))
}

/// The set of builders consulted for each descriptor, first match wins.
#[derive(Debug)]
pub struct ExtensionBuilders {
    builders: Vec<Box<dyn ExtensionBuilder>>,
}

impl Default for ExtensionBuilders {
    fn default() -> Self {
        Self {
            builders: vec![
                Box::new(ExtConfBuilder),
                Box::new(ConfigureBuilder),
                Box::new(RakeBuilder),
                Box::new(CMakeBuilder),
            ],
        }
    }
}

impl ExtensionBuilders {
    /// A set with no builders at all.
    pub fn empty() -> Self {
        Self {
            builders: Vec::new(),
        }
    }

    /// Add a builder, consulted before the existing ones.
    #[must_use]
    pub fn with(mut self, builder: impl ExtensionBuilder + 'static) -> Self {
        self.builders.insert(0, Box::new(builder));
        self
    }

    /// The builder responsible for `descriptor`, if any.
    pub fn find(&self, descriptor: &str) -> Option<&dyn ExtensionBuilder> {
        let name = Path::new(descriptor).file_name()?.to_str()?;
        self.builders
            .iter()
            .find(|b| b.handles(name))
            .map(|b| &**b)
    }

    /// Build every extension of `spec` extracted into `gem_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::ExtensionBuild`] when a descriptor has no
    /// builder or points outside `gem_dir`, a command cannot be started, or a command exits non-zero.
    pub fn build_all(
        &self,
        spec: &Specification,
        gem_dir: &Path,
        config: &InstallConfig,
        runner: &dyn CommandRunner,
        reporter: &dyn Reporter,
    ) -> Result<(), InstallError> {
        if spec.extensions.is_empty() {
            return Ok(());
        }

        let log_path = gem_dir.join(BUILD_LOG_NAME);
        let mut log = File::create(&log_path)
            .map_err(|e| InstallError::io(InstallStep::BuildExtensions, &log_path, e))?;
        let write_err = |e: io::Error| InstallError::io(InstallStep::BuildExtensions, &log_path, e);

        for extension in &spec.extensions {
            reporter.info(&format!(
                "Building native extensions for {extension}. This could take a while..."
            ));

            let Some(builder) = self.find(extension) else {
                writeln!(log, "No builder for extension '{extension}'").map_err(write_err)?;
                tracing::warn!("no builder for extension '{extension}'");
                return Err(build_failure(log, &log_path));
            };

            let relative = Path::new(extension);
            if relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
            {
                writeln!(log, "Invalid extension path '{extension}'").map_err(write_err)?;
                return Err(build_failure(log, &log_path));
            }
            let ctx = BuildContext {
                gem_dir,
                extension_dir: gem_dir.join(relative.parent().unwrap_or(Path::new(""))),
                descriptor: relative
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(extension),
                lib_dir: gem_dir.join("lib"),
                interpreter: &config.interpreter,
                build_args: &config.build_args,
                gem_home: &config.gem_home,
            };

            for command in builder.commands(&ctx) {
                tracing::debug!("running `{command}` in {}", ctx.extension_dir.display());
                writeln!(log, "{command}").map_err(write_err)?;

                match runner.run(&command, &ctx.extension_dir) {
                    Ok(out) => {
                        log.write_all(out.output.as_bytes()).map_err(write_err)?;
                        if !out.success() {
                            tracing::debug!("`{command}` exited with {:?}", out.exit_code);
                            return Err(build_failure(log, &log_path));
                        }
                    }
                    Err(e) => {
                        writeln!(log, "{}: {e}", command.program.display()).map_err(write_err)?;
                        return Err(build_failure(log, &log_path));
                    }
                }
            }
        }

        Ok(())
    }
}

fn build_failure(log: File, log_path: &Path) -> InstallError {
    drop(log);
    InstallError::ExtensionBuild {
        tail: read_last_lines(log_path, LOG_TAIL_LINES).unwrap_or_default(),
        log: log_path.to_path_buf(),
    }
}

fn read_last_lines(path: &Path, n: usize) -> io::Result<String> {
    // Read at most 16KB from the end (enough for ~400 lines at 40 chars each)
    const TAIL_SIZE: u64 = 16 * 1024;

    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();

    let seek_pos = file_len.saturating_sub(TAIL_SIZE);
    file.seek(SeekFrom::Start(seek_pos))?;

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    let buffer = String::from_utf8_lossy(&bytes);

    // If we seeked mid-file, skip the first (partial) line
    let content = if seek_pos > 0 {
        buffer.find('\n').map_or(&*buffer, |idx| &buffer[idx + 1..])
    } else {
        &buffer
    };

    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::NullReporter;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Debug, Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<(BuildCommand, PathBuf)>>,
        fail_on: Option<usize>,
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, command: &BuildCommand, cwd: &Path) -> io::Result<CommandOutput> {
            let mut calls = self.calls.lock().unwrap();
            calls.push((command.clone(), cwd.to_path_buf()));
            let failing = self.fail_on == Some(calls.len() - 1);
            Ok(CommandOutput {
                exit_code: Some(i32::from(failing)),
                output: if failing {
                    "compile error: missing header\n".to_string()
                } else {
                    format!("ok {}\n", calls.len())
                },
            })
        }
    }

    fn spec_with(extensions: &[&str]) -> Specification {
        let mut spec = Specification::new("native", "1".parse().unwrap());
        spec.extensions = extensions.iter().map(ToString::to_string).collect();
        spec
    }

    fn config(root: &Path) -> InstallConfig {
        let mut config = InstallConfig::new(root);
        config.interpreter = PathBuf::from("/usr/bin/ruby");
        config.build_args = vec!["--with-foo".to_string()];
        config
    }

    #[test]
    fn test_no_extensions_no_log() {
        let dir = tempdir().unwrap();
        let runner = RecordingRunner::default();

        ExtensionBuilders::default()
            .build_all(&spec_with(&[]), dir.path(), &config(dir.path()), &runner, &NullReporter)
            .unwrap();

        assert!(!dir.path().join(BUILD_LOG_NAME).exists());
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_extconf_runs_in_extension_dir() {
        let dir = tempdir().unwrap();
        let runner = RecordingRunner::default();

        ExtensionBuilders::default()
            .build_all(
                &spec_with(&["ext/native/extconf.rb"]),
                dir.path(),
                &config(dir.path()),
                &runner,
                &NullReporter,
            )
            .unwrap();

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].0.program, PathBuf::from("/usr/bin/ruby"));
        assert_eq!(calls[0].0.args, vec!["extconf.rb", "--with-foo"]);
        assert_eq!(calls[0].1, dir.path().join("ext/native"));
        assert_eq!(calls[2].0.args[0], "install");
        assert!(calls[1].0.env.iter().any(|(k, _)| k == "MAKEFLAGS"));

        let log = std::fs::read_to_string(dir.path().join(BUILD_LOG_NAME)).unwrap();
        assert!(log.starts_with("/usr/bin/ruby extconf.rb --with-foo\nok 1\n"));
    }

    #[test]
    fn test_failure_reports_log_tail() {
        let dir = tempdir().unwrap();
        let runner = RecordingRunner {
            fail_on: Some(1),
            ..Default::default()
        };

        let err = ExtensionBuilders::default()
            .build_all(
                &spec_with(&["ext/native/extconf.rb"]),
                dir.path(),
                &config(dir.path()),
                &runner,
                &NullReporter,
            )
            .unwrap_err();

        assert_eq!(runner.calls.lock().unwrap().len(), 2);
        match err {
            InstallError::ExtensionBuild { tail, log } => {
                assert!(tail.contains("compile error: missing header"));
                assert_eq!(log, dir.path().join(BUILD_LOG_NAME));
                assert!(log.exists());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_descriptor() {
        let dir = tempdir().unwrap();
        let runner = RecordingRunner::default();

        let err = ExtensionBuilders::default()
            .build_all(&spec_with(&[""]), dir.path(), &config(dir.path()), &runner, &NullReporter)
            .unwrap_err();

        assert!(err.to_string().contains("No builder for extension ''"));
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_extension_outside_gem_dir_is_not_built() {
        let dir = tempdir().unwrap();
        let runner = RecordingRunner::default();

        let err = ExtensionBuilders::default()
            .build_all(
                &spec_with(&["../../x/extconf.rb"]),
                dir.path(),
                &config(dir.path()),
                &runner,
                &NullReporter,
            )
            .unwrap_err();

        assert!(
            err.to_string()
                .contains("Invalid extension path '../../x/extconf.rb'")
        );
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_builder_selection() {
        let builders = ExtensionBuilders::default();
        assert!(builders.find("ext/a/extconf.rb").is_some());
        assert!(builders.find("ext/a/configure").is_some());
        assert!(builders.find("ext/a/Rakefile").is_some());
        assert!(builders.find("CMakeLists.txt").is_some());
        assert!(builders.find("ext/a/setup.py").is_none());
        assert!(ExtensionBuilders::empty().find("extconf.rb").is_none());
    }

    #[test]
    fn test_custom_builder_takes_precedence() {
        #[derive(Debug)]
        struct Noop;
        impl ExtensionBuilder for Noop {
            fn handles(&self, name: &str) -> bool {
                name == "extconf.rb"
            }
            fn commands(&self, _: &BuildContext<'_>) -> Vec<BuildCommand> {
                vec![BuildCommand::new("true")]
            }
        }

        let dir = tempdir().unwrap();
        let runner = RecordingRunner::default();
        ExtensionBuilders::default()
            .with(Noop)
            .build_all(
                &spec_with(&["extconf.rb"]),
                dir.path(),
                &config(dir.path()),
                &runner,
                &NullReporter,
            )
            .unwrap();

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.program, PathBuf::from("true"));
        assert_eq!(calls[0].1, dir.path());
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_combines_streams() {
        let dir = tempdir().unwrap();
        let cmd = BuildCommand::new("sh").args(["-c", "echo out; echo err 1>&2; exit 3"]);

        let out = ProcessRunner::default().run(&cmd, dir.path()).unwrap();

        assert_eq!(out.exit_code, Some(3));
        assert!(!out.success());
        assert!(out.output.contains("out\n"));
        assert!(out.output.contains("err\n"));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_timeout() {
        let dir = tempdir().unwrap();
        let cmd = BuildCommand::new("sh").args(["-c", "sleep 5"]);

        let out = ProcessRunner::new(Some(Duration::from_millis(100)))
            .run(&cmd, dir.path())
            .unwrap();

        assert_eq!(out.exit_code, None);
        assert!(out.output.contains("timed out"));
    }

    #[test]
    fn test_read_last_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log");
        let body: String = (1..=30).map(|i| format!("line {i}\n")).collect();
        std::fs::write(&path, body).unwrap();

        let tail = read_last_lines(&path, 3).unwrap();
        assert_eq!(tail, "line 28\nline 29\nline 30");
    }
}
