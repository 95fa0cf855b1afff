//! Install configuration and the environment an install is validated against.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use gemkit_schema::{GENERIC_PLATFORM, Version};
use serde::{Deserialize, Serialize};

use crate::paths;

/// Options for a single install.
///
/// Every field has a default, so a TOML file only needs the keys it
/// overrides:
///
/// ```toml
/// gem_home = "/opt/gems"
/// wrappers = false
/// build_args = ["--with-opt-dir=/usr/local"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Install root holding `gems/`, `specifications/`, `cache/`.
    pub gem_home: PathBuf,
    /// Where executables go; `<gem_home>/bin` when unset.
    pub bin_dir: Option<PathBuf>,
    /// Skip validation and overwrite conflicting executables.
    pub force: bool,
    /// Skip the installed-dependency check.
    pub ignore_dependencies: bool,
    /// Generate wrapper scripts (true) or symlinks (false).
    pub wrappers: bool,
    /// Use an `env`-based interpreter directive in wrappers.
    pub env_shebang: bool,
    /// Template for the interpreter directive. Recognised tokens: `$env`,
    /// `$ruby`, `$exec`, `$name`, `$args`.
    pub custom_shebang: Option<String>,
    /// Apply [`exec_format`](Self::exec_format) to executable names.
    pub format_executable: bool,
    /// Name format with a `%s` placeholder (e.g. `ruby-%s`).
    pub exec_format: Option<String>,
    /// Extra arguments passed to every extension build.
    pub build_args: Vec<String>,
    /// Kill an extension build command after this many seconds.
    pub build_timeout_secs: Option<u64>,
    /// Interpreter written into rewritten directives.
    pub interpreter: PathBuf,
    /// Base name identifying the interpreter in a source directive.
    pub interpreter_name: String,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self::new(paths::gem_home())
    }
}

impl InstallConfig {
    /// Defaults rooted at `gem_home`.
    pub fn new(gem_home: impl Into<PathBuf>) -> Self {
        Self {
            gem_home: gem_home.into(),
            bin_dir: None,
            force: false,
            ignore_dependencies: false,
            wrappers: true,
            env_shebang: false,
            custom_shebang: None,
            format_executable: false,
            exec_format: None,
            build_args: Vec::new(),
            build_timeout_secs: None,
            interpreter: default_interpreter(),
            interpreter_name: "ruby".to_string(),
        }
    }

    /// Parse overrides from TOML.
    ///
    /// # Errors
    ///
    /// Returns a `toml::de::Error` if the content is not valid TOML or has
    /// fields of the wrong type.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// The effective bin directory.
    pub fn bin_dir(&self) -> PathBuf {
        self.bin_dir
            .clone()
            .unwrap_or_else(|| paths::default_bin_dir(&self.gem_home))
    }

    /// Directory a package is extracted into.
    pub fn gem_dir(&self, full_name: &str) -> PathBuf {
        paths::gems_dir(&self.gem_home).join(full_name)
    }

    /// The build timeout, if any.
    pub fn build_timeout(&self) -> Option<Duration> {
        self.build_timeout_secs.map(Duration::from_secs)
    }

    /// The destination file name for `executable`, honouring
    /// [`format_executable`](Self::format_executable).
    pub fn formatted_program_filename(&self, executable: &str) -> String {
        match (&self.exec_format, self.format_executable) {
            (Some(format), true) => format.replace("%s", executable),
            _ => executable.to_string(),
        }
    }
}

fn default_interpreter() -> PathBuf {
    which::which("ruby").unwrap_or_else(|_| PathBuf::from("/usr/bin/ruby"))
}

/// Facts about the running system checked during validation.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Display name of the interpreter, used in mismatch messages.
    pub runtime_name: String,
    /// Version of the interpreter packages run on.
    pub runtime_version: Version,
    /// Display name of this package manager.
    pub manager_name: String,
    /// Version compared against `required_manager_version`.
    pub manager_version: Version,
    /// Platforms whose packages may be installed here.
    pub platforms: Vec<String>,
}

impl Environment {
    /// An environment for the given interpreter version on this host.
    pub fn new(runtime_version: Version) -> Self {
        Self {
            runtime_name: "Ruby".to_string(),
            runtime_version,
            manager_name: "gemkit".to_string(),
            manager_version: Version::new(env!("CARGO_PKG_VERSION"))
                .unwrap_or_else(|_| Version::zero()),
            platforms: vec![GENERIC_PLATFORM.to_string(), host_platform()],
        }
    }

    /// Ask `interpreter` for its version, falling back to `0` when it cannot
    /// be run.
    pub fn detect(interpreter: &Path) -> Self {
        let version = Command::new(interpreter)
            .args(["-e", "print RUBY_VERSION"])
            .output()
            .ok()
            .filter(|out| out.status.success())
            .and_then(|out| Version::new(&String::from_utf8_lossy(&out.stdout)).ok());

        if version.is_none() {
            tracing::debug!(
                "could not determine interpreter version from {}",
                interpreter.display()
            );
        }
        Self::new(version.unwrap_or_else(Version::zero))
    }

    /// Whether packages built for `platform` can be installed.
    pub fn accepts_platform(&self, platform: &str) -> bool {
        self.platforms.iter().any(|p| p == platform)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new(Version::zero())
    }
}

/// `<arch>-<os>` of this host, e.g. `x86_64-linux`.
pub fn host_platform() -> String {
    format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS)
}
