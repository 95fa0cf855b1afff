//! Package specifications.
//!
//! A [`Specification`] describes one installable package version: its
//! identity (name, version, platform), the files it ships, the executables
//! and native extensions it declares, and its dependencies. Specifications
//! are stored on disk as TOML.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::version::{Requirement, Version};

/// Platform of a package that runs anywhere the interpreter does.
pub const GENERIC_PLATFORM: &str = "generic";

/// Errors that can occur when loading or saving a specification.
#[derive(Error, Debug)]
pub enum SpecError {
    /// An I/O error occurred while reading a specification file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML content could not be deserialized into a specification.
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// The specification could not be serialized.
    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A field that becomes part of an install path is malformed.
    #[error("Invalid {field} {value:?}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Its value.
        value: String,
    },
}

/// Whether a dependency is needed at runtime or only for development.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Required for the package to work once installed.
    #[default]
    Runtime,
    /// Only needed to develop the package; ignored at install time.
    Development,
}

/// A named dependency with a version constraint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Dependency {
    /// Name of the required package.
    pub name: String,
    /// Versions of that package that satisfy the dependency.
    #[serde(default)]
    pub requirement: Requirement,
    /// Runtime or development.
    #[serde(default)]
    pub kind: DependencyKind,
}

impl Dependency {
    /// A runtime dependency.
    pub fn runtime(name: impl Into<String>, requirement: Requirement) -> Self {
        Self {
            name: name.into(),
            requirement,
            kind: DependencyKind::Runtime,
        }
    }

    /// A development dependency.
    pub fn development(name: impl Into<String>, requirement: Requirement) -> Self {
        Self {
            name: name.into(),
            requirement,
            kind: DependencyKind::Development,
        }
    }

    /// Whether this dependency is checked at install time.
    pub fn is_runtime(&self) -> bool {
        self.kind == DependencyKind::Runtime
    }

    /// Whether `spec` is a package that satisfies this dependency.
    pub fn matches_spec(&self, spec: &Specification) -> bool {
        spec.name == self.name && self.requirement.is_satisfied_by(&spec.version)
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.requirement)
    }
}

fn default_platform() -> String {
    GENERIC_PLATFORM.to_string()
}

fn default_bindir() -> String {
    "bin".to_string()
}

/// Metadata describing one installable package version.
///
/// Equality ignores [`loaded_from`](Self::loaded_from), which records where
/// a copy was read from rather than what the package is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Specification {
    /// Package name.
    pub name: String,
    /// Package version.
    pub version: Version,
    /// Target platform, `generic` unless the package ships platform binaries.
    #[serde(default = "default_platform")]
    pub platform: String,
    /// One-line description.
    #[serde(default)]
    pub summary: String,
    /// Identifier of the source (registry, path, ...) that owns this spec.
    #[serde(default)]
    pub source: String,
    /// Directory inside the package holding executables.
    #[serde(default = "default_bindir")]
    pub bindir: String,
    /// Relative paths of every file shipped by the package.
    #[serde(default)]
    pub files: BTreeSet<String>,
    /// Executable names, resolved inside [`bindir`](Self::bindir).
    #[serde(default)]
    pub executables: Vec<String>,
    /// Build descriptors of native extensions (e.g. `ext/a/extconf.rb`).
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Interpreter versions this package runs on.
    #[serde(default)]
    pub required_runtime_version: Requirement,
    /// Package manager versions able to install this package.
    #[serde(default)]
    pub required_manager_version: Requirement,
    /// Printed once the package has been installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_install_message: Option<String>,
    /// Declared dependencies, runtime and development.
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    /// Path this specification was loaded from, if any.
    #[serde(skip)]
    pub loaded_from: Option<PathBuf>,
}

impl Specification {
    /// A generic-platform specification with no files or dependencies.
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            platform: default_platform(),
            summary: String::new(),
            source: String::new(),
            bindir: default_bindir(),
            files: BTreeSet::new(),
            executables: Vec::new(),
            extensions: Vec::new(),
            required_runtime_version: Requirement::default(),
            required_manager_version: Requirement::default(),
            post_install_message: None,
            dependencies: Vec::new(),
            loaded_from: None,
        }
    }

    /// Unique key: `name-version`, suffixed with `-platform` when the
    /// platform is not generic.
    pub fn full_name(&self) -> String {
        if self.is_generic_platform() {
            format!("{}-{}", self.name, self.version)
        } else {
            format!("{}-{}-{}", self.name, self.version, self.platform)
        }
    }

    /// File name of the package archive (`a-2.gem`).
    pub fn file_name(&self) -> String {
        format!("{}.gem", self.full_name())
    }

    /// File name of the stored specification (`a-2.gemspec`).
    pub fn spec_name(&self) -> String {
        format!("{}.gemspec", self.full_name())
    }

    /// Whether the package runs on any platform.
    pub fn is_generic_platform(&self) -> bool {
        self.platform == GENERIC_PLATFORM
    }

    /// Dependencies checked at install time.
    pub fn runtime_dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies.iter().filter(|d| d.is_runtime())
    }

    /// Dependencies used only while developing the package.
    pub fn development_dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies.iter().filter(|d| !d.is_runtime())
    }

    /// Add a runtime dependency.
    pub fn add_dependency(&mut self, name: impl Into<String>, requirement: Requirement) {
        self.dependencies
            .push(Dependency::runtime(name, requirement));
    }

    /// Add a development dependency.
    pub fn add_development_dependency(
        &mut self,
        name: impl Into<String>,
        requirement: Requirement,
    ) {
        self.dependencies
            .push(Dependency::development(name, requirement));
    }

    /// Runtime dependencies, sorted, for order-insensitive comparison.
    pub fn sorted_runtime_dependencies(&self) -> Vec<&Dependency> {
        let mut deps: Vec<&Dependency> = self.runtime_dependencies().collect();
        deps.sort();
        deps
    }

    /// Relative path of an executable inside the package directory.
    pub fn bin_file(&self, executable: &str) -> PathBuf {
        Path::new(&self.bindir).join(executable)
    }

    /// The form persisted after install: the on-disk layout is authoritative
    /// for the file listing, so the manifest is cleared.
    pub fn for_store(&self) -> Self {
        Self {
            files: BTreeSet::new(),
            loaded_from: None,
            ..self.clone()
        }
    }

    /// Parse a specification from TOML.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Parse`] if the content is not a valid
    /// specification, or [`SpecError::Invalid`] if a path field is unsafe.
    pub fn parse(content: &str) -> Result<Self, SpecError> {
        let spec: Self = toml::from_str(content)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Check every field that is joined into a filesystem path.
    ///
    /// Names and platforms are limited to `[A-Za-z0-9._-]`, executables to
    /// a single file name, and `bindir`, extensions and manifest files to
    /// relative paths without `..`.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), SpecError> {
        let invalid = |field: &'static str, value: &str| SpecError::Invalid {
            field,
            value: value.to_string(),
        };

        if !is_identifier(&self.name) {
            return Err(invalid("name", &self.name));
        }
        if !is_identifier(&self.platform) {
            return Err(invalid("platform", &self.platform));
        }
        if !is_relative_path(&self.bindir) {
            return Err(invalid("bindir", &self.bindir));
        }
        if let Some(exe) = self.executables.iter().find(|e| !is_file_name(e)) {
            return Err(invalid("executable", exe));
        }
        if let Some(ext) = self.extensions.iter().find(|e| !is_relative_path(e)) {
            return Err(invalid("extension", ext));
        }
        if let Some(file) = self.files.iter().find(|f| !is_relative_path(f)) {
            return Err(invalid("file", file));
        }
        Ok(())
    }

    /// Load a specification from disk, recording where it came from.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Io`] if the file cannot be read, or
    /// [`SpecError::Parse`] if its content is invalid.
    pub fn load(path: &Path) -> Result<Self, SpecError> {
        let content = fs::read_to_string(path)?;
        let mut spec = Self::parse(&content)?;
        spec.loaded_from = Some(path.to_path_buf());
        Ok(spec)
    }

    /// Serialize to pretty-printed TOML.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Serialize`] if serialization fails.
    pub fn to_toml(&self) -> Result<String, SpecError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        && s.chars().any(|c| c != '.')
}

fn is_file_name(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && !s.contains(['/', '\\', '\0'])
}

fn is_relative_path(s: &str) -> bool {
    if s.is_empty() || s.contains(['\\', '\0']) {
        return false;
    }
    let mut normal = false;
    for component in Path::new(s).components() {
        match component {
            Component::Normal(_) => normal = true,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    normal
}

impl PartialEq for Specification {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.version == other.version
            && self.platform == other.platform
            && self.summary == other.summary
            && self.source == other.source
            && self.bindir == other.bindir
            && self.files == other.files
            && self.executables == other.executables
            && self.extensions == other.extensions
            && self.required_runtime_version == other.required_runtime_version
            && self.required_manager_version == other.required_manager_version
            && self.post_install_message == other.post_install_message
            && self.dependencies == other.dependencies
    }
}

impl Eq for Specification {}

impl fmt::Display for Specification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}
