//! Domain-specific errors for install operations

use std::fmt;
use std::path::PathBuf;

use gemkit_schema::{Dependency, Requirement, SpecError};
use thiserror::Error;

use crate::archive::ArchiveError;
use crate::hooks::HookPoint;

/// The ordered steps of an install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InstallStep {
    /// Runtime, manager, platform and dependency checks.
    Validate,
    /// Pre-install hooks.
    PreInstall,
    /// Unpacking the archive into the package directory.
    Extract,
    /// Native extension builds.
    BuildExtensions,
    /// Post-build hooks.
    PostBuild,
    /// Wrapper scripts or symlinks in the bin directory.
    GenerateExecutables,
    /// Persisting the specification and cached archive.
    WriteMetadata,
    /// Post-install hooks.
    PostInstall,
}

impl fmt::Display for InstallStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Validate => "validate",
            Self::PreInstall => "pre-install hooks",
            Self::Extract => "extract",
            Self::BuildExtensions => "build extensions",
            Self::PostBuild => "post-build hooks",
            Self::GenerateExecutables => "generate executables",
            Self::WriteMetadata => "write metadata",
            Self::PostInstall => "post-install hooks",
        })
    }
}

/// Every way an install can fail. None of these are retried.
#[derive(Error, Debug)]
pub enum InstallError {
    /// A runtime dependency has no satisfying installed package.
    #[error("{package} requires {dependency}")]
    DependencyUnsatisfied {
        /// Package being installed.
        package: String,
        /// First unsatisfied dependency.
        dependency: Dependency,
    },

    /// The running interpreter or package manager is outside the declared range.
    #[error("{package} requires {component} version {requirement}.")]
    VersionMismatch {
        /// Package being installed.
        package: String,
        /// What was checked (e.g. `Ruby`, `gemkit`).
        component: String,
        /// The declared requirement.
        requirement: Requirement,
    },

    /// The package targets a platform this environment does not accept.
    #[error("{package} is built for platform {platform}, which is not supported here")]
    IncompatiblePlatform {
        /// Package being installed.
        package: String,
        /// Declared platform.
        platform: String,
    },

    /// A hook callback returned `false`.
    #[error("{point} hook at {location} failed for {package}")]
    HookFailed {
        /// Which lifecycle point fired.
        point: HookPoint,
        /// Where the callback was registered (`file:line`).
        location: String,
        /// Full name of the package being installed.
        package: String,
    },

    /// A native extension failed to build.
    #[error("ERROR: Failed to build gem native extension.\n\n{tail}\n\nResults logged to {}", .log.display())]
    ExtensionBuild {
        /// Last lines of the build log.
        tail: String,
        /// Full build log.
        log: PathBuf,
    },

    /// The destination executable belongs to another package.
    #[error("\"{executable}\" from {package} conflicts with {existing}")]
    ExecutableConflict {
        /// Executable name.
        executable: String,
        /// Package being installed.
        package: String,
        /// Who owns the destination.
        existing: String,
    },

    /// The bin directory (or a file inside it) is not writable.
    #[error("You don't have write permissions for the {} directory.", .path.display())]
    FilePermission {
        /// Path that could not be written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The package archive could not be read or unpacked.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// The specification could not be serialized or read.
    #[error("Specification error: {0}")]
    Spec(#[from] SpecError),

    /// Any other filesystem failure.
    #[error("I/O error during {step} at {}: {source}", .path.display())]
    Io {
        /// Step that failed.
        step: InstallStep,
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl InstallError {
    /// Wrap an I/O error with the step and path it happened at.
    pub fn io(step: InstallStep, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            step,
            path: path.into(),
            source,
        }
    }

    /// The pipeline step this error belongs to.
    pub fn step(&self) -> InstallStep {
        match self {
            Self::DependencyUnsatisfied { .. }
            | Self::VersionMismatch { .. }
            | Self::IncompatiblePlatform { .. } => InstallStep::Validate,
            Self::HookFailed { point, .. } => point.step(),
            Self::ExtensionBuild { .. } => InstallStep::BuildExtensions,
            Self::ExecutableConflict { .. } | Self::FilePermission { .. } => {
                InstallStep::GenerateExecutables
            }
            Self::Archive(_) => InstallStep::Extract,
            Self::Spec(_) => InstallStep::WriteMetadata,
            Self::Io { step, .. } => *step,
        }
    }
}
