//! Specification index and installation pipeline for gemkit.

pub mod archive;
pub mod builder;
pub mod config;
pub mod error;
pub mod executables;
pub mod hooks;
pub mod index;
pub mod installer;
pub mod paths;
pub mod reporter;
pub mod store;

pub use archive::{Archive, ArchiveError, PackageFile};
pub use builder::{
    BuildCommand, CommandOutput, CommandRunner, ExtensionBuilder, ExtensionBuilders,
    ProcessRunner,
};
pub use config::{Environment, InstallConfig};
pub use error::{InstallError, InstallStep};
pub use executables::ExecutableGenerator;
pub use hooks::{HookOutcome, HookPoint, HookRegistry};
pub use index::{Index, Query, Source};
pub use installer::Installer;
pub use reporter::{NullReporter, Reporter};
pub use store::SpecStore;
