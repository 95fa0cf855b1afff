//! Shared types for gemkit: versions, requirements and package
//! specifications.

pub mod spec;
pub mod version;

// Re-exports
pub use spec::{Dependency, DependencyKind, GENERIC_PLATFORM, SpecError, Specification};
pub use version::{Op, Requirement, Version, VersionError};
