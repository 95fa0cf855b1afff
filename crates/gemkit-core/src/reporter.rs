//! Reporter trait for dependency injection
//!
//! This trait allows the installer to report progress and status without
//! being coupled to a specific terminal UI.

use gemkit_schema::Version;

/// Receives user-facing progress from an install.
pub trait Reporter: Send + Sync {
    /// Indicates a new section or phase has started (e.g. "Building native extensions").
    fn section(&self, title: &str);

    /// Updates the state of a package to 'installing'.
    fn installing(&self, name: &str, version: &Version);

    /// Marks a package operation as successfully completed.
    fn done(&self, name: &str, version: &Version, detail: &str);

    /// Marks a package operation as failed with a specific reason.
    fn failed(&self, name: &str, version: &Version, reason: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Display a package's post-install message verbatim.
    fn message(&self, msg: &str);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title);
    }
    fn installing(&self, name: &str, version: &Version) {
        (**self).installing(name, version);
    }
    fn done(&self, name: &str, version: &Version, detail: &str) {
        (**self).done(name, version, detail);
    }
    fn failed(&self, name: &str, version: &Version, reason: &str) {
        (**self).failed(name, version, reason);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn message(&self, msg: &str) {
        (**self).message(msg);
    }
}

/// A no-op reporter for silent operations (e.g., testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn installing(&self, _: &str, _: &Version) {}
    fn done(&self, _: &str, _: &Version, _: &str) {}
    fn failed(&self, _: &str, _: &Version, _: &str) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn message(&self, _: &str) {}
}
