//! Lifecycle hooks fired by the [`Installer`].
//!
//! A [`HookRegistry`] is built once (typically at process start), wrapped in
//! an `Arc`, and handed to every installer that should observe it. Callbacks
//! persist for the lifetime of the registry; there is no way to remove one.
//!
//! Callbacks run in registration order on the installer's thread. Returning
//! `false` halts the remaining callbacks at that point and fails the install
//! step; `true`, `()` and `None` all count as success.

use std::fmt;
use std::panic::Location;

use crate::error::{InstallError, InstallStep};
use crate::installer::Installer;

/// The three points at which hooks fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// Before any filesystem mutation.
    PreInstall,
    /// After extraction and extension builds, before metadata is written.
    PostBuild,
    /// After metadata is written.
    PostInstall,
}

impl HookPoint {
    /// The install step whose failure this hook point represents.
    pub fn step(self) -> InstallStep {
        match self {
            Self::PreInstall => InstallStep::PreInstall,
            Self::PostBuild => InstallStep::PostBuild,
            Self::PostInstall => InstallStep::PostInstall,
        }
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PreInstall => "pre-install",
            Self::PostBuild => "post-build",
            Self::PostInstall => "post-install",
        })
    }
}

/// What a callback reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// Continue.
    Proceed,
    /// Stop the remaining callbacks and fail the step.
    Halt,
    /// No opinion; treated like [`HookOutcome::Proceed`].
    Unspecified,
}

impl HookOutcome {
    fn halts(self) -> bool {
        self == Self::Halt
    }
}

impl From<bool> for HookOutcome {
    fn from(ok: bool) -> Self {
        if ok { Self::Proceed } else { Self::Halt }
    }
}

impl From<()> for HookOutcome {
    fn from((): ()) -> Self {
        Self::Unspecified
    }
}

impl From<Option<bool>> for HookOutcome {
    fn from(value: Option<bool>) -> Self {
        value.map_or(Self::Unspecified, Self::from)
    }
}

type Callback = Box<dyn Fn(&Installer) -> HookOutcome + Send + Sync>;

struct Hook {
    callback: Callback,
    location: &'static Location<'static>,
}

impl Hook {
    fn new<F, R>(f: F, location: &'static Location<'static>) -> Self
    where
        F: Fn(&Installer) -> R + Send + Sync + 'static,
        R: Into<HookOutcome>,
    {
        Self {
            callback: Box::new(move |installer| f(installer).into()),
            location,
        }
    }
}

/// Ordered callbacks for each [`HookPoint`].
#[derive(Default)]
pub struct HookRegistry {
    pre_install: Vec<Hook>,
    post_build: Vec<Hook>,
    post_install: Vec<Hook>,
}

impl HookRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback fired before anything touches the disk.
    #[track_caller]
    pub fn pre_install<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&Installer) -> R + Send + Sync + 'static,
        R: Into<HookOutcome>,
    {
        self.pre_install.push(Hook::new(f, Location::caller()));
        self
    }

    /// Register a callback fired once extensions are built.
    #[track_caller]
    pub fn post_build<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&Installer) -> R + Send + Sync + 'static,
        R: Into<HookOutcome>,
    {
        self.post_build.push(Hook::new(f, Location::caller()));
        self
    }

    /// Register a callback fired after the install is committed.
    #[track_caller]
    pub fn post_install<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&Installer) -> R + Send + Sync + 'static,
        R: Into<HookOutcome>,
    {
        self.post_install.push(Hook::new(f, Location::caller()));
        self
    }

    /// Number of callbacks registered at `point`.
    pub fn len(&self, point: HookPoint) -> usize {
        self.hooks(point).len()
    }

    /// Whether nothing at all is registered.
    pub fn is_empty(&self) -> bool {
        self.pre_install.is_empty() && self.post_build.is_empty() && self.post_install.is_empty()
    }

    /// Run every callback at `point` in order.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::HookFailed`] naming the registration site of
    /// the first callback that halted. Later callbacks are not run.
    pub fn run(&self, point: HookPoint, installer: &Installer) -> Result<(), InstallError> {
        for hook in self.hooks(point) {
            if (hook.callback)(installer).halts() {
                return Err(InstallError::HookFailed {
                    point,
                    location: format!("{}:{}", hook.location.file(), hook.location.line()),
                    package: installer.spec().full_name(),
                });
            }
        }
        Ok(())
    }

    fn hooks(&self, point: HookPoint) -> &[Hook] {
        match point {
            HookPoint::PreInstall => &self.pre_install,
            HookPoint::PostBuild => &self.post_build,
            HookPoint::PostInstall => &self.post_install,
        }
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("pre_install", &self.pre_install.len())
            .field("post_build", &self.post_build.len())
            .field("post_install", &self.post_install.len())
            .finish()
    }
}
