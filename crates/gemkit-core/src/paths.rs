use dirs::home_dir;
use std::path::{Path, PathBuf};

/// Candidate locations of the `env` launcher, in preference order.
pub const ENV_PATHS: [&str; 2] = ["/usr/bin/env", "/bin/env"];

/// Name of the extension build log written inside each package directory.
pub const BUILD_LOG_NAME: &str = "gem_make.out";

/// Returns the install root, or None if the user's home cannot be resolved.
pub fn try_gem_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("GEM_HOME") {
        if !val.is_empty() {
            return Some(PathBuf::from(val));
        }
    }
    home_dir().map(|h| h.join(".gemkit"))
}

/// Returns the install root (`$GEM_HOME`, else `~/.gemkit`).
///
/// Falls back to `.gemkit` in the working directory when no home directory
/// can be resolved.
pub fn gem_home() -> PathBuf {
    try_gem_home().unwrap_or_else(|| PathBuf::from(".gemkit"))
}

/// Extracted packages: <root>/gems
pub fn gems_dir(root: &Path) -> PathBuf {
    root.join("gems")
}

/// Installed specifications: <root>/specifications
pub fn specifications_dir(root: &Path) -> PathBuf {
    root.join("specifications")
}

/// Cached package archives: <root>/cache
pub fn cache_dir(root: &Path) -> PathBuf {
    root.join("cache")
}

/// Default executable directory: <root>/bin
pub fn default_bin_dir(root: &Path) -> PathBuf {
    root.join("bin")
}

/// The `env` launcher on this host, defaulting to `/usr/bin/env`.
pub fn env_path() -> &'static str {
    ENV_PATHS
        .iter()
        .copied()
        .find(|p| Path::new(p).is_file())
        .unwrap_or(ENV_PATHS[0])
}

/// Whether `dir` appears in `$PATH`.
pub fn is_on_path(dir: &Path) -> bool {
    std::env::var_os("PATH")
        .is_some_and(|paths| std::env::split_paths(&paths).any(|p| p == dir))
}
