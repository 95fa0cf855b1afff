//! gemkit - install Ruby gem packages
//!
//! # Directory Layout
//!
//! ```text
//! $GEM_HOME (default ~/.gemkit)
//! ├── bin/             # Wrapper scripts or symlinks
//! ├── gems/            # Extracted packages, one dir per full name
//! ├── specifications/  # Installed specs (<full_name>.gemspec)
//! └── cache/           # Installed archives (<full_name>.gem)
//! ```
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]

pub mod cmd;
pub mod ui;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gemkit_core::InstallConfig;

#[derive(Debug, Parser)]
#[command(name = "gemkit")]
#[command(author, version, about = "gemkit - install Ruby gem packages")]
pub struct Cli {
    /// Read install options from this TOML file
    #[arg(long, global = true, env = "GEMKIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Install root (overrides the config file and $GEM_HOME)
    #[arg(long, short = 'i', global = true)]
    pub install_dir: Option<PathBuf>,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Install one or more package archives, in order
    Install {
        /// Paths to .gem archives
        #[arg(required = true)]
        archives: Vec<PathBuf>,
        /// Directory for generated executables
        #[arg(long, short = 'n')]
        bin_dir: Option<PathBuf>,
        /// Skip validation and overwrite conflicting executables
        #[arg(long, short = 'f')]
        force: bool,
        /// Do not check that runtime dependencies are installed
        #[arg(long)]
        ignore_dependencies: bool,
        /// Symlink executables instead of writing wrapper scripts
        #[arg(long)]
        no_wrappers: bool,
        /// Use /usr/bin/env in wrapper directives
        #[arg(long)]
        env_shebang: bool,
        /// Apply the configured exec_format to executable names
        #[arg(long)]
        format_executable: bool,
        /// Extra argument for extension builds (repeatable)
        #[arg(long = "build-arg", allow_hyphen_values = true)]
        build_args: Vec<String>,
    },
    /// List installed packages
    List {
        /// Print specifications as JSON
        #[arg(long)]
        json: bool,
    },
    /// Search installed packages by name
    Search {
        /// Package name
        name: String,
        /// Include superseded entries
        #[arg(long)]
        all: bool,
    },
    /// Build a package archive from a specification file
    Build {
        /// Path to a TOML specification
        spec: PathBuf,
        /// Source tree (defaults to the specification's directory)
        #[arg(long, short = 's')]
        source: Option<PathBuf>,
        /// Output directory
        #[arg(long, short = 'o', default_value = ".")]
        output: PathBuf,
    },
    /// Show the install environment
    Env,
}

/// Load the base configuration: the `--config` file when given, defaults
/// otherwise, with `--install-dir` applied on top.
pub fn load_config(path: Option<&Path>, install_dir: Option<&Path>) -> Result<InstallConfig> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            InstallConfig::from_toml(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        }
        None => InstallConfig::default(),
    };
    if let Some(dir) = install_dir {
        config.gem_home = dir.to_path_buf();
    }
    Ok(config)
}
