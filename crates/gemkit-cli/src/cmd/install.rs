use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use gemkit_core::{Environment, HookRegistry, Index, InstallConfig, Installer, Reporter};

use crate::ui::ConsoleReporter;

/// Install archives in order; each one sees the packages installed before it.
pub fn install(archives: &[PathBuf], config: InstallConfig, quiet: bool) -> Result<()> {
    let reporter: Arc<dyn Reporter> = Arc::new(ConsoleReporter::new(quiet));
    let hooks = Arc::new(HookRegistry::default());
    let environment = (!config.force).then(|| Environment::detect(&config.interpreter));

    let mut index: Option<Index> = None;
    let mut installed = 0usize;

    for path in archives {
        tracing::debug!("installing {}", path.display());

        let mut installer = Installer::open(path.clone(), config.clone())
            .with_context(|| format!("Failed to open {}", path.display()))?
            .with_hooks(Arc::clone(&hooks))
            .with_reporter(Arc::clone(&reporter));
        if let Some(env) = &environment {
            installer = installer.with_environment(env.clone());
        }
        if let Some(index) = index.take() {
            installer = installer.with_index(index);
        }

        installer
            .install()
            .with_context(|| format!("Failed to install {}", path.display()))?;
        installed += 1;
        index = Some(installer.into_index());
    }

    let noun = if installed == 1 { "gem" } else { "gems" };
    reporter.info(&format!("{installed} {noun} installed"));
    Ok(())
}
