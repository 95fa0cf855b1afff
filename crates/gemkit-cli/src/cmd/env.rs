use anyhow::Result;
use crossterm::style::Stylize;
use gemkit_core::{Environment, InstallConfig, paths};

/// Show where packages go and what they are validated against
pub fn env(config: &InstallConfig) -> Result<()> {
    let environment = Environment::detect(&config.interpreter);
    let bin_dir = config.bin_dir();

    let rows = [
        ("gemkit version", environment.manager_version.to_string()),
        (
            "ruby version",
            format!(
                "{} ({})",
                environment.runtime_version,
                config.interpreter.display()
            ),
        ),
        ("install dir", config.gem_home.display().to_string()),
        ("executable dir", bin_dir.display().to_string()),
        ("platforms", environment.platforms.join(", ")),
    ];

    for (label, value) in rows {
        println!("  {} {}", format!("{label:<16}").dark_grey(), value);
    }

    if !paths::is_on_path(&bin_dir) {
        println!();
        println!(
            "  {} {} is not in your PATH",
            "!".yellow(),
            bin_dir.display()
        );
    }
    Ok(())
}
