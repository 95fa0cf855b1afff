use anyhow::{Context, Result};
use gemkit_core::{InstallConfig, SpecStore};

use crate::ui::{list_header, list_row};

/// Search installed packages by exact name
pub fn search(config: &InstallConfig, name: &str, all: bool) -> Result<()> {
    let index = SpecStore::new(&config.gem_home)
        .load_index()
        .context("Failed to read installed specifications")?;

    let results = if all {
        index.search_all(name)
    } else {
        index.search(name)
    };

    if results.is_empty() {
        println!("  No gems found matching '{name}'");
        return Ok(());
    }

    println!("{}", list_header());
    for spec in &results {
        println!("{}", list_row(spec));
    }
    Ok(())
}
