use anyhow::{Context, Result};
use gemkit_core::{InstallConfig, SpecStore};
use gemkit_schema::Specification;

use crate::ui::{list_footer, list_header, list_row};

/// List all installed packages
pub fn list(config: &InstallConfig, json: bool) -> Result<()> {
    let index = SpecStore::new(&config.gem_home)
        .load_index()
        .context("Failed to read installed specifications")?;
    let specs: Vec<&Specification> = index.iter().collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&specs)?);
        return Ok(());
    }

    if specs.is_empty() {
        println!();
        println!("  No gems installed in {}.", config.gem_home.display());
        return Ok(());
    }

    println!("{}", list_header());
    for spec in &specs {
        println!("{}", list_row(spec));
    }
    println!();
    println!("{}", list_footer(specs.len()));
    Ok(())
}
