//! Terminal output
//!
//! Column-aligned rendering for `gemkit list`/`gemkit search` and the
//! console [`Reporter`] used by `gemkit install`.

use crossterm::style::Stylize;
use gemkit_core::Reporter;
use gemkit_schema::{Specification, Version};

const NAME_WIDTH: usize = 24;
const VERSION_WIDTH: usize = 12;

/// Format the column header for `gemkit list`.
pub fn list_header() -> String {
    let header = format!(
        "  {:<NAME_WIDTH$} {:<VERSION_WIDTH$} {}",
        "name", "version", "summary",
    );
    header.dark_grey().to_string()
}

/// Format a single row for `gemkit list`.
pub fn list_row(spec: &Specification) -> String {
    let name_part = format!("{:<NAME_WIDTH$}", spec.name);
    let version = if spec.is_generic_platform() {
        spec.version.to_string()
    } else {
        format!("{} ({})", spec.version, spec.platform)
    };
    let version_part = format!("{version:<VERSION_WIDTH$}");
    format!(
        "  {} {} {}",
        name_part.cyan(),
        version_part.green(),
        spec.summary.as_str().dark_grey()
    )
}

/// Format the footer for `gemkit list`.
pub fn list_footer(count: usize) -> String {
    let noun = if count == 1 { "package" } else { "packages" };
    format!("  {count} {noun}").dark_grey().to_string()
}

/// Prints install progress to the terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter {
    quiet: bool,
}

impl ConsoleReporter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl Reporter for ConsoleReporter {
    fn section(&self, title: &str) {
        if !self.quiet {
            println!("{}", title.bold());
        }
    }

    fn installing(&self, name: &str, version: &Version) {
        if !self.quiet {
            println!("  {} {} {}", "+".cyan(), name, version.to_string().dark_grey());
        }
    }

    fn done(&self, name: &str, version: &Version, detail: &str) {
        if self.quiet {
            return;
        }
        if detail.is_empty() {
            println!("  {} {} {}", "✓".green(), name, version);
        } else {
            println!(
                "  {} {} {} {}",
                "✓".green(),
                name,
                version,
                detail.dark_grey()
            );
        }
    }

    fn failed(&self, name: &str, version: &Version, reason: &str) {
        eprintln!("  {} {} {} {}", "✗".red(), name, version, reason.red());
    }

    fn info(&self, msg: &str) {
        if !self.quiet {
            println!("{msg}");
        }
    }

    fn warning(&self, msg: &str) {
        eprintln!("{} {msg}", "WARNING:".yellow().bold());
    }

    fn message(&self, msg: &str) {
        println!("{msg}");
    }
}
