use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use gemkit_core::PackageFile;
use gemkit_schema::Specification;
use walkdir::{DirEntry, WalkDir};

/// Build a `.gem` archive from a TOML specification.
///
/// When the specification lists no files, every regular file under the
/// source tree is packaged, except hidden entries, the specification
/// itself, and previously built archives.
pub fn build(spec_path: &Path, source: Option<&Path>, output: &Path) -> Result<()> {
    let mut spec = Specification::load(spec_path)
        .with_context(|| format!("Failed to load {}", spec_path.display()))?;

    let root = match source {
        Some(dir) => dir.to_path_buf(),
        None => spec_path
            .parent()
            .map_or_else(|| Path::new(".").to_path_buf(), Path::to_path_buf),
    };

    if spec.files.is_empty() {
        spec.files = collect_files(&root, spec_path)?;
        tracing::debug!("collected {} files from {}", spec.files.len(), root.display());
    }

    let archive = PackageFile::build(&spec, &root, output)
        .with_context(|| format!("Failed to build {}", spec.full_name()))?;

    println!("  Built {}", archive.display());
    Ok(())
}

fn collect_files(root: &Path, exclude: &Path) -> Result<BTreeSet<String>> {
    let exclude = exclude.canonicalize().ok();
    let mut files = BTreeSet::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "gem") {
            continue;
        }
        if exclude.is_some() && path.canonicalize().ok() == exclude {
            continue;
        }
        let rel = path.strip_prefix(root).unwrap_or(path);
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.insert(rel);
    }
    Ok(files)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}
