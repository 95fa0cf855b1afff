//! Installed specification store (`<gem_home>/specifications`).
//!
//! One TOML file per installed package, named `<full_name>.gemspec`. The
//! stored form has its file manifest cleared. Writing a spec here is what
//! makes an install visible to later dependency checks.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use gemkit_schema::{SpecError, Specification};

use crate::index::Index;
use crate::paths;

/// Reads and writes installed specifications under one gem home.
#[derive(Debug, Clone)]
pub struct SpecStore {
    dir: PathBuf,
}

impl SpecStore {
    /// The store of the gem home at `gem_home`.
    pub fn new(gem_home: &Path) -> Self {
        Self {
            dir: paths::specifications_dir(gem_home),
        }
    }

    /// The `specifications` directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where `spec` is (or would be) stored.
    pub fn path_for(&self, spec: &Specification) -> PathBuf {
        self.dir.join(spec.spec_name())
    }

    /// Whether `spec` has been written.
    pub fn contains(&self, spec: &Specification) -> bool {
        self.path_for(spec).is_file()
    }

    /// Atomically persist `spec`, manifest cleared, returning the file path.
    ///
    /// The content goes to a temporary file first and is then renamed so
    /// readers never observe a partially written spec.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Invalid`] if the name or platform would place
    /// the file outside the store, or an error if serialization, writing,
    /// or the rename fails.
    pub fn write(&self, spec: &Specification) -> Result<PathBuf, SpecError> {
        spec.validate()?;
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(spec);
        let content = spec.for_store().to_toml()?;

        let temp_path = path.with_extension("gemspec.tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, &path)?;

        Ok(path)
    }

    /// Load every stored spec into a fresh [`Index`].
    ///
    /// A missing directory yields an empty index. Files that fail to parse
    /// are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be listed.
    pub fn load_index(&self) -> Result<Index, SpecError> {
        let mut index = Index::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(index),
            Err(e) => return Err(e.into()),
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "gemspec"))
            .collect();
        files.sort();

        for path in files {
            match Specification::load(&path) {
                Ok(spec) => {
                    index.add(spec);
                }
                Err(e) => tracing::warn!("skipping invalid spec {}: {e}", path.display()),
            }
        }

        tracing::debug!("loaded {} installed specs from {}", index.size(), self.dir.display());
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemkit_schema::Requirement;
    use tempfile::tempdir;

    #[test]
    fn test_write_clears_manifest() {
        let home = tempdir().unwrap();
        let store = SpecStore::new(home.path());
        let mut spec = Specification::new("a", "2".parse().unwrap());
        spec.files.insert("lib/a.rb".to_string());
        spec.add_dependency("b", "> 5".parse::<Requirement>().unwrap());

        let path = store.write(&spec).unwrap();

        assert_eq!(path, home.path().join("specifications/a-2.gemspec"));
        assert!(store.contains(&spec));
        assert!(!path.with_extension("gemspec.tmp").exists());

        let loaded = Specification::load(&path).unwrap();
        assert!(loaded.files.is_empty());
        assert_eq!(loaded.dependencies, spec.dependencies);
        assert_eq!(loaded.loaded_from.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_write_rejects_name_outside_store() {
        let home = tempdir().unwrap();
        let store = SpecStore::new(home.path());

        let err = store
            .write(&Specification::new("../escaped", "1".parse().unwrap()))
            .unwrap_err();

        assert!(matches!(err, SpecError::Invalid { field: "name", .. }));
        assert!(!home.path().join("escaped-1.gemspec").exists());
    }

    #[test]
    fn test_load_index_missing_dir_is_empty() {
        let home = tempdir().unwrap();
        let index = SpecStore::new(home.path()).load_index().unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_load_index_skips_invalid_files() {
        let home = tempdir().unwrap();
        let store = SpecStore::new(home.path());
        store
            .write(&Specification::new("a", "1".parse().unwrap()))
            .unwrap();
        store
            .write(&Specification::new("a", "2".parse().unwrap()))
            .unwrap();
        fs::write(store.dir().join("broken-1.gemspec"), "name = [").unwrap();
        fs::write(store.dir().join("notes.txt"), "ignored").unwrap();

        let index = store.load_index().unwrap();

        assert_eq!(index.size(), 2);
        assert!(index.search("broken").is_empty());
        assert!(index.search("a").iter().all(|s| s.loaded_from.is_some()));
    }
}
