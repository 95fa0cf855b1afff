//! Package archives.
//!
//! A package is a gzip-compressed tar holding `metadata.toml` (the
//! [`Specification`], manifest included) and one `data/<path>` entry per
//! manifest file. File modes are carried in the tar headers.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use gemkit_schema::{SpecError, Specification};
use thiserror::Error;

const METADATA_ENTRY: &str = "metadata.toml";
const DATA_PREFIX: &str = "data";

/// Errors reading, building or unpacking an archive.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Filesystem error while touching `path`.
    #[error("IO error at {}: {source}", .path.display())]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The archive has no `metadata.toml` entry.
    #[error("{} is not a package: no {METADATA_ENTRY}", .0.display())]
    MissingMetadata(PathBuf),

    /// The embedded specification could not be read or written.
    #[error("Invalid metadata in {}: {source}", .path.display())]
    Metadata {
        /// Archive path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: SpecError,
    },

    /// An entry would escape the extraction directory.
    #[error("Invalid path in archive: {0}")]
    UnsafePath(String),

    /// A manifest file is missing from the build source tree.
    #[error("{file} is listed in the manifest but missing from {}", .root.display())]
    MissingFile {
        /// Manifest entry.
        file: String,
        /// Directory it was looked up in.
        root: PathBuf,
    },
}

impl ArchiveError {
    fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

/// Read access to a package, as consumed by the installer.
pub trait Archive: fmt::Debug + Send + Sync {
    /// Where the archive lives; copied into the cache after install.
    fn path(&self) -> &Path;

    /// The embedded specification.
    fn specification(&self) -> &Specification;

    /// The declared file manifest.
    fn files(&self) -> Vec<String> {
        self.specification().files.iter().cloned().collect()
    }

    /// Unpack every data entry under `dir`, creating it if needed. Only
    /// regular files and directories are created.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be read, an entry path is
    /// unsafe, or a file cannot be written.
    fn extract_to(&self, dir: &Path) -> Result<Vec<PathBuf>, ArchiveError>;
}

/// A package archive on disk.
#[derive(Debug, Clone)]
pub struct PackageFile {
    path: PathBuf,
    spec: Specification,
}

impl PackageFile {
    /// Open an archive and read its specification.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unreadable, is not a gzip tar, or has
    /// no valid `metadata.toml`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
        let path = path.into();
        let mut archive = open_tar(&path)?;

        for entry in archive.entries().map_err(ArchiveError::io(&path))? {
            let mut entry = entry.map_err(ArchiveError::io(&path))?;
            let is_metadata = entry
                .path()
                .map_err(ArchiveError::io(&path))?
                .as_os_str()
                == METADATA_ENTRY;
            if !is_metadata {
                continue;
            }

            let mut content = String::new();
            entry
                .read_to_string(&mut content)
                .map_err(ArchiveError::io(&path))?;
            let spec = Specification::parse(&content).map_err(|source| ArchiveError::Metadata {
                path: path.clone(),
                source,
            })?;
            return Ok(Self { path, spec });
        }

        Err(ArchiveError::MissingMetadata(path))
    }

    /// Pack `spec` and its manifest files (read from `source_root`) into
    /// `<out_dir>/<file_name>`, returning the archive path.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Metadata`] if a path field of `spec` is
    /// unsafe, [`ArchiveError::MissingFile`] if a manifest entry does not
    /// exist under `source_root`, or an I/O error if writing fails.
    pub fn build(
        spec: &Specification,
        source_root: &Path,
        out_dir: &Path,
    ) -> Result<PathBuf, ArchiveError> {
        let out = out_dir.join(spec.file_name());
        spec.validate().map_err(|source| ArchiveError::Metadata {
            path: out.clone(),
            source,
        })?;
        fs::create_dir_all(out_dir).map_err(ArchiveError::io(out_dir))?;

        let metadata = spec.to_toml().map_err(|source| ArchiveError::Metadata {
            path: out.clone(),
            source,
        })?;

        let file = File::create(&out).map_err(ArchiveError::io(&out))?;
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

        let mut header = tar::Header::new_gnu();
        header.set_size(metadata.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, METADATA_ENTRY, metadata.as_bytes())
            .map_err(ArchiveError::io(&out))?;

        for name in &spec.files {
            let relative = safe_relative(name)?;
            let source = source_root.join(&relative);
            if !source.is_file() {
                return Err(ArchiveError::MissingFile {
                    file: name.clone(),
                    root: source_root.to_path_buf(),
                });
            }
            builder
                .append_path_with_name(&source, Path::new(DATA_PREFIX).join(&relative))
                .map_err(ArchiveError::io(&source))?;
        }

        builder
            .into_inner()
            .and_then(GzEncoder::finish)
            .map_err(ArchiveError::io(&out))?;

        tracing::debug!("built {} ({} files)", out.display(), spec.files.len());
        Ok(out)
    }
}

impl Archive for PackageFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn specification(&self) -> &Specification {
        &self.spec
    }

    fn extract_to(&self, dir: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
        fs::create_dir_all(dir).map_err(ArchiveError::io(dir))?;
        let mut archive = open_tar(&self.path)?;
        let mut extracted = Vec::new();

        for entry in archive.entries().map_err(ArchiveError::io(&self.path))? {
            let mut entry = entry.map_err(ArchiveError::io(&self.path))?;
            let entry_path = entry
                .path()
                .map_err(ArchiveError::io(&self.path))?
                .into_owned();

            let Ok(relative) = entry_path.strip_prefix(DATA_PREFIX) else {
                continue;
            };
            if relative.as_os_str().is_empty() {
                continue;
            }
            let relative = safe_relative(&relative.to_string_lossy())?;

            let kind = entry.header().entry_type();
            if kind.is_dir() {
                let target = dir.join(&relative);
                fs::create_dir_all(&target).map_err(ArchiveError::io(&target))?;
                continue;
            }
            // Links could redirect later entries outside `dir`.
            if !kind.is_file() {
                tracing::warn!(
                    "skipping {:?} entry {} in {}",
                    kind,
                    entry_path.display(),
                    self.path.display()
                );
                continue;
            }

            let target = dir.join(&relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(ArchiveError::io(parent))?;
            }
            entry.unpack(&target).map_err(ArchiveError::io(&target))?;
            extracted.push(relative);
        }

        tracing::debug!(
            "extracted {} files from {} into {}",
            extracted.len(),
            self.path.display(),
            dir.display()
        );
        Ok(extracted)
    }
}

fn open_tar(path: &Path) -> Result<tar::Archive<GzDecoder<BufReader<File>>>, ArchiveError> {
    let file = File::open(path).map_err(ArchiveError::io(path))?;
    Ok(tar::Archive::new(GzDecoder::new(BufReader::new(file))))
}

/// Reject absolute paths and `..` so entries stay inside the target.
fn safe_relative(name: &str) -> Result<PathBuf, ArchiveError> {
    let path = Path::new(name);
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ArchiveError::UnsafePath(name.to_string()));
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(ArchiveError::UnsafePath(name.to_string()));
    }
    Ok(clean)
}
