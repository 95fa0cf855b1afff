//! Executable entry points in the shared bin directory.
//!
//! For every executable a package declares, the generator either writes a
//! wrapper script (interpreter directive rewritten, version selection baked
//! in) or creates a symlink to the real file inside the package directory.
//!
//! Before touching a destination it works out who owns it:
//!
//! - a wrapper names its package on its `gem '<name>'` line,
//! - a symlink into `<gem_home>/gems/<full_name>/...` belongs to that package,
//! - anything else is a foreign file.
//!
//! Another package's executable is a conflict unless `force` is set. Foreign
//! files only conflict in the default bin directory; a bin directory the
//! user chose explicitly is taken over.

use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use gemkit_schema::{Requirement, Specification, Version};
use regex::Regex;

use crate::config::InstallConfig;
use crate::error::{InstallError, InstallStep};
use crate::index::Index;
use crate::paths;
use crate::reporter::Reporter;

/// Marker line present in every generated wrapper.
pub const WRAPPER_MARKER: &str = "This file was generated by RubyGems.";

/// Render the wrapper script for `executable` of `package`.
///
/// The text is fixed apart from the directive and names; tooling recognises
/// installed wrappers by it.
pub fn app_script_text(package: &str, executable: &str, shebang: &str) -> String {
    let default = Requirement::default();
    format!(
        r#"{shebang}
#
# {WRAPPER_MARKER}
#
# The application '{package}' is installed as part of a gem, and
# this file is here to facilitate running it.
#

require 'rubygems'

version = "{default}"

if ARGV.first
  str = ARGV.first
  str = str.dup.force_encoding("BINARY") if str.respond_to? :force_encoding
  if str =~ /\A_(.*)_\z/
    version = $1
    ARGV.shift
  end
end

gem '{package}', version
load Gem.bin_path('{package}', '{executable}', version)
"#
    )
}

/// Compute the interpreter directive for a wrapper.
///
/// `first_line` is the first line of the real executable, if any. Trailing
/// arguments of a recognised directive (`#!/usr/bin/env ruby18 -ws` keeps
/// ` -ws`) survive the rewrite; the interpreter path and any version suffix
/// are replaced by [`InstallConfig::interpreter`].
pub fn shebang(
    config: &InstallConfig,
    first_line: Option<&str>,
    package: &str,
    executable: &str,
) -> String {
    let interpreter = config.interpreter.display().to_string();
    let line = first_line.map(str::trim_end).filter(|l| l.starts_with("#!"));
    let opts = line
        .and_then(|l| directive_args(l, &config.interpreter_name))
        .unwrap_or_default();

    if let Some(template) = &config.custom_shebang {
        let expanded = expand_template(template, |token| match token {
            "env" => Some(paths::env_path().to_string()),
            "ruby" => Some(format!("{interpreter}{opts}")),
            "exec" => Some(executable.to_string()),
            "name" => Some(package.to_string()),
            "args" => Some(opts.trim_start().to_string()),
            _ => None,
        });
        return format!("#!{expanded}");
    }

    if !config.env_shebang {
        return format!("#!{interpreter}{opts}");
    }

    if opts.is_empty() {
        format!("#!{} {}", paths::env_path(), config.interpreter_name)
    } else {
        // env cannot pass arguments portably; re-exec through sh instead.
        format!(
            "#!/bin/sh\n'exec' \"{}\" '-x' \"$0\" \"$@\"\n#!{interpreter}{opts}",
            config.interpreter_name
        )
    }
}

/// The trailing arguments of a directive naming `interpreter_name`,
/// including their leading whitespace.
fn directive_args(line: &str, interpreter_name: &str) -> Option<String> {
    let pattern = format!(r"\A#!.*?{}\S*((\s+\S+)+)", regex::escape(interpreter_name));
    let re = Regex::new(&pattern).ok()?;
    re.captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Replace `$word` tokens; unknown tokens expand to nothing.
fn expand_template(template: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        if len == 0 {
            out.push('$');
        } else {
            out.push_str(&lookup(&after[..len]).unwrap_or_default());
        }
        rest = &after[len..];
    }
    out.push_str(rest);
    out
}

/// Who currently owns a destination path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Owner {
    /// A wrapper or symlink belonging to the named package.
    Package {
        name: String,
        version: Option<Version>,
    },
    /// Something this tool did not create.
    Foreign,
}

/// Generates the bin directory entries for one package.
pub struct ExecutableGenerator<'a> {
    spec: &'a Specification,
    gem_dir: &'a Path,
    config: &'a InstallConfig,
    installed: &'a Index,
    reporter: &'a dyn Reporter,
    symlinks_supported: bool,
}

impl<'a> ExecutableGenerator<'a> {
    /// A generator for `spec`, extracted into `gem_dir`. `installed` is used
    /// to attribute existing symlinks to packages.
    pub fn new(
        spec: &'a Specification,
        gem_dir: &'a Path,
        config: &'a InstallConfig,
        installed: &'a Index,
        reporter: &'a dyn Reporter,
    ) -> Self {
        Self {
            spec,
            gem_dir,
            config,
            installed,
            reporter,
            symlinks_supported: cfg!(unix),
        }
    }

    /// Override whether the platform can create symlinks.
    #[must_use]
    pub fn symlinks_supported(mut self, supported: bool) -> Self {
        self.symlinks_supported = supported;
        self
    }

    /// Create an entry point for every declared executable.
    ///
    /// Returns the destination paths written. Nothing (not even the bin
    /// directory) is created for a package without executables.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::ExecutableConflict`] when a destination is
    /// owned by another package, [`InstallError::FilePermission`] when the
    /// bin directory cannot be written, or an I/O error otherwise.
    pub fn generate(&self) -> Result<Vec<PathBuf>, InstallError> {
        if self.spec.executables.is_empty() {
            return Ok(Vec::new());
        }
        self.spec.validate()?;

        let bin_dir = self.config.bin_dir();
        fs::create_dir_all(&bin_dir).map_err(|source| InstallError::FilePermission {
            path: bin_dir.clone(),
            source,
        })?;

        let wrappers = self.config.wrappers || !self.symlinks_supported;
        if !self.config.wrappers && !self.symlinks_supported {
            let msg = format!(
                "Unable to use symlinks on {}, installing wrapper",
                std::env::consts::OS
            );
            tracing::warn!("{msg}");
            self.reporter.warning(&msg);
        }

        let mut generated = Vec::new();
        for executable in &self.spec.executables {
            let source = self.gem_dir.join(self.spec.bin_file(executable));
            if !source.is_file() {
                self.reporter.warning(&format!(
                    "`{}` does not exist, skipping executable {executable}",
                    source.display()
                ));
                continue;
            }
            make_executable(&source)?;

            let dest = bin_dir.join(self.config.formatted_program_filename(executable));
            let owner = self.check_overwrite(executable, &dest, &bin_dir)?;

            if wrappers {
                self.write_wrapper(executable, &source, &dest, &bin_dir)?;
            } else if !self.link(&source, &dest, &bin_dir, owner.as_ref())? {
                continue;
            }
            generated.push(dest);
        }

        Ok(generated)
    }

    /// Fail if `dest` belongs to someone else. Returns the current owner.
    fn check_overwrite(
        &self,
        executable: &str,
        dest: &Path,
        bin_dir: &Path,
    ) -> Result<Option<Owner>, InstallError> {
        let owner = match fs::symlink_metadata(dest) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let target = fs::read_link(dest).map_err(write_error(bin_dir, dest))?;
                let target = if target.is_relative() {
                    bin_dir.join(target)
                } else {
                    target
                };
                self.symlink_owner(&target)
            }
            Ok(_) => wrapper_owner(dest),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(write_error(bin_dir, dest)(e)),
        };

        if self.config.force {
            return Ok(Some(owner));
        }

        let conflict = match &owner {
            Owner::Package { name, .. } if *name == self.spec.name => None,
            Owner::Package { name, .. } => Some(format!("installed executable from {name}")),
            Owner::Foreign if self.config.bin_dir.is_some() => None,
            Owner::Foreign => Some(dest.display().to_string()),
        };

        match conflict {
            None => Ok(Some(owner)),
            Some(existing) => Err(InstallError::ExecutableConflict {
                executable: executable.to_string(),
                package: self.spec.name.clone(),
                existing,
            }),
        }
    }

    /// Attribute a symlink target under `<gem_home>/gems/` to a package.
    fn symlink_owner(&self, target: &Path) -> Owner {
        let gems_dir = paths::gems_dir(&self.config.gem_home);
        let Some(dir) = target
            .strip_prefix(&gems_dir)
            .ok()
            .and_then(|rest| rest.components().next())
            .and_then(|c| c.as_os_str().to_str())
        else {
            return Owner::Foreign;
        };

        if let Some(spec) = self.installed.iter().find(|s| s.full_name() == dir) {
            return Owner::Package {
                name: spec.name.clone(),
                version: Some(spec.version.clone()),
            };
        }

        split_full_name(dir).map_or(Owner::Foreign, |(name, version)| Owner::Package {
            name: name.to_string(),
            version,
        })
    }

    fn write_wrapper(
        &self,
        executable: &str,
        source: &Path,
        dest: &Path,
        bin_dir: &Path,
    ) -> Result<(), InstallError> {
        // Writing through a symlink left by a symlink-mode install would
        // overwrite the real executable.
        if fs::symlink_metadata(dest).is_ok_and(|m| m.file_type().is_symlink()) {
            fs::remove_file(dest).map_err(write_error(bin_dir, dest))?;
        }

        let first = first_line(source)
            .map_err(|e| InstallError::io(InstallStep::GenerateExecutables, source, e))?;
        let directive = shebang(self.config, first.as_deref(), &self.spec.name, executable);
        let text = app_script_text(&self.spec.name, executable, &directive);

        fs::write(dest, text).map_err(write_error(bin_dir, dest))?;
        set_mode(dest, 0o755).map_err(write_error(bin_dir, dest))?;

        tracing::debug!("installed wrapper {}", dest.display());
        Ok(())
    }

    /// Point `dest` at `source`. Returns `false` when an existing link to a
    /// newer version of this package was left in place.
    fn link(
        &self,
        source: &Path,
        dest: &Path,
        bin_dir: &Path,
        owner: Option<&Owner>,
    ) -> Result<bool, InstallError> {
        if let Some(Owner::Package {
            name,
            version: Some(existing),
        }) = owner
        {
            let is_symlink = fs::symlink_metadata(dest).is_ok_and(|m| m.file_type().is_symlink());
            if is_symlink && *name == self.spec.name && *existing > self.spec.version {
                tracing::debug!(
                    "{} already links to {name} {existing}, not moving back to {}",
                    dest.display(),
                    self.spec.version
                );
                return Ok(false);
            }
        }

        if owner.is_some() {
            fs::remove_file(dest).map_err(write_error(bin_dir, dest))?;
        }
        symlink(source, dest).map_err(write_error(bin_dir, dest))?;

        tracing::debug!("linked {} -> {}", dest.display(), source.display());
        Ok(true)
    }
}

impl std::fmt::Debug for ExecutableGenerator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutableGenerator")
            .field("spec", &self.spec.full_name())
            .field("gem_dir", &self.gem_dir)
            .field("symlinks_supported", &self.symlinks_supported)
            .finish_non_exhaustive()
    }
}

/// The package named on a wrapper's `gem '<name>'` line.
fn wrapper_owner(path: &Path) -> Owner {
    let Ok(bytes) = fs::read(path) else {
        return Owner::Foreign;
    };
    let text = String::from_utf8_lossy(&bytes);
    if !text.contains(WRAPPER_MARKER) {
        return Owner::Foreign;
    }
    text.lines()
        .find_map(|line| line.strip_prefix("gem '"))
        .and_then(|rest| rest.split('\'').next())
        .map_or(Owner::Foreign, |name| Owner::Package {
            name: name.to_string(),
            version: None,
        })
}

/// Split `name-version[-platform]` at the first `-` followed by a digit.
fn split_full_name(full_name: &str) -> Option<(&str, Option<Version>)> {
    let idx = full_name
        .match_indices('-')
        .map(|(i, _)| i)
        .find(|&i| full_name[i + 1..].starts_with(|c: char| c.is_ascii_digit()))?;
    let version = full_name[idx + 1..]
        .split('-')
        .next()
        .and_then(|v| v.parse().ok());
    Some((&full_name[..idx], version))
}

fn first_line(path: &Path) -> io::Result<Option<String>> {
    let mut line = Vec::new();
    let read = BufReader::new(fs::File::open(path)?).read_until(b'\n', &mut line)?;
    Ok((read > 0).then(|| String::from_utf8_lossy(&line).into_owned()))
}

fn write_error<'p>(bin_dir: &'p Path, path: &'p Path) -> impl FnOnce(io::Error) -> InstallError + 'p {
    move |source| {
        if source.kind() == io::ErrorKind::PermissionDenied {
            InstallError::FilePermission {
                path: bin_dir.to_path_buf(),
                source,
            }
        } else {
            InstallError::io(InstallStep::GenerateExecutables, path, source)
        }
    }
}

/// Add execute bits to the real executable.
fn make_executable(path: &Path) -> Result<(), InstallError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(path)
            .map_err(|e| InstallError::io(InstallStep::GenerateExecutables, path, e))?
            .permissions()
            .mode();
        set_mode(path, mode | 0o111)
            .map_err(|e| InstallError::io(InstallStep::GenerateExecutables, path, e))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn symlink(source: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, dest)
}

#[cfg(not(unix))]
fn symlink(_source: &Path, _dest: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks are not supported on this platform",
    ))
}
