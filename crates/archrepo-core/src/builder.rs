//! Build orchestration.
//!
//! Runs the external package builder (`makepkg` by default) once per
//! catalog package, sequentially and in catalog order, with the package's
//! recipe directory as working directory. Whatever the builder leaves behind
//! as `*.pkg.tar.zst` / `*.pkg.tar.xz` is copied to the output directory.
//!
//! A failing package never stops the run: every package ends up in exactly
//! one of [`BuildReport::succeeded`] and [`BuildReport::failed`].

use std::path::{Path, PathBuf};

use archrepo_schema::PackageName;

use crate::catalog::Catalog;
use crate::command::{ToolCommand, read_last_lines};
use crate::generator::RECIPE_FILE;
use crate::paths::RepoLayout;

/// Builder invocation used when none is configured.
pub const DEFAULT_BUILD_COMMAND: &str = "makepkg --syncdeps --force --noconfirm";

/// Per-package build log, written next to the recipe.
pub const BUILD_LOG: &str = "build.log";

/// Package archive extensions pacman accepts.
pub const PACKAGE_EXTENSIONS: [&str; 2] = ["pkg.tar.zst", "pkg.tar.xz"];

const LOG_TAIL_LINES: usize = 20;

/// Errors building one package.
#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    /// The package has no generated recipe.
    #[error("recipe not found: {0}")]
    MissingRecipe(PathBuf),

    /// The builder could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The builder exited with a failure status.
    #[error("build failed: {}", exit_description(.code))]
    ToolFailed {
        /// Exit code, `None` when killed by a signal.
        code: Option<i32>,
    },

    /// The builder succeeded but left no package archive.
    #[error("build succeeded but produced no package in {0}")]
    NoArtifactProduced(PathBuf),

    /// Filesystem error around the build.
    #[error("{path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Parts of a package archive file name:
/// `<name>-<pkgver>-<pkgrel>-<arch>.pkg.tar.<ext>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    /// Package name.
    pub name: String,
    /// `pkgver-pkgrel`.
    pub version: String,
    /// Architecture tag (`x86_64`, `aarch64`, `any`).
    pub arch: String,
}

impl ArtifactName {
    /// Split an archive file name. Returns `None` for anything that is not
    /// a package archive (signatures included).
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = PACKAGE_EXTENSIONS
            .iter()
            .find_map(|ext| file_name.strip_suffix(&format!(".{ext}")))?;

        let mut parts = stem.rsplitn(4, '-');
        let arch = parts.next()?;
        let pkgrel = parts.next()?;
        let pkgver = parts.next()?;
        let name = parts.next()?;
        if [name, pkgver, pkgrel, arch].iter().any(|p| p.is_empty()) {
            return None;
        }

        Some(Self {
            name: name.to_string(),
            version: format!("{pkgver}-{pkgrel}"),
            arch: arch.to_string(),
        })
    }
}

/// Package archives directly inside `dir`, sorted by path.
///
/// # Errors
///
/// Returns an error if the directory cannot be listed.
pub fn find_artifacts(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let base = glob::Pattern::escape(&dir.to_string_lossy());
    let mut found = Vec::new();

    for ext in PACKAGE_EXTENSIONS {
        let pattern = format!("{base}/*.{ext}");
        let paths = glob::glob(&pattern)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        for path in paths {
            let path = path.map_err(std::io::Error::from)?;
            if path.is_file() {
                found.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}

/// Result of a build run.
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Built packages with the archives copied to the output directory.
    pub succeeded: Vec<(PackageName, Vec<PathBuf>)>,
    /// Packages that failed, with the reason.
    pub failed: Vec<(PackageName, BuildError)>,
}

impl BuildReport {
    /// Whether any package failed.
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Runs the package builder over generated recipes.
#[derive(Debug, Clone)]
pub struct Builder {
    command: ToolCommand,
    recipes_dir: PathBuf,
    output_dir: PathBuf,
    verbose: bool,
}

impl Builder {
    /// Builder reading recipes from and writing packages to the layout's
    /// directories.
    pub fn new(command: ToolCommand, layout: &RepoLayout) -> Self {
        Self {
            command,
            recipes_dir: layout.recipes_dir(),
            output_dir: layout.output_dir(),
            verbose: false,
        }
    }

    /// Stream builder output to the terminal instead of `build.log`.
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Output directory packages are copied to.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Build every catalog package in order.
    pub fn build_all(&self, catalog: &Catalog) -> BuildReport {
        let mut report = BuildReport::default();
        let total = catalog.len();

        for (i, entry) in catalog.entries().iter().enumerate() {
            tracing::info!(package = %entry.name, "Building ({}/{total})", i + 1);
            match self.build_package(entry.name.as_str()) {
                Ok(artifacts) => {
                    tracing::info!(package = %entry.name, artifacts = artifacts.len(), "built");
                    report.succeeded.push((entry.name.clone(), artifacts));
                }
                Err(e) => {
                    tracing::warn!(package = %entry.name, "build failed: {e}");
                    report.failed.push((entry.name.clone(), e));
                }
            }
        }

        report
    }

    /// Build one package and copy its archives to the output directory.
    ///
    /// # Errors
    ///
    /// Returns a [`BuildError`] if the recipe is missing, the builder fails
    /// or produces nothing, or the archives cannot be copied.
    pub fn build_package(&self, name: &str) -> Result<Vec<PathBuf>, BuildError> {
        let dir = self.recipes_dir.join(name);
        let recipe = dir.join(RECIPE_FILE);
        if !recipe.is_file() {
            return Err(BuildError::MissingRecipe(recipe));
        }

        clean_artifacts(&dir)?;

        let log_path = dir.join(BUILD_LOG);
        let log = (!self.verbose).then_some(log_path.as_path());
        let status = self
            .command
            .run_in(&dir, &[], log)
            .map_err(|source| BuildError::Spawn {
                program: self.command.program().to_string(),
                source,
            })?;

        if !status.success() {
            if !self.verbose {
                if let Ok(tail) = read_last_lines(&log_path, LOG_TAIL_LINES) {
                    tracing::warn!(
                        package = name,
                        log = %log_path.display(),
                        "last {LOG_TAIL_LINES} lines of build output:\n{tail}"
                    );
                }
            }
            return Err(BuildError::ToolFailed {
                code: status.code(),
            });
        }

        let built = find_artifacts(&dir).map_err(|source| BuildError::Io {
            path: dir.clone(),
            source,
        })?;
        if built.is_empty() {
            return Err(BuildError::NoArtifactProduced(dir));
        }

        std::fs::create_dir_all(&self.output_dir).map_err(|source| BuildError::Io {
            path: self.output_dir.clone(),
            source,
        })?;

        let mut copied = Vec::with_capacity(built.len());
        for src in built {
            let Some(file_name) = src.file_name() else {
                continue;
            };
            let dest = self.output_dir.join(file_name);
            std::fs::copy(&src, &dest).map_err(|source| BuildError::Io {
                path: dest.clone(),
                source,
            })?;
            tracing::debug!(from = %src.display(), to = %dest.display(), "copied");
            copied.push(dest);
        }

        Ok(copied)
    }
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "killed by signal".to_string(),
    }
}

/// Remove archives (and their signatures) left over from earlier builds.
fn clean_artifacts(dir: &Path) -> Result<(), BuildError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| BuildError::Io { path, source }
    };

    for old in find_artifacts(dir).map_err(io_err(dir))? {
        tracing::debug!(path = %old.display(), "removing stale package");
        std::fs::remove_file(&old).map_err(io_err(&old))?;

        let mut sig = old.into_os_string();
        sig.push(".sig");
        let sig = PathBuf::from(sig);
        if sig.exists() {
            std::fs::remove_file(&sig).map_err(io_err(&sig))?;
        }
    }
    Ok(())
}
