//! Repository publishing.
//!
//! Regenerates the pacman repository database from every package archive
//! currently in the output directory, using the external indexer
//! (`repo-add`). The database is always rebuilt from scratch, so packages
//! built by earlier runs stay listed even when this run built nothing new.
//! A failed indexer run leaves the previous database in place.

use std::path::{Path, PathBuf};

use crate::builder::find_artifacts;
use crate::command::ToolCommand;

pub mod listing;

pub use listing::{ListingError, render_listing, write_listing};

/// Indexer invocation used when none is configured.
pub const DEFAULT_INDEX_COMMAND: &str = "repo-add";

/// Repository name used when none is configured.
pub const DEFAULT_REPO_NAME: &str = "archrepo";

/// Errors publishing the repository. Any of them fails the run.
#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    /// The output directory holds no package archive.
    #[error("no packages to index in {0}")]
    NoArtifacts(PathBuf),

    /// The indexer could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The indexer exited with a failure status.
    #[error("indexer failed with exit code {code:?}")]
    Indexer {
        /// Exit code, `None` when killed by a signal.
        code: Option<i32>,
    },

    /// The indexer reported success but the database is missing.
    #[error("indexer did not produce {0}")]
    MissingIndex(PathBuf),

    /// Filesystem error in the output directory.
    #[error("{path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// What a successful publish indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSummary {
    /// Indexed package archives, sorted.
    pub packages: Vec<PathBuf>,
    /// The database archive.
    pub database: PathBuf,
}

/// Rebuilds `<repo>.db` / `<repo>.files` in an output directory.
#[derive(Debug, Clone)]
pub struct Publisher {
    command: ToolCommand,
    output_dir: PathBuf,
    repo_name: String,
}

impl Publisher {
    /// Publisher for `output_dir`, naming the database after `repo_name`.
    pub fn new(command: ToolCommand, output_dir: impl Into<PathBuf>, repo_name: &str) -> Self {
        Self {
            command,
            output_dir: output_dir.into(),
            repo_name: repo_name.to_string(),
        }
    }

    /// `<out>/<repo>.db.tar.zst`
    pub fn database_archive(&self) -> PathBuf {
        self.output_dir.join(format!("{}.db.tar.zst", self.repo_name))
    }

    /// `<out>/<repo>.files.tar.zst`
    pub fn files_archive(&self) -> PathBuf {
        self.output_dir.join(format!("{}.files.tar.zst", self.repo_name))
    }

    /// Index every package archive in the output directory.
    ///
    /// The indexer writes a fresh database into a staging directory inside
    /// the output directory. The previous database is only replaced once
    /// the indexer succeeded, so a failed run leaves it untouched.
    ///
    /// # Errors
    ///
    /// Returns a [`PublishError`] if there is nothing to index, the indexer
    /// fails, or the database cannot be verified and aliased.
    pub fn publish(&self) -> Result<PublishSummary, PublishError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| PublishError::Io { path, source }
        };

        let packages = find_artifacts(&self.output_dir).map_err(io_err(&self.output_dir))?;
        if packages.is_empty() {
            return Err(PublishError::NoArtifacts(self.output_dir.clone()));
        }
        tracing::info!(
            packages = packages.len(),
            repo = %self.repo_name,
            "Updating repository database"
        );

        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.output_dir)
            .map_err(io_err(&self.output_dir))?;
        let staged_db = staging.path().join(file_name(&self.database_archive()));
        let staged_files = staging.path().join(file_name(&self.files_archive()));

        // The indexer runs in the output directory
        let staging_name = staging.path().file_name().unwrap_or_default();
        let db_arg = Path::new(staging_name).join(file_name(&self.database_archive()));
        let mut args = vec![db_arg.into_os_string()];
        args.extend(
            packages
                .iter()
                .map(|p| std::ffi::OsString::from(file_name(p))),
        );
        let args: Vec<&std::ffi::OsStr> = args.iter().map(std::ffi::OsString::as_os_str).collect();

        let status = self
            .command
            .run_in(&self.output_dir, &args, None)
            .map_err(|source| PublishError::Spawn {
                program: self.command.program().to_string(),
                source,
            })?;
        if !status.success() {
            return Err(PublishError::Indexer {
                code: status.code(),
            });
        }
        if !staged_db.is_file() {
            return Err(PublishError::MissingIndex(self.database_archive()));
        }

        self.remove_old_index()?;

        let database = self.database_archive();
        std::fs::rename(&staged_db, &database).map_err(io_err(&database))?;
        self.link_alias("db")?;
        if staged_files.is_file() {
            let files = self.files_archive();
            std::fs::rename(&staged_files, &files).map_err(io_err(&files))?;
            self.link_alias("files")?;
        }

        tracing::info!(database = %database.display(), "repository database updated");
        Ok(PublishSummary { packages, database })
    }

    /// Delete every `<repo>.db*` and `<repo>.files*` file.
    fn remove_old_index(&self) -> Result<(), PublishError> {
        let read_err = |source| PublishError::Io {
            path: self.output_dir.clone(),
            source,
        };
        let db_prefix = format!("{}.db", self.repo_name);
        let files_prefix = format!("{}.files", self.repo_name);

        for dirent in std::fs::read_dir(&self.output_dir).map_err(read_err)? {
            let dirent = dirent.map_err(read_err)?;
            let name = dirent.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&db_prefix) || name.starts_with(&files_prefix) {
                let path = dirent.path();
                tracing::debug!(path = %path.display(), "removing old index file");
                std::fs::remove_file(&path).map_err(|source| PublishError::Io { path, source })?;
            }
        }
        Ok(())
    }

    /// Point `<repo>.<kind>` at `<repo>.<kind>.tar.zst`.
    fn link_alias(&self, kind: &str) -> Result<(), PublishError> {
        let target = format!("{}.{kind}.tar.zst", self.repo_name);
        let alias = self.output_dir.join(format!("{}.{kind}", self.repo_name));
        let io_err = |source| PublishError::Io {
            path: alias.clone(),
            source,
        };

        if alias.symlink_metadata().is_ok() {
            std::fs::remove_file(&alias).map_err(io_err)?;
        }

        #[cfg(unix)]
        std::os::unix::fs::symlink(&target, &alias).map_err(io_err)?;
        #[cfg(not(unix))]
        std::fs::copy(self.output_dir.join(&target), &alias).map_err(io_err)?;

        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
