//! Recipe generation.
//!
//! Renders one `PKGBUILD` per catalog entry from the template of the
//! entry's source kind. Rendering is pure: the same entry and template
//! always give the same bytes, and every version, URL and checksum ends up
//! as literal text in the recipe.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use archrepo_schema::{PackageEntry, PackageName, SourceKind};

use crate::catalog::Catalog;

pub mod template;

pub use template::{BindingError, Template, TemplateError};

/// File name of a generated recipe.
pub const RECIPE_FILE: &str = "PKGBUILD";

/// Errors loading the template directory.
#[derive(thiserror::Error, Debug)]
pub enum TemplateSetError {
    /// A template file exists but cannot be read.
    #[error("failed to read template {path}: {source}")]
    Read {
        /// Template path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A template file has a syntax error.
    #[error("{path}: {source}")]
    Parse {
        /// Template path.
        path: PathBuf,
        /// Syntax error.
        source: TemplateError,
    },
}

/// Errors generating one package's recipe.
#[derive(thiserror::Error, Debug)]
pub enum GenerateError {
    /// The entry could not be bound to its template.
    #[error(transparent)]
    Binding(#[from] BindingError),

    /// The recipe could not be written.
    #[error("failed to write {path}: {source}")]
    Write {
        /// Recipe path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Templates by source kind.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: BTreeMap<SourceKind, Template>,
}

impl TemplateSet {
    /// Load `<kind>.pkgbuild` for every source kind that has a file in
    /// `dir`. Kinds without a file are simply absent; packages of those
    /// kinds fail with [`BindingError::MissingTemplate`].
    ///
    /// # Errors
    ///
    /// Returns an error if an existing template cannot be read or parsed.
    pub fn load(dir: &Path) -> Result<Self, TemplateSetError> {
        let mut set = Self::default();
        for kind in SourceKind::ALL {
            let path = dir.join(kind.template_file());
            if !path.is_file() {
                tracing::debug!(path = %path.display(), "no template");
                continue;
            }
            let text = std::fs::read_to_string(&path).map_err(|source| TemplateSetError::Read {
                path: path.clone(),
                source,
            })?;
            let template = Template::parse(kind, &text)
                .map_err(|source| TemplateSetError::Parse { path, source })?;
            set.insert(template);
        }
        Ok(set)
    }

    /// Add or replace the template of its kind.
    pub fn insert(&mut self, template: Template) {
        self.templates.insert(template.kind(), template);
    }

    /// Template of a source kind.
    pub fn get(&self, kind: SourceKind) -> Option<&Template> {
        self.templates.get(&kind)
    }

    /// Number of loaded templates.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether no template is loaded.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Render the complete recipe for one entry, header included.
///
/// # Errors
///
/// Returns a [`BindingError`] if the entry cannot be bound to the template.
pub fn render(entry: &PackageEntry, template: &Template) -> Result<String, BindingError> {
    let body = template.render(entry)?;
    Ok(format!(
        "# Generated by archrepo from packages.toml. Do not edit.\n\
         # Change the catalog entry or templates/{} instead.\n{body}",
        template.kind().template_file()
    ))
}

/// Write `<dir>/<name>/PKGBUILD` atomically and mark it read-only.
///
/// An existing recipe is replaced, read-only or not.
///
/// # Errors
///
/// Returns an error if the directory, the temporary file or the final
/// rename fails.
pub fn write_recipe(dir: &Path, name: &str, contents: &str) -> std::io::Result<PathBuf> {
    let pkg_dir = dir.join(name);
    std::fs::create_dir_all(&pkg_dir)?;
    let path = pkg_dir.join(RECIPE_FILE);

    if let Ok(meta) = std::fs::metadata(&path) {
        let mut perms = meta.permissions();
        if perms.readonly() {
            #[allow(clippy::permissions_set_readonly_false)]
            perms.set_readonly(false);
            std::fs::set_permissions(&path, perms)?;
        }
    }

    let mut tmp = tempfile::NamedTempFile::new_in(&pkg_dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    let file = tmp.persist(&path).map_err(|e| e.error)?;

    let mut perms = file.metadata()?.permissions();
    perms.set_readonly(true);
    std::fs::set_permissions(&path, perms)?;
    Ok(path)
}

/// Outcome of a generator run.
#[derive(Debug, Default)]
pub struct GenerateReport {
    /// Packages whose recipe was written, in catalog order.
    pub generated: Vec<PackageName>,
    /// Packages that were skipped, with the reason.
    pub failed: Vec<(PackageName, GenerateError)>,
}

impl GenerateReport {
    /// Whether any package failed.
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Generate recipes for every catalog entry into `out_dir`.
///
/// A failing package is recorded and skipped; the others are still
/// written. Directories of packages no longer in the catalog are left alone.
pub fn generate_all(catalog: &Catalog, templates: &TemplateSet, out_dir: &Path) -> GenerateReport {
    let mut report = GenerateReport::default();
    tracing::info!(packages = catalog.len(), "Generating recipes");

    for entry in catalog.entries() {
        match generate_one(entry, templates, out_dir) {
            Ok(path) => {
                tracing::info!(package = %entry.name, path = %path.display(), "generated");
                report.generated.push(entry.name.clone());
            }
            Err(e) => {
                tracing::warn!(package = %entry.name, "generation failed: {e}");
                report.failed.push((entry.name.clone(), e));
            }
        }
    }

    report
}

fn generate_one(
    entry: &PackageEntry,
    templates: &TemplateSet,
    out_dir: &Path,
) -> Result<PathBuf, GenerateError> {
    let kind = entry.source_kind();
    let template = templates
        .get(kind)
        .ok_or_else(|| BindingError::MissingTemplate {
            package: entry.name.clone(),
            kind,
        })?;

    let contents = render(entry, template)?;
    write_recipe(out_dir, entry.name.as_str(), &contents).map_err(|source| GenerateError::Write {
        path: out_dir.join(entry.name.as_str()).join(RECIPE_FILE),
        source,
    })
}
