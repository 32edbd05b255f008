//! Subcommand implementations.

pub mod build;
pub mod check;
pub mod generate;
pub mod listing;
pub mod publish;
pub mod update;

use anyhow::{Context, Result};
use archrepo_core::{Catalog, RepoLayout};

/// Load the catalog, warning when it holds no package.
pub(crate) fn load_catalog(layout: &RepoLayout) -> Result<Catalog> {
    let path = layout.catalog();
    let catalog = Catalog::load(&path)
        .with_context(|| format!("Failed to load catalog {}", path.display()))?;
    if catalog.is_empty() {
        tracing::warn!(path = %path.display(), "catalog has no packages");
    }
    Ok(catalog)
}
