//! `archrepo generate`

use anyhow::{Context, Result, bail};
use archrepo_core::RepoLayout;
use archrepo_core::generator::{self, TemplateSet};

use crate::ui;

/// Render a recipe for every catalog package.
pub fn generate(layout: &RepoLayout) -> Result<()> {
    let catalog = super::load_catalog(layout)?;
    let templates_dir = layout.templates_dir();
    let templates = TemplateSet::load(&templates_dir)
        .with_context(|| format!("Failed to load templates from {}", templates_dir.display()))?;

    let report = generator::generate_all(&catalog, &templates, &layout.recipes_dir());

    ui::print_section(
        "Failed",
        report.failed.iter().map(|(n, e)| (n.to_string(), e)),
    );
    println!(
        "{} recipes generated, {} failed",
        report.generated.len(),
        report.failed.len()
    );

    if report.has_failures() {
        bail!("{} recipes could not be generated", report.failed.len());
    }
    Ok(())
}
