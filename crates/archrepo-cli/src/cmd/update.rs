//! `archrepo update`

use anyhow::{Context, Result, bail};
use archrepo_core::RepoLayout;
use archrepo_core::resolver::{Resolver, ResolverOptions};

use crate::ui;

/// Resolve every package and commit the new versions to the catalog.
///
/// Per-package failures are reported and leave the entry unchanged; they
/// only fail the command when `strict` is set. The catalog is written once,
/// and only when something changed.
pub async fn update(layout: &RepoLayout, options: ResolverOptions, strict: bool) -> Result<()> {
    let mut catalog = super::load_catalog(layout)?;
    let resolver = Resolver::new(options).context("Failed to set up the resolver")?;

    let report = resolver.resolve_all(&catalog).await;

    if report.updated.is_empty() {
        tracing::info!("no updates");
    } else {
        catalog.apply(&report.updated)?;
        let path = layout.catalog();
        catalog.save(&path)?;
        tracing::info!(
            path = %path.display(),
            updated = report.updated.len(),
            "catalog saved"
        );
    }

    ui::print_section(
        "Updated",
        report
            .updated
            .iter()
            .map(|u| (u.name.to_string(), format!("{} -> {}", u.previous, u.version))),
    );
    ui::print_section(
        "Failed",
        report.failed.iter().map(|(n, e)| (n.to_string(), e)),
    );
    println!(
        "{} updated, {} current, {} failed",
        report.updated.len(),
        report.current.len(),
        report.failed.len()
    );

    if strict && report.has_failures() {
        bail!("{} packages could not be resolved", report.failed.len());
    }
    Ok(())
}
