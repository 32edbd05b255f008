//! `archrepo listing`

use std::path::PathBuf;

use anyhow::{Context, Result};
use archrepo_core::RepoLayout;
use archrepo_core::publisher::write_listing;

/// Write `index.html` into the output directory.
pub fn listing(layout: &RepoLayout, template: Option<PathBuf>) -> Result<()> {
    let catalog = super::load_catalog(layout)?;
    let template = template.unwrap_or_else(|| layout.listing_template());

    let path = write_listing(&template, &catalog, &layout.output_dir(), chrono::Utc::now())
        .context("Failed to write the listing page")?;
    println!("Listing written to {}", path.display());
    Ok(())
}
