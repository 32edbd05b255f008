//! `archrepo check`

use anyhow::Result;
use archrepo_core::RepoLayout;

use crate::ui;

/// Load and validate the catalog, then print its packages.
pub fn check(layout: &RepoLayout) -> Result<()> {
    let catalog = super::load_catalog(layout)?;

    let mut table = ui::table(["Package", "Version", "Source", "Architectures"]);
    for entry in catalog.entries() {
        let arches = entry
            .architectures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        table.add_row([
            entry.name.to_string(),
            format!("{}-{}", entry.version, entry.pkgrel),
            entry.source_kind().to_string(),
            arches,
        ]);
    }

    println!("{table}");
    println!("{} packages OK", catalog.len());
    Ok(())
}
