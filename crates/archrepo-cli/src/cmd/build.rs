//! `archrepo build`

use anyhow::{Context, Result, bail};
use archrepo_core::RepoLayout;
use archrepo_core::builder::Builder;
use archrepo_core::command::ToolCommand;
use archrepo_core::preflight;

use crate::IndexArgs;
use crate::ui;

/// Options of a build run.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub verbose: bool,
    pub allow_root: bool,
    pub build_command: String,
    pub index: IndexArgs,
}

/// Build every package, then publish the repository if anything was built.
///
/// Fails when any package failed to build or the indexer failed. The
/// summary is printed either way.
pub fn build(layout: &RepoLayout, opts: &BuildOptions) -> Result<()> {
    let build_command =
        ToolCommand::parse(&opts.build_command).context("Build command is empty")?;
    let publisher = super::publish::publisher(layout, &opts.index)?;
    let index_command =
        ToolCommand::parse(&opts.index.index_command).context("Index command is empty")?;

    preflight::check_build(opts.allow_root, &build_command, &index_command)?;

    let catalog = super::load_catalog(layout)?;
    if catalog.is_empty() {
        println!("Nothing to build");
        return Ok(());
    }

    let report = Builder::new(build_command, layout)
        .verbose(opts.verbose)
        .build_all(&catalog);

    let publish_result = if report.succeeded.is_empty() {
        tracing::warn!("no package was built; repository database left unchanged");
        None
    } else {
        Some(publisher.publish())
    };

    ui::print_section(
        "Built",
        report.succeeded.iter().map(|(name, artifacts)| {
            let files = artifacts
                .iter()
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("\n");
            (name.to_string(), files)
        }),
    );
    ui::print_section(
        "Failed",
        report.failed.iter().map(|(name, e)| (name.to_string(), e)),
    );
    println!(
        "{} built, {} failed",
        report.succeeded.len(),
        report.failed.len()
    );

    let published = match publish_result {
        Some(Ok(summary)) => {
            super::publish::print_summary(&summary);
            true
        }
        Some(Err(e)) => {
            tracing::error!("publish failed: {e}");
            println!("Repository database NOT updated: {e}");
            false
        }
        None => true,
    };

    if report.has_failures() {
        bail!("{} packages failed to build", report.failed.len());
    }
    if !published {
        bail!("Failed to publish the repository");
    }
    Ok(())
}
