//! `archrepo publish`

use anyhow::{Context, Result};
use archrepo_core::RepoLayout;
use archrepo_core::command::ToolCommand;
use archrepo_core::publisher::{PublishSummary, Publisher};

use crate::IndexArgs;

/// Publisher configured from the command line.
pub(crate) fn publisher(layout: &RepoLayout, args: &IndexArgs) -> Result<Publisher> {
    let command = ToolCommand::parse(&args.index_command).context("Index command is empty")?;
    Ok(Publisher::new(command, layout.output_dir(), &args.repo_name))
}

pub(crate) fn print_summary(summary: &PublishSummary) {
    println!(
        "Indexed {} packages into {}",
        summary.packages.len(),
        summary.database.display()
    );
}

/// Rebuild the repository database from the archives in the output
/// directory.
pub fn publish(layout: &RepoLayout, args: &IndexArgs) -> Result<()> {
    let summary = publisher(layout, args)?
        .publish()
        .context("Failed to publish the repository")?;
    print_summary(&summary);
    Ok(())
}
