//! archrepo - a pacman repository of upstream binaries

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use archrepo_cli::cmd;
use archrepo_cli::{Cli, Commands};
use archrepo_core::resolver::ResolverOptions;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let layout = cli.layout();

    match cli.command {
        Commands::Check => cmd::check::check(&layout),
        Commands::Update {
            channel,
            github_token,
            github_api,
            strict,
        } => {
            let options = ResolverOptions {
                channel,
                github_api,
                github_token,
                ..ResolverOptions::default()
            };
            cmd::update::update(&layout, options, strict).await
        }
        Commands::Generate => cmd::generate::generate(&layout),
        Commands::Build {
            verbose,
            allow_root,
            build_command,
            index,
        } => cmd::build::build(
            &layout,
            &cmd::build::BuildOptions {
                verbose,
                allow_root,
                build_command,
                index,
            },
        ),
        Commands::Publish { index } => cmd::publish::publish(&layout, &index),
        Commands::Listing { template } => cmd::listing::listing(&layout, template),
    }
}
