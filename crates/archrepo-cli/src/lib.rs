//! archrepo - keep a pacman repository of upstream binaries up to date
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Command-line front end for the `archrepo-core` pipeline.
//!
//! # Pipeline
//!
//! ```text
//! packages.toml ──update──▶ packages.toml ──generate──▶ pkgbuilds/*/PKGBUILD
//!                                                              │
//!                          x86_64/archrepo.db ◀──publish── build
//! ```
//!
//! Every stage reads and writes files under the repository root, so stages
//! can be run one at a time or chained by CI.

pub mod cmd;
pub mod ui;

use std::path::PathBuf;

use archrepo_core::RepoLayout;
use archrepo_core::builder::DEFAULT_BUILD_COMMAND;
use archrepo_core::paths::ROOT_ENV;
use archrepo_core::preflight::ALLOW_ROOT_ENV;
use archrepo_core::publisher::{DEFAULT_INDEX_COMMAND, DEFAULT_REPO_NAME};
use archrepo_core::resolver::{CHANNEL_ENV, Channel, GITHUB_API};
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "archrepo")]
#[command(author, version, about = "archrepo - a pacman repository of upstream binaries")]
pub struct Cli {
    /// Repository root holding packages.toml, templates/ and pkgbuilds/
    #[arg(long, global = true, env = ROOT_ENV, default_value = ".")]
    pub root: PathBuf,

    /// Catalog file [default: <root>/packages.toml]
    #[arg(long, global = true, env = "ARCHREPO_CATALOG")]
    pub catalog: Option<PathBuf>,

    /// Published repository directory [default: <root>/x86_64]
    #[arg(long, global = true, env = "ARCHREPO_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Paths of this invocation.
    pub fn layout(&self) -> RepoLayout {
        let mut layout = RepoLayout::new(&self.root);
        if let Some(catalog) = &self.catalog {
            layout = layout.with_catalog(catalog);
        }
        if let Some(dir) = &self.output_dir {
            layout = layout.with_output_dir(dir);
        }
        layout
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Validate the catalog and list its packages
    Check,
    /// Check upstreams for new versions and update the catalog
    Update {
        /// Release channel: stable or prerelease
        #[arg(long, env = CHANNEL_ENV, default_value = "stable")]
        channel: Channel,
        /// GitHub token for API requests
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        github_token: Option<String>,
        /// GitHub API base URL
        #[arg(long, env = "ARCHREPO_GITHUB_API", default_value = GITHUB_API, hide = true)]
        github_api: String,
        /// Exit with failure if any package could not be resolved
        #[arg(long)]
        strict: bool,
    },
    /// Render a PKGBUILD for every catalog package
    Generate,
    /// Build every package and publish the repository
    Build {
        /// Stream build output instead of writing build.log
        #[arg(short, long)]
        verbose: bool,
        /// Run even when the effective user is root
        #[arg(
            long,
            env = ALLOW_ROOT_ENV,
            hide = true,
            value_parser = clap::builder::FalseyValueParser::new()
        )]
        allow_root: bool,
        /// Package build command, run in each recipe directory
        #[arg(long, env = "ARCHREPO_BUILD_COMMAND", default_value = DEFAULT_BUILD_COMMAND)]
        build_command: String,
        #[command(flatten)]
        index: IndexArgs,
    },
    /// Rebuild the repository database from the packages already built
    Publish {
        #[command(flatten)]
        index: IndexArgs,
    },
    /// Write index.html listing the repository's packages
    Listing {
        /// Page template [default: <root>/static/index-template.html]
        #[arg(long)]
        template: Option<PathBuf>,
    },
}

/// Repository indexer settings.
#[derive(Debug, Clone, Args)]
pub struct IndexArgs {
    /// Repository indexer command
    #[arg(long, env = "ARCHREPO_INDEX_COMMAND", default_value = DEFAULT_INDEX_COMMAND)]
    pub index_command: String,
    /// Repository name (database file prefix)
    #[arg(long, env = "ARCHREPO_REPO_NAME", default_value = DEFAULT_REPO_NAME)]
    pub repo_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_from_flags() {
        let cli = Cli::try_parse_from([
            "archrepo",
            "--root",
            "/srv/repo",
            "--output-dir",
            "/srv/www",
            "check",
        ])
        .unwrap();
        let layout = cli.layout();
        assert_eq!(layout.catalog(), PathBuf::from("/srv/repo/packages.toml"));
        assert_eq!(layout.output_dir(), PathBuf::from("/srv/www"));
    }

    #[test]
    fn test_update_channel() {
        let cli = Cli::try_parse_from(["archrepo", "update", "--channel", "testing", "--strict"])
            .unwrap();
        let Commands::Update {
            channel, strict, ..
        } = cli.command
        else {
            panic!("expected update");
        };
        assert_eq!(channel, Channel::Prerelease);
        assert!(strict);

        assert!(Cli::try_parse_from(["archrepo", "update", "--channel", "nightly"]).is_err());
    }

    #[test]
    fn test_build_defaults() {
        let cli = Cli::try_parse_from(["archrepo", "build", "--repo-name", "myrepo"]).unwrap();
        let Commands::Build {
            build_command,
            index,
            ..
        } = cli.command
        else {
            panic!("expected build");
        };
        assert_eq!(build_command, DEFAULT_BUILD_COMMAND);
        assert_eq!(index.index_command, DEFAULT_INDEX_COMMAND);
        assert_eq!(index.repo_name, "myrepo");
    }

    #[test]
    fn test_allow_root_flag() {
        let cli = Cli::try_parse_from(["archrepo", "build", "--allow-root"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Build {
                allow_root: true,
                ..
            }
        ));
    }
}
