//! Core library for archrepo.
//!
//! Each pipeline stage lives in its own module and takes its inputs as
//! explicit handles (a loaded [`Catalog`], a [`RepoLayout`], a configured
//! tool command):
//!
//! - [`catalog`]: load, validate, update and atomically save `packages.toml`.
//! - [`resolver`]: ask upstreams for new versions and recompute checksums.
//!   The only module that touches the network.
//! - [`generator`]: render `PKGBUILD`s from the catalog and templates.
//! - [`builder`]: run the external package builder for every recipe.
//! - [`publisher`]: rebuild the repository database and the listing page.

pub mod builder;
pub mod catalog;
pub mod command;
pub mod generator;
pub mod paths;
pub mod preflight;
pub mod publisher;
pub mod resolver;

pub use catalog::{Catalog, CatalogError, VersionUpdate};
pub use paths::RepoLayout;
pub use resolver::Strategy;

/// User Agent string sent with every upstream request
pub const USER_AGENT: &str = concat!("archrepo/", env!("CARGO_PKG_VERSION"));
