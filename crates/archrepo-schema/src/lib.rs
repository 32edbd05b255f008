//! Shared types for the archrepo package catalog.
//!
//! Everything in this crate is pure data: no file, network or process I/O.
//! Both the resolver and the recipe generator in `archrepo-core` build on
//! these types, which is what keeps the download URL a recipe bakes in
//! identical to the URL the resolver hashed.

pub mod arch;
pub mod hash;
pub mod types;
pub mod version;

// Re-exports
pub use arch::*;
pub use hash::*;
pub use types::*;
pub use version::{compare_versions, is_prerelease, normalize_version};

/// Literal checksum value pacman accepts for sources it cannot hash (VCS checkouts).
pub const SKIP_CHECKSUM: &str = "SKIP";
