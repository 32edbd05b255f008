//! Catalog entry types.

use serde::{Deserialize, Deserializer};
use std::borrow::Borrow;
use std::collections::BTreeMap;

use crate::{Arch, Checksum};

/// Package name, the primary key of the catalog.
///
/// Follows pacman's naming rules: lowercase alphanumerics plus
/// `@ . _ + -`, not starting with `-` or `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, serde::Serialize)]
#[serde(transparent)]
pub struct PackageName(String);

impl PackageName {
    /// Create a new package name without validation.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Create a package name, enforcing pacman's naming rules.
    ///
    /// # Errors
    ///
    /// Returns a description of the violated rule.
    pub fn validated(s: &str) -> Result<Self, String> {
        if s.is_empty() {
            return Err("package name is empty".to_string());
        }
        if s.starts_with('-') || s.starts_with('.') {
            return Err(format!("package name '{s}' must not start with '-' or '.'"));
        }
        if let Some(bad) = s
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || "@._+-".contains(*c)))
        {
            return Err(format!("package name '{s}' contains invalid character '{bad}'"));
        }
        Ok(Self(s.to_string()))
    }

    /// Return the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PackageName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PackageName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Category of upstream origin.
///
/// Selects both the version-resolution strategy and the recipe template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceKind {
    /// Releases published on GitHub.
    GithubRelease,
    /// Releases published to an object-storage bucket with a version endpoint.
    ObjectStorageRelease,
    /// Tags of a plain git repository.
    GitUpstream,
}

impl SourceKind {
    /// Every source kind, in declaration order.
    pub const ALL: [SourceKind; 3] = [
        SourceKind::GithubRelease,
        SourceKind::ObjectStorageRelease,
        SourceKind::GitUpstream,
    ];

    /// Catalog spelling of the kind (the `type` field).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GithubRelease => "github-release",
            Self::ObjectStorageRelease => "object-storage-release",
            Self::GitUpstream => "git-upstream",
        }
    }

    /// File name of the recipe template for this kind.
    pub fn template_file(&self) -> String {
        format!("{}.pkgbuild", self.as_str())
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream described by GitHub releases.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GithubRelease {
    /// Repository in `owner/name` form.
    pub repo: String,
    /// Release asset file-name pattern. Without one, the package is built
    /// from the tag's source archive.
    #[serde(default)]
    pub asset: Option<String>,
    /// Raw upstream tag of the current version, written by the resolver.
    #[serde(default)]
    pub tag: Option<String>,
    /// Prefix stripped from tags before normalization (e.g. `cli-`).
    #[serde(default)]
    pub tag_prefix: String,
    /// Always resolve on the stable channel, whatever the run's channel is.
    #[serde(default)]
    pub only_stable: bool,
    /// Per-architecture overrides of the `{target}` substitution.
    #[serde(default)]
    pub targets: BTreeMap<Arch, String>,
}

/// Upstream published to an object-storage bucket.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObjectStorageRelease {
    /// Base URL of the bucket, without trailing slash.
    pub bucket_url: String,
    /// Object whose body is the current stable version.
    pub version_endpoint: String,
    /// Object whose body is the newest version including prereleases.
    #[serde(default)]
    pub prerelease_endpoint: Option<String>,
    /// Object path pattern of the per-architecture artifact.
    pub asset: String,
    /// Per-architecture overrides of the `{target}` substitution.
    #[serde(default)]
    pub targets: BTreeMap<Arch, String>,
}

/// Upstream tracked through the tags of a git repository.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GitUpstream {
    /// Clone URL.
    pub git_url: String,
    /// Tag of the current version, written by the resolver.
    #[serde(default)]
    pub tag: Option<String>,
    /// Prefix stripped from tags before normalization.
    #[serde(default)]
    pub tag_prefix: String,
}

/// Upstream section of a catalog entry, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum Upstream {
    /// `type = "github-release"` (or the legacy `github`).
    #[serde(rename = "github-release", alias = "github")]
    GithubRelease(GithubRelease),
    /// `type = "object-storage-release"` (or the legacy `gcs`).
    #[serde(rename = "object-storage-release", alias = "gcs")]
    ObjectStorageRelease(ObjectStorageRelease),
    /// `type = "git-upstream"` (or `git`).
    #[serde(rename = "git-upstream", alias = "git")]
    GitUpstream(GitUpstream),
}

impl Upstream {
    /// The source kind of this upstream.
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::GithubRelease(_) => SourceKind::GithubRelease,
            Self::ObjectStorageRelease(_) => SourceKind::ObjectStorageRelease,
            Self::GitUpstream(_) => SourceKind::GitUpstream,
        }
    }

    /// Raw upstream tag of the stored version, if this kind tracks tags.
    pub fn tag(&self) -> Option<&str> {
        match self {
            Self::GithubRelease(gh) => gh.tag.as_deref(),
            Self::ObjectStorageRelease(_) => None,
            Self::GitUpstream(git) => git.tag.as_deref(),
        }
    }

    /// Tag prefix stripped before normalization.
    pub fn tag_prefix(&self) -> &str {
        match self {
            Self::GithubRelease(gh) => &gh.tag_prefix,
            Self::ObjectStorageRelease(_) => "",
            Self::GitUpstream(git) => &git.tag_prefix,
        }
    }

    /// Look up a field by its catalog name, as text.
    ///
    /// Returns `None` for fields this kind does not have and for optional
    /// fields that are unset; template binding reports both as missing.
    pub fn field(&self, name: &str) -> Option<String> {
        match (self, name) {
            (_, "type") => Some(self.kind().as_str().to_string()),
            (Self::GithubRelease(gh), "repo") => Some(gh.repo.clone()),
            (Self::GithubRelease(gh), "asset") => gh.asset.clone(),
            (Self::GithubRelease(gh), "tag") => gh.tag.clone(),
            (Self::GithubRelease(gh), "tag_prefix") => Some(gh.tag_prefix.clone()),
            (Self::GithubRelease(gh), "only_stable") => Some(gh.only_stable.to_string()),
            (Self::ObjectStorageRelease(os), "bucket_url") => Some(os.bucket_url.clone()),
            (Self::ObjectStorageRelease(os), "version_endpoint") => {
                Some(os.version_endpoint.clone())
            }
            (Self::ObjectStorageRelease(os), "prerelease_endpoint") => {
                os.prerelease_endpoint.clone()
            }
            (Self::ObjectStorageRelease(os), "asset") => Some(os.asset.clone()),
            (Self::GitUpstream(git), "git_url") => Some(git.git_url.clone()),
            (Self::GitUpstream(git), "tag") => git.tag.clone(),
            (Self::GitUpstream(git), "tag_prefix") => Some(git.tag_prefix.clone()),
            _ => None,
        }
    }

    fn targets(&self) -> Option<&BTreeMap<Arch, String>> {
        match self {
            Self::GithubRelease(gh) => Some(&gh.targets),
            Self::ObjectStorageRelease(os) => Some(&os.targets),
            Self::GitUpstream(_) => None,
        }
    }
}

/// One row of the package catalog.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PackageEntry {
    /// Catalog key. Not part of the table body; set by the catalog loader.
    #[serde(skip)]
    pub name: PackageName,
    /// One-line package description (`pkgdesc`).
    pub description: String,
    /// Normalized upstream version (`pkgver`).
    pub version: String,
    /// Package release number (`pkgrel`).
    #[serde(default = "default_pkgrel")]
    pub pkgrel: u32,
    /// Upstream project URL.
    pub url: String,
    /// License identifiers.
    #[serde(deserialize_with = "one_or_many")]
    pub license: Vec<String>,
    /// Supported architectures, in catalog order.
    pub architectures: Vec<Arch>,
    /// Runtime dependencies.
    #[serde(default)]
    pub depends: Vec<String>,
    /// Optional dependencies (`name: reason`).
    #[serde(default)]
    pub optdepends: Vec<String>,
    /// Build-time dependencies.
    #[serde(default)]
    pub makedepends: Vec<String>,
    /// Virtual packages provided.
    #[serde(default)]
    pub provides: Vec<String>,
    /// Conflicting packages.
    #[serde(default)]
    pub conflicts: Vec<String>,
    /// Where new versions come from.
    pub upstream: Upstream,
    /// Checksum per architecture of the artifact at [`PackageEntry::source_url`].
    #[serde(default)]
    pub checksums: BTreeMap<Arch, Checksum>,
}

fn default_pkgrel() -> u32 {
    1
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// Errors computing the source of a package.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The upstream kind needs a tag but the catalog has none yet.
    #[error("{0} has no upstream tag recorded; run the resolver first")]
    MissingTag(PackageName),
}

impl PackageEntry {
    /// Source kind of the entry's upstream.
    pub fn source_kind(&self) -> SourceKind {
        self.upstream.kind()
    }

    /// Check the entry against the catalog rules.
    ///
    /// # Errors
    ///
    /// Returns a human-readable description of the first violated rule.
    pub fn validate(&self) -> Result<(), String> {
        PackageName::validated(self.name.as_str())?;

        if self.version.trim().is_empty() {
            return Err("version is empty".to_string());
        }
        if let Some(bad) = self
            .version
            .chars()
            .find(|c| c.is_whitespace() || matches!(c, '-' | '/' | ':'))
        {
            return Err(format!(
                "version '{}' contains '{bad}', which pacman does not allow in pkgver",
                self.version
            ));
        }
        // Descriptions land inside a double-quoted shell string
        if let Some(bad) = self
            .description
            .chars()
            .find(|c| matches!(c, '"' | '$' | '`' | '\\') || c.is_control())
        {
            return Err(format!(
                "description contains {bad:?}, which is not allowed inside pkgdesc"
            ));
        }
        if self.pkgrel == 0 {
            return Err("pkgrel must be at least 1".to_string());
        }
        if self.architectures.is_empty() {
            return Err("architectures must not be empty".to_string());
        }
        for (i, arch) in self.architectures.iter().enumerate() {
            if self.architectures[..i].contains(arch) {
                return Err(format!("architecture '{arch}' listed twice"));
            }
        }

        match &self.upstream {
            Upstream::GithubRelease(gh) => {
                let mut parts = gh.repo.split('/');
                let valid = matches!(
                    (parts.next(), parts.next(), parts.next()),
                    (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty()
                );
                if !valid {
                    return Err(format!(
                        "Invalid GitHub repo format: expected 'owner/repo', got '{}'",
                        gh.repo
                    ));
                }
            }
            Upstream::ObjectStorageRelease(os) => {
                if !os.bucket_url.starts_with("http") {
                    return Err(format!(
                        "bucket_url '{}' must start with http(s)",
                        os.bucket_url
                    ));
                }
            }
            Upstream::GitUpstream(git) => {
                if git.git_url.is_empty() {
                    return Err("git_url is empty".to_string());
                }
            }
        }

        Ok(())
    }

    /// Whether the checksum keys are exactly the entry's architectures.
    pub fn checksums_cover_architectures(&self) -> bool {
        self.checksums.len() == self.architectures.len()
            && self
                .architectures
                .iter()
                .all(|arch| self.checksums.contains_key(arch))
    }

    /// Value substituted for `{target}` for this architecture.
    pub fn target(&self, arch: Arch) -> &str {
        self.upstream
            .targets()
            .and_then(|t| t.get(&arch))
            .map_or_else(|| arch.target_triple(), String::as_str)
    }

    /// Expand the asset pattern for a given version and tag.
    ///
    /// Returns `None` when this kind does not download a named asset
    /// (source archives and git checkouts).
    pub fn asset_name_with(&self, arch: Arch, version: &str, tag: &str) -> Option<String> {
        let pattern = match &self.upstream {
            Upstream::GithubRelease(gh) => gh.asset.as_deref()?,
            Upstream::ObjectStorageRelease(os) => os.asset.as_str(),
            Upstream::GitUpstream(_) => return None,
        };
        Some(
            pattern
                .replace("{version}", version)
                .replace("{tag}", tag)
                .replace("{arch}", arch.as_str())
                .replace("{target}", self.target(arch)),
        )
    }

    /// Download URL of the source for a given version and tag.
    ///
    /// This is the single place source URLs are derived: the resolver
    /// hashes exactly this URL and the generator bakes exactly this URL
    /// into the recipe.
    pub fn source_url_with(&self, arch: Arch, version: &str, tag: &str) -> String {
        match &self.upstream {
            Upstream::GithubRelease(gh) => match self.asset_name_with(arch, version, tag) {
                Some(asset) => format!(
                    "https://github.com/{}/releases/download/{tag}/{asset}",
                    gh.repo
                ),
                None => format!(
                    "https://github.com/{}/archive/refs/tags/{tag}.tar.gz",
                    gh.repo
                ),
            },
            Upstream::ObjectStorageRelease(os) => {
                let asset = self
                    .asset_name_with(arch, version, tag)
                    .unwrap_or_default();
                format!(
                    "{}/{}",
                    os.bucket_url.trim_end_matches('/'),
                    asset.trim_start_matches('/')
                )
            }
            Upstream::GitUpstream(git) => format!("git+{}#tag={tag}", git.git_url),
        }
    }

    /// Tag of the stored version. Object-storage upstreams have no tags and
    /// use the version itself.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::MissingTag`] if the kind tracks tags and none
    /// is recorded.
    pub fn current_tag(&self) -> Result<&str, SourceError> {
        match &self.upstream {
            Upstream::ObjectStorageRelease(_) => Ok(&self.version),
            other => other
                .tag()
                .ok_or_else(|| SourceError::MissingTag(self.name.clone())),
        }
    }

    /// Asset file name for the stored version.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::MissingTag`] if no tag is recorded.
    pub fn asset_name(&self, arch: Arch) -> Result<Option<String>, SourceError> {
        let tag = self.current_tag()?;
        Ok(self.asset_name_with(arch, &self.version, tag))
    }

    /// Download URL for the stored version.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::MissingTag`] if no tag is recorded.
    pub fn source_url(&self, arch: Arch) -> Result<String, SourceError> {
        let tag = self.current_tag()?;
        Ok(self.source_url_with(arch, &self.version, tag))
    }
}
