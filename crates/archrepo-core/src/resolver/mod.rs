//! Version resolution.
//!
//! For every catalog entry, asks the upstream for its newest release on the
//! selected [`Channel`], compares it with the stored version and, when it is
//! newer, recomputes the per-architecture checksums. Results are returned as
//! [`VersionUpdate`]s; committing them to the catalog is the caller's job.
//!
//! This is the only module that talks to the network. Requests are awaited
//! one at a time.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;

use archrepo_schema::{
    Arch, Checksum, PackageEntry, PackageName, Sha256Digest, SourceKind, Upstream,
    compare_versions,
};
use async_trait::async_trait;
use reqwest::Client;
use sha2::{Digest, Sha256};

use crate::catalog::{Catalog, VersionUpdate};
use crate::command::ToolCommand;

pub mod git;
pub mod github;
pub mod object_store;

pub use git::GitStrategy;
pub use github::GithubStrategy;
pub use object_store::ObjectStorageStrategy;

/// Environment variable selecting the release channel.
pub const CHANNEL_ENV: &str = "ARCHREPO_CHANNEL";

/// Default GitHub REST API base URL.
pub const GITHUB_API: &str = "https://api.github.com";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Which upstream releases are eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Channel {
    /// Stable releases only.
    #[default]
    Stable,
    /// Stable releases and prereleases.
    Prerelease,
}

impl Channel {
    /// Whether prereleases are eligible.
    pub fn includes_prereleases(self) -> bool {
        self == Self::Prerelease
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stable" => Ok(Self::Stable),
            "prerelease" | "testing" => Ok(Self::Prerelease),
            other => Err(format!(
                "unknown channel '{other}' (expected 'stable' or 'prerelease')"
            )),
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Stable => "stable",
            Self::Prerelease => "prerelease",
        })
    }
}

/// Errors resolving a single package. None of them abort a batch.
#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    /// Transport failure (DNS, TLS, timeout, connection reset).
    #[error("request to {url} failed: {source}")]
    Http {
        /// Requested URL.
        url: String,
        /// Underlying client error.
        source: reqwest::Error,
    },

    /// The server answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The response body could not be understood.
    #[error("unexpected response from {url}: {message}")]
    Malformed {
        /// Requested URL.
        url: String,
        /// What was wrong with it.
        message: String,
    },

    /// The upstream has no eligible release.
    #[error("no eligible release found for {0}")]
    NoReleases(PackageName),

    /// A release lacks the asset the catalog expects.
    #[error("asset '{asset}' not found in release {tag}")]
    MissingAsset {
        /// Expected asset name.
        asset: String,
        /// Release tag that was searched.
        tag: String,
    },

    /// `git ls-remote` could not be run or failed.
    #[error("git: {0}")]
    Git(String),

    /// The upstream version cannot be used as a pacman `pkgver`.
    #[error("upstream version '{0}' is not a valid pkgver")]
    InvalidVersion(String),

    /// The strategy was handed an entry of another source kind.
    #[error("{package} is a {kind} package")]
    WrongKind {
        /// Offending package.
        package: PackageName,
        /// Its actual kind.
        kind: SourceKind,
    },
}

/// A downloadable file attached to an upstream release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseAsset {
    /// File name.
    pub name: String,
    /// Direct download URL.
    pub download_url: String,
    /// Digest published by the upstream, if any.
    pub digest: Option<Sha256Digest>,
}

/// Newest eligible upstream release of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Normalized version.
    pub version: String,
    /// Raw tag, or the raw version for upstreams without tags.
    pub tag: String,
    /// Assets listed with the release, when the upstream lists them.
    pub assets: Vec<ReleaseAsset>,
}

/// One way of asking an upstream for versions. There is one implementation
/// per [`SourceKind`].
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Newest eligible release on `channel`.
    async fn latest(&self, entry: &PackageEntry, channel: Channel)
    -> Result<Candidate, ResolveError>;

    /// Checksum of every architecture's source for `candidate`.
    async fn checksums(
        &self,
        entry: &PackageEntry,
        candidate: &Candidate,
    ) -> Result<BTreeMap<Arch, Checksum>, ResolveError>;
}

/// Result of resolving one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A newer version (or missing metadata for the current one) was found.
    Updated(VersionUpdate),
    /// The stored version is the newest.
    Current,
    /// The upstream reports an older version than the catalog. Ignored.
    Downgrade {
        /// Version reported by the upstream.
        upstream: String,
    },
}

/// Outcome of a whole resolver run.
#[derive(Debug, Default)]
pub struct ResolveReport {
    /// Updates to commit, in catalog order.
    pub updated: Vec<VersionUpdate>,
    /// Packages whose stored version stays.
    pub current: Vec<PackageName>,
    /// Packages that could not be resolved.
    pub failed: Vec<(PackageName, ResolveError)>,
}

impl ResolveReport {
    /// Whether any package failed.
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Resolver settings.
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Release channel. Entries with `only_stable` always use stable.
    pub channel: Channel,
    /// GitHub REST API base URL.
    pub github_api: String,
    /// Bearer token for the GitHub API.
    pub github_token: Option<String>,
    /// Command used to list git tags.
    pub git: ToolCommand,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            channel: Channel::Stable,
            github_api: GITHUB_API.to_string(),
            github_token: None,
            git: ToolCommand::new("git"),
        }
    }
}

/// Dispatches every catalog entry to the strategy of its source kind.
pub struct Resolver {
    channel: Channel,
    github: GithubStrategy,
    object_storage: ObjectStorageStrategy,
    git: GitStrategy,
}

impl Resolver {
    /// Create a resolver with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed or the
    /// token is not a valid header value.
    pub fn new(options: ResolverOptions) -> Result<Self, ResolveError> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(token) = options.github_token.as_deref().filter(|t| !t.is_empty()) {
            let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ResolveError::Malformed {
                    url: options.github_api.clone(),
                    message: format!("invalid GitHub token: {e}"),
                })?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let client = Client::builder()
            .user_agent(crate::USER_AGENT)
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|source| ResolveError::Http {
                url: options.github_api.clone(),
                source,
            })?;

        Ok(Self {
            channel: options.channel,
            github: GithubStrategy::new(client.clone(), options.github_api, headers),
            object_storage: ObjectStorageStrategy::new(client),
            git: GitStrategy::new(options.git),
        })
    }

    fn strategy(&self, kind: SourceKind) -> &dyn Strategy {
        match kind {
            SourceKind::GithubRelease => &self.github,
            SourceKind::ObjectStorageRelease => &self.object_storage,
            SourceKind::GitUpstream => &self.git,
        }
    }

    /// Resolve one package.
    ///
    /// A newer upstream version yields [`Outcome::Updated`] with fresh
    /// checksums. So does the stored version when the catalog lacks its
    /// tag or a checksum for some architecture, which fills in metadata for
    /// newly added entries.
    ///
    /// # Errors
    ///
    /// Returns the first error hit while querying the upstream or computing
    /// checksums.
    pub async fn resolve_entry(&self, entry: &PackageEntry) -> Result<Outcome, ResolveError> {
        let channel = match &entry.upstream {
            Upstream::GithubRelease(gh) if gh.only_stable => Channel::Stable,
            _ => self.channel,
        };
        let strategy = self.strategy(entry.source_kind());

        let candidate = strategy.latest(entry, channel).await?;
        check_pkgver(&candidate.version)?;

        let refresh = match compare_versions(&candidate.version, &entry.version) {
            Ordering::Greater => true,
            Ordering::Less => {
                return Ok(Outcome::Downgrade {
                    upstream: candidate.version,
                });
            }
            Ordering::Equal => needs_metadata(entry, &candidate),
        };
        if !refresh {
            return Ok(Outcome::Current);
        }

        let checksums = strategy.checksums(entry, &candidate).await?;
        let tag = match entry.source_kind() {
            SourceKind::ObjectStorageRelease => None,
            SourceKind::GithubRelease | SourceKind::GitUpstream => Some(candidate.tag),
        };

        Ok(Outcome::Updated(VersionUpdate {
            name: entry.name.clone(),
            previous: entry.version.clone(),
            version: candidate.version,
            tag,
            checksums,
        }))
    }

    /// Resolve every package of the catalog, in catalog order.
    ///
    /// Failures are collected per package and never stop the batch.
    pub async fn resolve_all(&self, catalog: &Catalog) -> ResolveReport {
        let mut report = ResolveReport::default();
        tracing::info!(
            packages = catalog.len(),
            channel = %self.channel,
            "Checking upstream versions"
        );

        for entry in catalog.entries() {
            tracing::debug!(package = %entry.name, current = %entry.version, "resolving");
            match self.resolve_entry(entry).await {
                Ok(Outcome::Updated(update)) => {
                    tracing::info!(
                        package = %entry.name,
                        "{} -> {}",
                        update.previous,
                        update.version
                    );
                    report.updated.push(update);
                }
                Ok(Outcome::Current) => {
                    tracing::info!(package = %entry.name, version = %entry.version, "up to date");
                    report.current.push(entry.name.clone());
                }
                Ok(Outcome::Downgrade { upstream }) => {
                    tracing::warn!(
                        package = %entry.name,
                        stored = %entry.version,
                        upstream = %upstream,
                        "upstream reports an older version; keeping the stored one"
                    );
                    report.current.push(entry.name.clone());
                }
                Err(e) => {
                    tracing::warn!(package = %entry.name, "version check failed: {e}");
                    report.failed.push((entry.name.clone(), e));
                }
            }
        }

        report
    }
}

fn needs_metadata(entry: &PackageEntry, candidate: &Candidate) -> bool {
    if !entry.checksums_cover_architectures() {
        return true;
    }
    match entry.source_kind() {
        SourceKind::ObjectStorageRelease => false,
        SourceKind::GithubRelease | SourceKind::GitUpstream => {
            entry.upstream.tag() != Some(candidate.tag.as_str())
        }
    }
}

fn check_pkgver(version: &str) -> Result<(), ResolveError> {
    let valid = version.starts_with(|c: char| c.is_ascii_alphanumeric())
        && !version
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '-' | '/' | ':'));
    if valid {
        Ok(())
    } else {
        Err(ResolveError::InvalidVersion(version.to_string()))
    }
}

/// GET a URL and fail on non-success statuses.
pub(crate) async fn fetch(
    client: &Client,
    url: &str,
    headers: Option<&reqwest::header::HeaderMap>,
) -> Result<reqwest::Response, ResolveError> {
    tracing::debug!(url, "GET");
    let mut request = client.get(url);
    if let Some(headers) = headers {
        request = request.headers(headers.clone());
    }
    let resp = request.send().await.map_err(|source| ResolveError::Http {
        url: url.to_string(),
        source,
    })?;

    if !resp.status().is_success() {
        return Err(ResolveError::Status {
            url: url.to_string(),
            status: resp.status().as_u16(),
        });
    }
    Ok(resp)
}

/// Stream a download through SHA-256.
pub(crate) async fn download_and_hash(
    client: &Client,
    url: &str,
) -> Result<Sha256Digest, ResolveError> {
    tracing::info!(url, "hashing");
    let mut resp = fetch(client, url, None).await?;
    let mut hasher = Sha256::new();
    while let Some(chunk) = resp.chunk().await.map_err(|source| ResolveError::Http {
        url: url.to_string(),
        source,
    })? {
        hasher.update(&chunk);
    }

    Sha256Digest::new(hex::encode(hasher.finalize())).map_err(|e| ResolveError::Malformed {
        url: url.to_string(),
        message: e.to_string(),
    })
}

/// Hash each architecture's URL, downloading each distinct URL once.
pub(crate) async fn hash_sources(
    client: &Client,
    entry: &PackageEntry,
    urls: impl IntoIterator<Item = (Arch, String)>,
) -> Result<BTreeMap<Arch, Checksum>, ResolveError> {
    let mut by_url: BTreeMap<String, Checksum> = BTreeMap::new();
    let mut checksums = BTreeMap::new();

    for (arch, url) in urls {
        let checksum = if let Some(known) = by_url.get(&url) {
            known.clone()
        } else {
            let digest = Checksum::Sha256(download_and_hash(client, &url).await?);
            by_url.insert(url, digest.clone());
            digest
        };
        tracing::debug!(package = %entry.name, %arch, %checksum, "checksum");
        checksums.insert(arch, checksum);
    }

    Ok(checksums)
}

fn wrong_kind(entry: &PackageEntry) -> ResolveError {
    ResolveError::WrongKind {
        package: entry.name.clone(),
        kind: entry.source_kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    const DIGEST: &str = "1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef";
    const OLD_DIGEST: &str = "0000000000000000000000000000000000000000000000000000000000000000";

    fn catalog(body: &str) -> Catalog {
        Catalog::parse(body).unwrap()
    }

    fn resolver(api: &str) -> Resolver {
        Resolver::new(ResolverOptions {
            github_api: api.to_string(),
            ..ResolverOptions::default()
        })
        .unwrap()
    }

    fn github_package(name: &str, repo: &str, version: &str) -> String {
        format!(
            r#"
[packages.{name}]
description = "{name}"
version = "{version}"
url = "https://github.com/{repo}"
license = "MIT"
architectures = ["x86_64", "aarch64"]

[packages.{name}.upstream]
type = "github-release"
repo = "{repo}"
tag = "v{version}"
asset = "{name}-{{version}}-{{arch}}.tar.gz"

[packages.{name}.checksums]
x86_64 = "{OLD_DIGEST}"
aarch64 = "{OLD_DIGEST}"
"#
        )
    }

    fn release_json(name: &str, tag: &str, version: &str) -> String {
        format!(
            r#"[{{
                "tag_name": "{tag}",
                "draft": false,
                "prerelease": false,
                "assets": [
                    {{"name": "{name}-{version}-x86_64.tar.gz",
                      "browser_download_url": "https://example.invalid/x86_64",
                      "digest": "sha256:{DIGEST}"}},
                    {{"name": "{name}-{version}-aarch64.tar.gz",
                      "browser_download_url": "https://example.invalid/aarch64",
                      "digest": "sha256:{DIGEST}"}}
                ]
            }}]"#
        )
    }

    #[test]
    fn test_channel_parsing() {
        assert_eq!("stable".parse::<Channel>().unwrap(), Channel::Stable);
        assert_eq!("Testing".parse::<Channel>().unwrap(), Channel::Prerelease);
        assert!("nightly".parse::<Channel>().is_err());
    }

    #[test]
    fn test_check_pkgver() {
        assert!(check_pkgver("1.2.0").is_ok());
        assert!(check_pkgver("1.2.0.rc.1").is_ok());
        assert!(check_pkgver("").is_err());
        assert!(check_pkgver("1.0 beta").is_err());
        assert!(check_pkgver(".1").is_err());
    }

    #[tokio::test]
    async fn test_new_github_release_updates_entry() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/repos/acme/demo/releases?per_page=100")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(release_json("demo-bin", "v1.2.0", "1.2.0"))
            .create_async()
            .await;

        let mut catalog = catalog(&github_package("demo-bin", "acme/demo", "1.1.0"));
        let report = resolver(&server.url()).resolve_all(&catalog).await;

        assert!(!report.has_failures());
        assert_eq!(report.updated.len(), 1);
        let update = &report.updated[0];
        assert_eq!(update.previous, "1.1.0");
        assert_eq!(update.version, "1.2.0");
        assert_eq!(update.tag.as_deref(), Some("v1.2.0"));
        assert_eq!(update.checksums[&Arch::X86_64].as_str(), DIGEST);
        assert_eq!(update.checksums[&Arch::Aarch64].as_str(), DIGEST);

        catalog.apply(&report.updated).unwrap();
        let entry = catalog.get("demo-bin").unwrap();
        assert_eq!(entry.version, "1.2.0");
        assert_eq!(
            entry.source_url(Arch::Aarch64).unwrap(),
            "https://github.com/acme/demo/releases/download/v1.2.0/demo-bin-1.2.0-aarch64.tar.gz"
        );
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_batch() {
        let mut server = Server::new_async().await;
        let _broken = server
            .mock("GET", "/repos/acme/broken/releases?per_page=100")
            .with_status(500)
            .create_async()
            .await;
        let _ok = server
            .mock("GET", "/repos/acme/demo/releases?per_page=100")
            .with_status(200)
            .with_body(release_json("demo-bin", "v1.2.0", "1.2.0"))
            .create_async()
            .await;

        let body = format!(
            "{}{}",
            github_package("broken-bin", "acme/broken", "0.1.0"),
            github_package("demo-bin", "acme/demo", "1.1.0")
        );
        let mut cat = catalog(&body);
        let report = resolver(&server.url()).resolve_all(&cat).await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0.as_str(), "broken-bin");
        assert!(matches!(
            report.failed[0].1,
            ResolveError::Status { status: 500, .. }
        ));
        assert_eq!(report.updated.len(), 1);
        assert_eq!(report.updated[0].name.as_str(), "demo-bin");

        // The failed entry is written back byte for byte
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packages.toml");
        cat.apply(&report.updated).unwrap();
        cat.save(&path).unwrap();
        let saved = std::fs::read_to_string(&path).unwrap();
        assert_eq!(saved, cat.to_string());
        assert!(saved.starts_with(&github_package("broken-bin", "acme/broken", "0.1.0")));
        assert!(!saved.contains("version = \"1.1.0\""));
    }

    #[tokio::test]
    async fn test_older_upstream_is_ignored() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/repos/acme/demo/releases?per_page=100")
            .with_status(200)
            .with_body(release_json("demo-bin", "v1.2.0", "1.2.0"))
            .create_async()
            .await;

        let catalog = catalog(&github_package("demo-bin", "acme/demo", "2.0.0"));
        let resolver = resolver(&server.url());
        let outcome = resolver
            .resolve_entry(catalog.get("demo-bin").unwrap())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            Outcome::Downgrade {
                upstream: "1.2.0".to_string()
            }
        );

        let report = resolver.resolve_all(&catalog).await;
        assert!(report.updated.is_empty());
        assert_eq!(report.current.len(), 1);
    }

    #[tokio::test]
    async fn test_same_version_with_complete_metadata_is_current() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/repos/acme/demo/releases?per_page=100")
            .with_status(200)
            .with_body(release_json("demo-bin", "v1.2.0", "1.2.0"))
            .create_async()
            .await;

        let catalog = catalog(&github_package("demo-bin", "acme/demo", "1.2.0"));
        let outcome = resolver(&server.url())
            .resolve_entry(catalog.get("demo-bin").unwrap())
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Current);
    }

    #[tokio::test]
    async fn test_same_version_without_checksums_is_filled_in() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/repos/acme/demo/releases?per_page=100")
            .with_status(200)
            .with_body(release_json("demo-bin", "v1.2.0", "1.2.0"))
            .create_async()
            .await;

        let body = github_package("demo-bin", "acme/demo", "1.2.0");
        let body = body
            .split("[packages.demo-bin.checksums]")
            .next()
            .unwrap()
            .to_string();
        let catalog = catalog(&body);

        let outcome = resolver(&server.url())
            .resolve_entry(catalog.get("demo-bin").unwrap())
            .await
            .unwrap();
        let Outcome::Updated(update) = outcome else {
            panic!("expected an update, got {outcome:?}");
        };
        assert_eq!(update.version, "1.2.0");
        assert_eq!(update.checksums.len(), 2);
    }

    #[tokio::test]
    async fn test_only_stable_ignores_prerelease_channel() {
        let stable = release_json("demo-bin", "v1.2.0", "1.2.0");
        let body = format!(
            r#"[{{"tag_name": "v1.3.0-rc.1", "draft": false, "prerelease": true, "assets": []}}, {}"#,
            stable.trim_start().trim_start_matches('[')
        );
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/repos/acme/demo/releases?per_page=100")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let resolver = Resolver::new(ResolverOptions {
            channel: Channel::Prerelease,
            github_api: server.url(),
            ..ResolverOptions::default()
        })
        .unwrap();
        let body = github_package("demo-bin", "acme/demo", "1.1.0")
            .replace("repo = \"acme/demo\"\n", "repo = \"acme/demo\"\nonly_stable = true\n");
        let catalog = catalog(&body);

        let outcome = resolver
            .resolve_entry(catalog.get("demo-bin").unwrap())
            .await
            .unwrap();
        let Outcome::Updated(update) = outcome else {
            panic!("expected an update, got {outcome:?}");
        };
        assert_eq!(update.version, "1.2.0");
        assert_eq!(update.tag.as_deref(), Some("v1.2.0"));
    }
}
