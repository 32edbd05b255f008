use std::collections::BTreeMap;

use archrepo_schema::{
    Arch, Checksum, PackageEntry, Sha256Digest, Upstream, compare_versions, normalize_version,
};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::Deserialize;

use super::{
    Candidate, Channel, ReleaseAsset, ResolveError, Strategy, download_and_hash, fetch,
    hash_sources, wrong_kind,
};

/// Release as returned by `GET /repos/{owner}/{repo}/releases`.
#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    assets: Vec<GithubAsset>,
}

#[derive(Debug, Deserialize)]
struct GithubAsset {
    name: String,
    browser_download_url: String,
    #[serde(default)]
    digest: Option<String>,
}

/// Resolves `github-release` entries through the GitHub REST API.
pub struct GithubStrategy {
    client: Client,
    api_base: String,
    headers: HeaderMap,
}

impl GithubStrategy {
    /// Strategy querying `api_base` (normally `https://api.github.com`).
    ///
    /// `headers` are sent with API requests only, never with asset
    /// downloads.
    pub fn new(client: Client, api_base: impl Into<String>, mut headers: HeaderMap) -> Self {
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            headers,
        }
    }

    async fn releases(&self, repo: &str) -> Result<Vec<GithubRelease>, ResolveError> {
        let url = format!("{}/repos/{repo}/releases?per_page=100", self.api_base);
        let resp = fetch(&self.client, &url, Some(&self.headers)).await?;
        let body = resp.text().await.map_err(|source| ResolveError::Http {
            url: url.clone(),
            source,
        })?;
        serde_json::from_str(&body).map_err(|e| ResolveError::Malformed {
            url,
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl Strategy for GithubStrategy {
    async fn latest(
        &self,
        entry: &PackageEntry,
        channel: Channel,
    ) -> Result<Candidate, ResolveError> {
        let Upstream::GithubRelease(gh) = &entry.upstream else {
            return Err(wrong_kind(entry));
        };

        let releases = self.releases(&gh.repo).await?;
        tracing::debug!(repo = %gh.repo, count = releases.len(), "releases listed");

        let mut best: Option<Candidate> = None;
        for release in releases {
            if release.draft {
                continue;
            }
            if release.prerelease && !channel.includes_prereleases() {
                tracing::debug!(tag = %release.tag_name, "skipping prerelease");
                continue;
            }
            if !release.tag_name.starts_with(gh.tag_prefix.as_str()) {
                continue;
            }

            let version = normalize_version(&release.tag_name, &gh.tag_prefix);
            let newer = best
                .as_ref()
                .is_none_or(|b| compare_versions(&version, &b.version).is_gt());
            if newer {
                best = Some(Candidate {
                    version,
                    tag: release.tag_name,
                    assets: release
                        .assets
                        .into_iter()
                        .map(|a| ReleaseAsset {
                            digest: a.digest.and_then(|d| Sha256Digest::new(d).ok()),
                            name: a.name,
                            download_url: a.browser_download_url,
                        })
                        .collect(),
                });
            }
        }

        best.ok_or_else(|| ResolveError::NoReleases(entry.name.clone()))
    }

    async fn checksums(
        &self,
        entry: &PackageEntry,
        candidate: &Candidate,
    ) -> Result<BTreeMap<Arch, Checksum>, ResolveError> {
        let mut checksums = BTreeMap::new();
        let mut archives = Vec::new();

        for &arch in &entry.architectures {
            let Some(asset_name) = entry.asset_name_with(arch, &candidate.version, &candidate.tag)
            else {
                // No asset pattern: the tag's source archive is the source
                archives.push((
                    arch,
                    entry.source_url_with(arch, &candidate.version, &candidate.tag),
                ));
                continue;
            };

            let asset = candidate
                .assets
                .iter()
                .find(|a| a.name == asset_name)
                .ok_or_else(|| ResolveError::MissingAsset {
                    asset: asset_name.clone(),
                    tag: candidate.tag.clone(),
                })?;

            let digest = match &asset.digest {
                Some(digest) => digest.clone(),
                None => download_and_hash(&self.client, &asset.download_url).await?,
            };
            checksums.insert(arch, Checksum::Sha256(digest));
        }

        checksums.extend(hash_sources(&self.client, entry, archives).await?);
        Ok(checksums)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archrepo_schema::PackageName;
    use mockito::Server;

    const DIGEST: &str = "abcdef1234567890abcdef1234567890abcdef1234567890abcdef1234567890";
    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn entry(upstream_extra: &str) -> PackageEntry {
        let body = format!(
            r#"
            description = "demo"
            version = "1.0.0"
            url = "https://example.com"
            license = "MIT"
            architectures = ["x86_64", "aarch64"]

            [upstream]
            type = "github-release"
            repo = "acme/demo"
            {upstream_extra}
            "#
        );
        let mut e: PackageEntry = toml::from_str(&body).unwrap();
        e.name = PackageName::new("demo-bin");
        e
    }

    fn strategy(server: &Server) -> GithubStrategy {
        GithubStrategy::new(Client::new(), server.url(), HeaderMap::new())
    }

    const RELEASES: &str = r#"[
        {"tag_name": "v2.0.0", "draft": true, "prerelease": false, "assets": []},
        {"tag_name": "v1.3.0-rc.1", "draft": false, "prerelease": true, "assets": []},
        {"tag_name": "v1.2.0", "draft": false, "prerelease": false, "assets": [
            {"name": "demo-1.2.0-x86_64.tar.gz", "browser_download_url": "https://example.invalid/a", "digest": "sha256:abcdef1234567890abcdef1234567890abcdef1234567890abcdef1234567890"},
            {"name": "demo-1.2.0-aarch64.tar.gz", "browser_download_url": "https://example.invalid/b", "digest": null}
        ]},
        {"tag_name": "v1.10.0-beta", "draft": false, "prerelease": false, "assets": []},
        {"tag_name": "v1.1.0", "draft": false, "prerelease": false, "assets": []}
    ]"#;

    async fn serve(server: &mut Server, body: &str) -> mockito::Mock {
        server
            .mock("GET", "/repos/acme/demo/releases?per_page=100")
            .match_header("accept", "application/vnd.github+json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_latest_stable_skips_drafts_and_prereleases() {
        let mut server = Server::new_async().await;
        let _m = serve(&mut server, RELEASES).await;

        let candidate = strategy(&server)
            .latest(&entry(""), Channel::Stable)
            .await
            .unwrap();
        // Not flagged as a prerelease by GitHub, so eligible
        assert_eq!(candidate.version, "1.10.0.beta");
        assert_eq!(candidate.tag, "v1.10.0-beta");
    }

    #[tokio::test]
    async fn test_latest_prerelease_channel() {
        let mut server = Server::new_async().await;
        let body = RELEASES.replace("v1.10.0-beta", "v0.9.0");
        let _m = serve(&mut server, &body).await;

        let s = strategy(&server);
        let stable = s.latest(&entry(""), Channel::Stable).await.unwrap();
        assert_eq!(stable.version, "1.2.0");

        let pre = s.latest(&entry(""), Channel::Prerelease).await.unwrap();
        assert_eq!(pre.version, "1.3.0.rc.1");
        assert_eq!(pre.tag, "v1.3.0-rc.1");
    }

    #[tokio::test]
    async fn test_tag_prefix_filters_and_strips() {
        let mut server = Server::new_async().await;
        let body = r#"[
            {"tag_name": "server-v9.0.0", "draft": false, "prerelease": false, "assets": []},
            {"tag_name": "cli-v1.4.0", "draft": false, "prerelease": false, "assets": []}
        ]"#;
        let _m = serve(&mut server, body).await;

        let candidate = strategy(&server)
            .latest(&entry("tag_prefix = \"cli-\""), Channel::Stable)
            .await
            .unwrap();
        assert_eq!(candidate.version, "1.4.0");
        assert_eq!(candidate.tag, "cli-v1.4.0");
    }

    #[tokio::test]
    async fn test_no_releases() {
        let mut server = Server::new_async().await;
        let _m = serve(&mut server, "[]").await;

        let err = strategy(&server)
            .latest(&entry(""), Channel::Stable)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NoReleases(_)));
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let mut server = Server::new_async().await;
        let _m = serve(&mut server, "{\"message\": \"oops\"").await;

        let err = strategy(&server)
            .latest(&entry(""), Channel::Stable)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_checksums_use_digest_then_download() {
        let mut server = Server::new_async().await;
        let download = server
            .mock("GET", "/download/demo-aarch64")
            .with_status(200)
            .with_body("hello")
            .expect(1)
            .create_async()
            .await;

        let e = entry(r#"asset = "demo-{version}-{arch}.tar.gz""#);
        let candidate = Candidate {
            version: "1.2.0".to_string(),
            tag: "v1.2.0".to_string(),
            assets: vec![
                ReleaseAsset {
                    name: "demo-1.2.0-x86_64.tar.gz".to_string(),
                    download_url: "http://127.0.0.1:1/never".to_string(),
                    digest: Some(Sha256Digest::new(DIGEST).unwrap()),
                },
                ReleaseAsset {
                    name: "demo-1.2.0-aarch64.tar.gz".to_string(),
                    download_url: format!("{}/download/demo-aarch64", server.url()),
                    digest: None,
                },
            ],
        };

        let sums = strategy(&server).checksums(&e, &candidate).await.unwrap();
        assert_eq!(sums[&Arch::X86_64].as_str(), DIGEST);
        assert_eq!(sums[&Arch::Aarch64].as_str(), HELLO_SHA256);
        download.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_asset() {
        let server = Server::new_async().await;
        let e = entry(r#"asset = "demo-{version}-{target}.tar.gz""#);
        let candidate = Candidate {
            version: "1.2.0".to_string(),
            tag: "v1.2.0".to_string(),
            assets: Vec::new(),
        };

        let err = strategy(&server)
            .checksums(&e, &candidate)
            .await
            .unwrap_err();
        match err {
            ResolveError::MissingAsset { asset, tag } => {
                assert_eq!(asset, "demo-1.2.0-x86_64-unknown-linux-gnu.tar.gz");
                assert_eq!(tag, "v1.2.0");
            }
            other => panic!("expected MissingAsset, got {other:?}"),
        }
    }
}
