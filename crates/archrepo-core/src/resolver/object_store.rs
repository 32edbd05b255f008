use std::collections::BTreeMap;

use archrepo_schema::{Arch, Checksum, PackageEntry, Upstream, normalize_version};
use async_trait::async_trait;
use reqwest::Client;

use super::{Candidate, Channel, ResolveError, Strategy, fetch, hash_sources, wrong_kind};

/// Resolves `object-storage-release` entries.
///
/// The bucket publishes a small text object holding the current version.
/// Artifacts have no published digests and are always downloaded and hashed.
pub struct ObjectStorageStrategy {
    client: Client,
}

impl ObjectStorageStrategy {
    /// Strategy using `client` for all requests.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Strategy for ObjectStorageStrategy {
    async fn latest(
        &self,
        entry: &PackageEntry,
        channel: Channel,
    ) -> Result<Candidate, ResolveError> {
        let Upstream::ObjectStorageRelease(os) = &entry.upstream else {
            return Err(wrong_kind(entry));
        };

        let endpoint = match (&os.prerelease_endpoint, channel) {
            (Some(pre), Channel::Prerelease) => pre.as_str(),
            _ => os.version_endpoint.as_str(),
        };
        let url = format!(
            "{}/{}",
            os.bucket_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );

        let body = fetch(&self.client, &url, None)
            .await?
            .text()
            .await
            .map_err(|source| ResolveError::Http {
                url: url.clone(),
                source,
            })?;

        let raw = body.trim();
        if raw.is_empty() {
            return Err(ResolveError::NoReleases(entry.name.clone()));
        }
        if raw.lines().count() > 1 {
            return Err(ResolveError::Malformed {
                url,
                message: "version object has more than one line".to_string(),
            });
        }

        let version = normalize_version(raw, "");
        Ok(Candidate {
            tag: version.clone(),
            version,
            assets: Vec::new(),
        })
    }

    async fn checksums(
        &self,
        entry: &PackageEntry,
        candidate: &Candidate,
    ) -> Result<BTreeMap<Arch, Checksum>, ResolveError> {
        let urls: Vec<(Arch, String)> = entry
            .architectures
            .iter()
            .map(|&arch| {
                (
                    arch,
                    entry.source_url_with(arch, &candidate.version, &candidate.tag),
                )
            })
            .collect();
        hash_sources(&self.client, entry, urls).await
    }
}
