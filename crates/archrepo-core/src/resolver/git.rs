use std::collections::BTreeMap;

use archrepo_schema::{
    Arch, Checksum, PackageEntry, Upstream, compare_versions, is_prerelease, normalize_version,
};
use async_trait::async_trait;

use super::{Candidate, Channel, ResolveError, Strategy, wrong_kind};
use crate::command::ToolCommand;

/// Resolves `git-upstream` entries from the repository's tags.
///
/// Sources are git checkouts, which pacman cannot hash, so every
/// architecture gets `SKIP`.
pub struct GitStrategy {
    git: ToolCommand,
}

impl GitStrategy {
    /// Strategy running `git` (or a substitute) to list tags.
    pub fn new(git: ToolCommand) -> Self {
        Self { git }
    }

    async fn list_tags(&self, url: &str) -> Result<Vec<String>, ResolveError> {
        let mut cmd = tokio::process::Command::from(self.git.to_command());
        cmd.args(["ls-remote", "--tags", "--refs", url])
            .stdin(std::process::Stdio::null());

        tracing::debug!(%url, "listing git tags");
        let output = cmd
            .output()
            .await
            .map_err(|e| ResolveError::Git(format!("failed to run {}: {e}", self.git)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ResolveError::Git(format!(
                "ls-remote {url} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(parse_ls_remote(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Extract tag names from `git ls-remote --tags` output.
///
/// Peeled entries (`refs/tags/x^{}`) are dropped.
fn parse_ls_remote(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter_map(|r| r.strip_prefix("refs/tags/"))
        .filter(|tag| !tag.ends_with("^{}"))
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Strategy for GitStrategy {
    async fn latest(
        &self,
        entry: &PackageEntry,
        channel: Channel,
    ) -> Result<Candidate, ResolveError> {
        let Upstream::GitUpstream(git) = &entry.upstream else {
            return Err(wrong_kind(entry));
        };

        let mut best: Option<Candidate> = None;
        for tag in self.list_tags(&git.git_url).await? {
            if !tag.starts_with(git.tag_prefix.as_str()) {
                continue;
            }
            let version = normalize_version(&tag, &git.tag_prefix);
            // Tags like `nightly` or `latest` are not releases
            if !version.starts_with(|c: char| c.is_ascii_digit()) {
                continue;
            }
            if is_prerelease(&version) && !channel.includes_prereleases() {
                continue;
            }
            if best
                .as_ref()
                .is_none_or(|b| compare_versions(&version, &b.version).is_gt())
            {
                best = Some(Candidate {
                    version,
                    tag,
                    assets: Vec::new(),
                });
            }
        }

        best.ok_or_else(|| ResolveError::NoReleases(entry.name.clone()))
    }

    async fn checksums(
        &self,
        entry: &PackageEntry,
        _candidate: &Candidate,
    ) -> Result<BTreeMap<Arch, Checksum>, ResolveError> {
        Ok(entry
            .architectures
            .iter()
            .map(|&arch| (arch, Checksum::Skip))
            .collect())
    }
}
