use super::Endpoint;
use crate::config::UpstreamConfig;
use crate::error::{FileProxyError, Result};
use crate::fetch::Fetcher;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Derives an upstream file name from a release tag
pub type NameFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    name: String,
    browser_download_url: String,
}

/// Artifacts published as GitHub release assets
#[derive(Clone)]
pub struct GithubReleases {
    owner: String,
    repo: String,
    file: NameFn,
    hash_file: NameFn,
    api_url: String,
    timeout: Duration,
    fetcher: Fetcher,
}

impl GithubReleases {
    pub fn new<F, H>(owner: &str, repo: &str, file: F, hash_file: H, fetcher: Fetcher) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
        H: Fn(&str) -> String + Send + Sync + 'static,
    {
        let defaults = UpstreamConfig::default();
        Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            file: Arc::new(file),
            hash_file: Arc::new(hash_file),
            api_url: defaults.github_api_url.clone(),
            timeout: defaults.resolve_timeout(),
            fetcher,
        }
    }

    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn configured(self, upstream: &UpstreamConfig) -> Self {
        self.with_api_url(&upstream.github_api_url)
            .with_timeout(upstream.resolve_timeout())
    }

    /// coredns/coredns: `coredns_<version without v>_linux_amd64.tgz` plus a `.sha256` sibling
    pub fn coredns(fetcher: Fetcher, upstream: &UpstreamConfig) -> Self {
        Self::new(
            "coredns",
            "coredns",
            |tag| format!("coredns_{}_linux_amd64.tgz", strip_v(tag)),
            |tag| format!("coredns_{}_linux_amd64.tgz.sha256", strip_v(tag)),
            fetcher,
        )
        .configured(upstream)
    }

    /// etcd-io/etcd: `etcd-<version>-linux-amd64.tar.gz` covered by a `SHA256SUMS` manifest
    pub fn etcd(fetcher: Fetcher, upstream: &UpstreamConfig) -> Self {
        Self::new(
            "etcd-io",
            "etcd",
            |tag| format!("etcd-{}-linux-amd64.tar.gz", tag),
            |_| "SHA256SUMS".to_string(),
            fetcher,
        )
        .configured(upstream)
    }

    async fn release(&self, selector: &str) -> Result<Release> {
        let url = format!(
            "{}/repos/{}/{}/releases/{}",
            self.api_url, self.owner, self.repo, selector
        );
        tracing::debug!(url = %url, "Looking up GitHub release");

        let body = self.fetcher.fetch_text(&url, Some(self.timeout)).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn asset_url(&self, tag: &str, asset: &str) -> Result<String> {
        let release = self.release(&format!("tags/{}", tag)).await?;

        release
            .assets
            .into_iter()
            .find(|a| a.name == asset)
            .map(|a| a.browser_download_url)
            .ok_or_else(|| {
                tracing::warn!(
                    repo = %format!("{}/{}", self.owner, self.repo),
                    tag = %tag,
                    asset = %asset,
                    "Release has no matching asset"
                );
                FileProxyError::AssetNotFound {
                    asset: asset.to_string(),
                    tag: tag.to_string(),
                }
            })
    }
}

impl std::fmt::Debug for GithubReleases {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubReleases")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[async_trait]
impl Endpoint for GithubReleases {
    async fn file_url(&self, _name: &str, version: &str) -> Result<String> {
        self.asset_url(version, &(self.file)(version)).await
    }

    async fn hash_file_url(&self, _name: &str, version: &str) -> Result<String> {
        self.asset_url(version, &(self.hash_file)(version)).await
    }

    async fn last_tag(&self) -> Result<String> {
        Ok(self.release("latest").await?.tag_name)
    }

    fn artifact_name(&self, _name: &str, version: &str) -> String {
        (self.file)(version)
    }
}

fn strip_v(tag: &str) -> &str {
    tag.strip_prefix('v').unwrap_or(tag)
}
