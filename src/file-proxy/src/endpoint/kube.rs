use super::Endpoint;
use crate::cache::HASH_FILE_SUFFIX;
use crate::config::UpstreamConfig;
use crate::error::Result;
use crate::fetch::Fetcher;
use async_trait::async_trait;
use std::time::Duration;

/// Kubernetes release CDN: `<base>/<version>/bin/linux/amd64/<file>`
#[derive(Debug, Clone)]
pub struct KubeRelease {
    base_url: String,
    stable_url: String,
    timeout: Duration,
    fetcher: Fetcher,
}

impl KubeRelease {
    pub fn new(fetcher: Fetcher, upstream: &UpstreamConfig) -> Self {
        Self {
            base_url: upstream.kube_release_url.trim_end_matches('/').to_string(),
            stable_url: upstream.kube_stable_url.clone(),
            timeout: upstream.resolve_timeout(),
            fetcher,
        }
    }

    fn url(&self, file: &str, version: &str) -> String {
        format!("{}/{}/bin/linux/amd64/{}", self.base_url, version, file)
    }
}

#[async_trait]
impl Endpoint for KubeRelease {
    async fn file_url(&self, name: &str, version: &str) -> Result<String> {
        Ok(self.url(name, version))
    }

    async fn hash_file_url(&self, name: &str, version: &str) -> Result<String> {
        Ok(self.url(&format!("{}{}", name, HASH_FILE_SUFFIX), version))
    }

    async fn last_tag(&self) -> Result<String> {
        let body = self
            .fetcher
            .fetch_text(&self.stable_url, Some(self.timeout))
            .await?;
        Ok(body.trim().to_string())
    }
}
