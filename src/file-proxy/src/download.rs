//! Control-plane binaries pulled through a running proxy into a bin directory.

use crate::config::{Config, ControlPlaneConfig};
use crate::error::Result;
use crate::fetch::{FileSink, Fetcher, Select, Sink, TarGzSink};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

const BINARY_MODE: u32 = 0o755;

/// Kubernetes binaries served as plain files by the release CDN
pub const KUBE_BINARIES: [&str; 4] = [
    "kube-apiserver",
    "kube-controller-manager",
    "kube-scheduler",
    "kubelet",
];

/// Builds `http://<host>:<port>/<name>[/<version>]` URLs against the proxy
#[derive(Debug, Clone)]
pub struct ProxyUrls {
    prefix: String,
}

impl ProxyUrls {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            prefix: format!("http://{}:{}", host, port),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let host = match config.server.bind_address.as_str() {
            "0.0.0.0" | "::" => "127.0.0.1",
            other => other,
        };
        Self::new(host, config.server.port)
    }

    /// Without a version the proxy redirects to the latest release
    pub fn artifact(&self, name: &str, version: Option<&str>) -> String {
        match version {
            Some(version) => format!("{}/{}/{}", self.prefix, name, version),
            None => format!("{}/{}", self.prefix, name),
        }
    }
}

pub struct DownloadStep {
    pub name: String,
    pub url: String,
    pub sink: Box<dyn Sink>,
}

impl std::fmt::Debug for DownloadStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadStep")
            .field("name", &self.name)
            .field("url", &self.url)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct DownloadPlan {
    steps: Vec<DownloadStep>,
}

impl DownloadPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, name: &str, url: String, sink: impl Sink + 'static) -> Self {
        self.steps.push(DownloadStep {
            name: name.to_string(),
            url,
            sink: Box::new(sink),
        });
        self
    }

    pub fn steps(&self) -> &[DownloadStep] {
        &self.steps
    }

    /// etcd and etcdctl from the etcd archive, the kube binaries as files,
    /// and the full coredns archive, all into `bin_dir`.
    pub fn control_plane(versions: &ControlPlaneConfig, bin_dir: &Path, urls: &ProxyUrls) -> Self {
        let etcd = Select::new()
            .keep("etcd")
            .keep("etcdctl")
            .with_mode(BINARY_MODE);

        let mut plan = Self::new().step(
            "etcd",
            urls.artifact("etcd", Some(&versions.etcd_version)),
            TarGzSink::new(bin_dir, vec![Box::new(etcd)]),
        );

        for name in KUBE_BINARIES {
            plan = plan.step(
                name,
                urls.artifact(name, versions.kubernetes_version.as_deref()),
                FileSink::new(bin_dir.join(name), BINARY_MODE),
            );
        }

        plan.step(
            "coredns",
            urls.artifact("coredns", Some(&versions.coredns_version)),
            TarGzSink::unpack_all(bin_dir),
        )
    }

    /// Execute the steps in order, stopping at the first failure.
    pub async fn run(&self, fetcher: &Fetcher, cancel: &CancellationToken) -> Result<()> {
        for step in &self.steps {
            tracing::info!(name = %step.name, url = %step.url, "Downloading");
            let bytes = fetcher
                .fetch_with_cancel(&step.url, cancel, step.sink.as_ref())
                .await
                .inspect_err(|e| {
                    tracing::error!(name = %step.name, error = %e, "Download failed");
                })?;
            tracing::info!(name = %step.name, bytes = bytes, "Downloaded");
        }
        Ok(())
    }
}

/// Default install location of control-plane binaries
pub fn default_bin_dir() -> PathBuf {
    PathBuf::from("/usr/local/bin")
}
