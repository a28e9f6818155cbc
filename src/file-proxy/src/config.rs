use crate::error::{FileProxyError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default port of the assets proxy
pub const DEFAULT_PROXY_PORT: u16 = 18080;

/// Default location of downloaded artifacts
pub const DEFAULT_ASSETS_DIR: &str = "~/kubernetes";

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// Kubernetes release CDN
pub const DEFAULT_KUBE_RELEASE_URL: &str = "https://dl.k8s.io";

/// Plain-text file holding the latest stable Kubernetes release tag
pub const DEFAULT_KUBE_STABLE_URL: &str = "https://dl.k8s.io/release/stable-1.txt";

pub const DEFAULT_ETCD_VERSION: &str = "v3.5.16";
pub const DEFAULT_COREDNS_VERSION: &str = "v1.11.3";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub heal: HealConfig,
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Grace period for in-flight requests after a termination signal
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PROXY_PORT
}

fn default_shutdown_timeout_secs() -> u64 {
    15
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root of the `<version>/<name>` cache layout
    #[serde(default = "default_cache_directory")]
    pub directory: String,
}

fn default_cache_directory() -> String {
    DEFAULT_ASSETS_DIR.to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: default_cache_directory(),
        }
    }
}

impl CacheConfig {
    /// Cache directory with a leading `~/` expanded to the home directory
    pub fn resolved_directory(&self) -> PathBuf {
        expand_home(&self.directory)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,
    #[serde(default = "default_kube_release_url")]
    pub kube_release_url: String,
    #[serde(default = "default_kube_stable_url")]
    pub kube_stable_url: String,
    /// Timeout applied to every endpoint resolution call
    #[serde(default = "default_resolve_timeout_secs")]
    pub resolve_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_github_api_url() -> String {
    DEFAULT_GITHUB_API_URL.to_string()
}

fn default_kube_release_url() -> String {
    DEFAULT_KUBE_RELEASE_URL.to_string()
}

fn default_kube_stable_url() -> String {
    DEFAULT_KUBE_STABLE_URL.to_string()
}

fn default_resolve_timeout_secs() -> u64 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    concat!("file-proxy/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            github_api_url: default_github_api_url(),
            kube_release_url: default_kube_release_url(),
            kube_stable_url: default_kube_stable_url(),
            resolve_timeout_secs: default_resolve_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl UpstreamConfig {
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Bound on invalidate-and-redirect cycles. `None` keeps redirecting forever.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HealConfig {
    #[serde(default)]
    pub max_redirects: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    #[serde(default = "default_etcd_version")]
    pub etcd_version: String,
    #[serde(default = "default_coredns_version")]
    pub coredns_version: String,
    /// Resolved through the proxy's latest-version redirect when absent
    #[serde(default)]
    pub kubernetes_version: Option<String>,
}

fn default_etcd_version() -> String {
    DEFAULT_ETCD_VERSION.to_string()
}

fn default_coredns_version() -> String {
    DEFAULT_COREDNS_VERSION.to_string()
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            etcd_version: default_etcd_version(),
            coredns_version: default_coredns_version(),
            kubernetes_version: None,
        }
    }
}

impl Config {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            FileProxyError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.directory.trim().is_empty() {
            return Err(FileProxyError::Config(
                "cache.directory must not be empty".to_string(),
            ));
        }
        if self.server.port == 0 {
            return Err(FileProxyError::Config(
                "server.port must be non-zero".to_string(),
            ));
        }
        for (field, value) in [
            ("upstream.github_api_url", &self.upstream.github_api_url),
            ("upstream.kube_release_url", &self.upstream.kube_release_url),
            ("upstream.kube_stable_url", &self.upstream.kube_stable_url),
        ] {
            if value.trim().is_empty() {
                return Err(FileProxyError::Config(format!("{} must not be empty", field)));
            }
        }
        Ok(())
    }
}

fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
