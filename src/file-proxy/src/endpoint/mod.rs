//! Resolution of artifact (name, version) pairs to upstream download URLs.

pub mod github;
pub mod kube;

pub use github::GithubReleases;
pub use kube::KubeRelease;

use crate::error::Result;
use async_trait::async_trait;

/// Upstream source of release artifacts.
///
/// Implementations hold no per-request state and never cache resolution results.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Download URL of the artifact
    async fn file_url(&self, name: &str, version: &str) -> Result<String>;

    /// Download URL of the checksum file covering the artifact
    async fn hash_file_url(&self, name: &str, version: &str) -> Result<String>;

    /// Latest released version tag
    async fn last_tag(&self) -> Result<String>;

    /// Upstream file name of the artifact, used to find its line in a
    /// multi-entry checksum manifest. Never touches the network.
    fn artifact_name(&self, name: &str, version: &str) -> String {
        let _ = version;
        name.to_string()
    }
}
