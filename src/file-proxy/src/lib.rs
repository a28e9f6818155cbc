pub mod cache;
pub mod config;
pub mod download;
pub mod endpoint;
pub mod error;
pub mod fetch;
pub mod proxy;
pub mod semaphore;
pub mod server;

pub use cache::CacheSlot;
pub use config::Config;
pub use endpoint::{Endpoint, GithubReleases, KubeRelease};
pub use error::{FileProxyError, Result};
pub use fetch::Fetcher;
pub use proxy::Proxy;
pub use semaphore::{KeyedSemaphore, SemaphoreGuard};

/// Start the file proxy with the given configuration
pub async fn start_server(
    config: Config,
    shutdown: tokio_util::sync::CancellationToken,
) -> Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>)> {
    server::start_server(config, shutdown).await
}
