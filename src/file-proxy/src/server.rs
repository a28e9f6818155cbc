use crate::config::Config;
use crate::endpoint::{Endpoint, GithubReleases, KubeRelease};
use crate::error::{FileProxyError, Result};
use crate::fetch::Fetcher;
use crate::proxy::{clean_path, Proxy};
use axum::{
    extract::State,
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Endpoints bound to the route prefixes. `/coredns/` and `/etcd/` resolve
/// through GitHub releases, everything else through the Kubernetes CDN.
#[derive(Clone)]
pub struct Mounts {
    pub coredns: Arc<dyn Endpoint>,
    pub etcd: Arc<dyn Endpoint>,
    pub fallback: Arc<dyn Endpoint>,
}

impl Mounts {
    pub fn from_config(config: &Config, fetcher: &Fetcher) -> Self {
        Self {
            coredns: Arc::new(GithubReleases::coredns(fetcher.clone(), &config.upstream)),
            etcd: Arc::new(GithubReleases::etcd(fetcher.clone(), &config.upstream)),
            fallback: Arc::new(KubeRelease::new(fetcher.clone(), &config.upstream)),
        }
    }

    /// Endpoint for a request path, chosen by its first segment
    pub fn route(&self, path: &str) -> &Arc<dyn Endpoint> {
        let cleaned = clean_path(path);
        match cleaned.trim_start_matches('/').split('/').next().unwrap_or("") {
            "coredns" => &self.coredns,
            "etcd" => &self.etcd,
            _ => &self.fallback,
        }
    }
}

impl std::fmt::Debug for Mounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mounts").finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub struct AppState {
    pub proxy: Arc<Proxy>,
    pub mounts: Mounts,
}

impl AppState {
    pub fn new(proxy: Proxy, mounts: Mounts) -> Self {
        Self {
            proxy: Arc::new(proxy),
            mounts,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let fetcher = Fetcher::new(&config.upstream)?;
        let proxy = Proxy::new(config.cache.resolved_directory(), fetcher.clone())
            .with_max_heal_redirects(config.heal.max_redirects);
        Ok(Self::new(proxy, Mounts::from_config(config, &fetcher)))
    }
}

async fn dispatch(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    tracing::debug!(method = %method, path = %uri.path(), "Artifact request");
    let endpoint = state.mounts.route(uri.path());
    state.proxy.serve(endpoint.as_ref(), &method, &uri).await
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Leading-dot paths never parse as artifacts
        .route("/.health", get(health))
        .fallback(dispatch)
        .with_state(state)
}

/// Bind and serve until `shutdown` is cancelled. Returns the bound address,
/// which differs from the configured one when port 0 is requested.
pub async fn start_server(
    config: Config,
    shutdown: CancellationToken,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let state = AppState::from_config(&config)?;
    serve(state, &config.server.bind_address, config.server.port, shutdown).await
}

/// Serve an already assembled [`AppState`]
pub async fn serve(
    state: AppState,
    bind_address: &str,
    port: u16,
    shutdown: CancellationToken,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let addr = format!("{}:{}", bind_address, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| FileProxyError::Config(format!("Failed to bind to {}: {}", addr, e)))?;
    let local_addr = listener.local_addr()?;

    tracing::info!(
        address = %local_addr,
        assets_dir = %state.proxy.assets_dir().display(),
        "File proxy listening"
    );

    let app = build_router(state);
    let handle = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        match result {
            Ok(()) => tracing::info!("File proxy stopped"),
            Err(e) => tracing::error!(error = %e, "File proxy server error"),
        }
    });

    Ok((local_addr, handle))
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
