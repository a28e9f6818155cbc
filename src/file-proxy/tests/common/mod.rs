//! Shared fixtures: an in-process upstream file server, a counting stub
//! endpoint and a proxy bound to an ephemeral port.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use file_proxy::endpoint::Endpoint;
use file_proxy::fetch::Fetcher;
use file_proxy::server::{self, AppState, Mounts};
use file_proxy::{KeyedSemaphore, Proxy, Result};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Static file server: `/files/<version>/<file>` answered from memory.
#[derive(Clone, Default)]
pub struct MockUpstream {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    hits: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every response, so concurrent requests overlap
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn put(&self, version: &str, file: &str, content: impl Into<Vec<u8>>) {
        self.files
            .lock()
            .unwrap()
            .insert(format!("{}/{}", version, file), content.into());
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Serve on `127.0.0.1:0`, returning the base URL
    pub async fn start(&self) -> String {
        let app = Router::new()
            .route("/files/:version/:file", get(serve_file))
            .with_state(self.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }
}

async fn serve_file(
    State(upstream): State<MockUpstream>,
    Path((version, file)): Path<(String, String)>,
) -> Response {
    upstream.hits.fetch_add(1, Ordering::SeqCst);
    if let Some(delay) = upstream.delay {
        tokio::time::sleep(delay).await;
    }
    let content = upstream
        .files
        .lock()
        .unwrap()
        .get(&format!("{}/{}", version, file))
        .cloned();
    match content {
        Some(body) => (StatusCode::OK, body).into_response(),
        None => (StatusCode::NOT_FOUND, "no such file").into_response(),
    }
}

/// Endpoint resolving to a [`MockUpstream`] and counting every call.
pub struct StubEndpoint {
    base: String,
    tag: String,
    artifact: Option<String>,
    slow: HashSet<String>,
    slow_delay: Duration,
    pub file_calls: AtomicUsize,
    pub hash_calls: AtomicUsize,
    pub tag_calls: AtomicUsize,
}

impl StubEndpoint {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.to_string(),
            tag: "v1.0.0".to_string(),
            artifact: None,
            slow: HashSet::new(),
            slow_delay: Duration::from_secs(2),
            file_calls: AtomicUsize::new(0),
            hash_calls: AtomicUsize::new(0),
            tag_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = tag.to_string();
        self
    }

    /// Upstream file name used for manifest lookups
    pub fn with_artifact(mut self, artifact: &str) -> Self {
        self.artifact = Some(artifact.to_string());
        self
    }

    /// Resolution of `name` stalls before answering
    pub fn with_slow_name(mut self, name: &str, delay: Duration) -> Self {
        self.slow.insert(name.to_string());
        self.slow_delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.file_calls.load(Ordering::SeqCst) + self.hash_calls.load(Ordering::SeqCst)
    }

    async fn stall(&self, name: &str) {
        if self.slow.contains(name) {
            tokio::time::sleep(self.slow_delay).await;
        }
    }
}

#[async_trait]
impl Endpoint for StubEndpoint {
    async fn file_url(&self, name: &str, version: &str) -> Result<String> {
        self.file_calls.fetch_add(1, Ordering::SeqCst);
        self.stall(name).await;
        Ok(format!("{}/files/{}/{}", self.base, version, name))
    }

    async fn hash_file_url(&self, name: &str, version: &str) -> Result<String> {
        self.hash_calls.fetch_add(1, Ordering::SeqCst);
        self.stall(name).await;
        Ok(format!("{}/files/{}/{}.sha256", self.base, version, name))
    }

    async fn last_tag(&self) -> Result<String> {
        self.tag_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.tag.clone())
    }

    fn artifact_name(&self, name: &str, _version: &str) -> String {
        self.artifact.clone().unwrap_or_else(|| name.to_string())
    }
}

/// A proxy serving every mount from one endpoint
pub struct TestProxy {
    pub addr: SocketAddr,
    pub assets: TempDir,
    proxy: Arc<Proxy>,
    shutdown: CancellationToken,
}

impl TestProxy {
    pub async fn start(endpoint: Arc<StubEndpoint>) -> Self {
        Self::start_with(endpoint, None).await
    }

    pub async fn start_with(endpoint: Arc<StubEndpoint>, max_heal: Option<u32>) -> Self {
        let assets = TempDir::new().expect("Failed to create temp directory");
        let fetcher = Fetcher::with_client(reqwest::Client::new());
        let proxy = Proxy::new(assets.path(), fetcher).with_max_heal_redirects(max_heal);
        let mounts = Mounts {
            coredns: endpoint.clone(),
            etcd: endpoint.clone(),
            fallback: endpoint,
        };

        let state = AppState::new(proxy, mounts);
        let proxy = state.proxy.clone();

        let shutdown = CancellationToken::new();
        let (addr, _handle) = server::serve(
            state,
            "127.0.0.1",
            0,
            shutdown.clone(),
        )
        .await
        .expect("Failed to start proxy");

        Self {
            addr,
            assets,
            proxy,
            shutdown,
        }
    }

    /// Per-key lock the running proxy fills and invalidates under
    pub fn semaphore(&self) -> &Arc<KeyedSemaphore> {
        self.proxy.semaphore()
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn slot(&self, version: &str, name: &str) -> std::path::PathBuf {
        self.assets.path().join(version).join(name)
    }

    /// Write a payload and, optionally, its checksum file straight into the cache
    pub fn seed(&self, version: &str, name: &str, payload: &[u8], checksum: Option<&str>) {
        let path = self.slot(version, name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, payload).unwrap();
        if let Some(checksum) = checksum {
            std::fs::write(format!("{}.sha256", path.display()), checksum).unwrap();
        }
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// HTTP client that reports redirects instead of following them
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}
