//! Request handling for `/<name>[/<version>]`: resolve, fill on miss, validate, serve.

pub mod path;

pub use path::{clean_path, parse_request_path, ArtifactRequest};

use crate::cache::{sha256_file, CacheSlot};
use crate::endpoint::Endpoint;
use crate::error::{FileProxyError, Result, NOT_FOUND_BODY};
use crate::fetch::{FileSink, Fetcher};
use crate::semaphore::KeyedSemaphore;
use axum::body::Body;
use axum::http::{header, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Redirect, Response};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Query parameter counting invalidate-and-redirect cycles when a heal bound is set
pub const HEAL_QUERY_PARAM: &str = "heal";

const FILE_MODE: u32 = 0o644;
const SERVE_CHUNK_SIZE: usize = 64 * 1024;

/// Outcome of re-validating a slot under its key
enum Recheck {
    Removed,
    Refilled(Option<String>),
}

/// Caching proxy shared by every mounted endpoint
#[derive(Debug, Clone)]
pub struct Proxy {
    assets_dir: PathBuf,
    semaphore: Arc<KeyedSemaphore>,
    fetcher: Fetcher,
    max_heal_redirects: Option<u32>,
}

impl Proxy {
    pub fn new(assets_dir: impl Into<PathBuf>, fetcher: Fetcher) -> Self {
        Self {
            assets_dir: assets_dir.into(),
            semaphore: KeyedSemaphore::new(),
            fetcher,
            max_heal_redirects: None,
        }
    }

    /// Bound the number of heal redirects a client may follow for one key
    pub fn with_max_heal_redirects(mut self, max: Option<u32>) -> Self {
        self.max_heal_redirects = max;
        self
    }

    pub fn assets_dir(&self) -> &std::path::Path {
        &self.assets_dir
    }

    pub fn semaphore(&self) -> &Arc<KeyedSemaphore> {
        &self.semaphore
    }

    /// Answer one request against `endpoint`. Errors are logged and mapped to a response.
    pub async fn serve(&self, endpoint: &dyn Endpoint, method: &Method, uri: &Uri) -> Response {
        match self.handle(endpoint, method, uri).await {
            Ok(response) => response,
            Err(e) => {
                let status = e.status_code();
                if status.is_server_error() {
                    tracing::error!(path = %uri.path(), status = status.as_u16(), error = %e, "Request failed");
                } else {
                    tracing::warn!(path = %uri.path(), status = status.as_u16(), error = %e, "Request failed");
                }
                e.into_response()
            }
        }
    }

    async fn handle(&self, endpoint: &dyn Endpoint, method: &Method, uri: &Uri) -> Result<Response> {
        if method != Method::GET && method != Method::HEAD {
            return Ok(StatusCode::METHOD_NOT_ALLOWED.into_response());
        }
        let head = method == Method::HEAD;

        let Some(request) = parse_request_path(uri.path()) else {
            return Ok(not_found());
        };

        let key = request.key();
        let (name, version) = match &request {
            ArtifactRequest::Latest { name } => {
                let tag = endpoint.last_tag().await?;
                tracing::info!(name = %name, version = %tag, "Resolved latest version");
                return Ok(Redirect::temporary(&format!("/{}/{}", name, tag)).into_response());
            }
            ArtifactRequest::Versioned { name, version } => (name.as_str(), version.as_str()),
        };

        let slot = CacheSlot::new(&self.assets_dir, name, version);

        if !slot.payload_exists().await? {
            if head {
                tracing::debug!(path = %key, "HEAD on uncached artifact");
                return Ok(not_found());
            }
            self.fill(endpoint, &slot, &key, name, version).await?;
        } else {
            tracing::debug!(path = %key, "Cache hit");
        }

        let artifact = endpoint.artifact_name(name, version);
        let (mut expected, valid) = verify(&slot, &key, &artifact).await?;

        if head {
            let mut response = Response::new(Body::empty());
            if valid {
                let len = slot.payload_len().await?;
                response
                    .headers_mut()
                    .insert(header::CONTENT_LENGTH, HeaderValue::from(len));
            }
            return Ok(with_artifact_headers(response, expected.as_deref()));
        }

        if !valid {
            match self.invalidate_if_corrupt(&slot, &key, &artifact).await? {
                Recheck::Refilled(digest) => expected = digest,
                Recheck::Removed => return self.heal_redirect(&key, uri),
            }
        }

        let file = tokio::fs::File::open(slot.payload_path()).await?;
        let len = file.metadata().await?.len();
        let body = Body::from_stream(ReaderStream::with_capacity(file, SERVE_CHUNK_SIZE));

        let mut response = Response::new(body);
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(len));
        Ok(with_artifact_headers(response, expected.as_deref()))
    }

    /// Populate a missing slot. Only one fill per key runs at a time; waiters
    /// that find the slot filled once they get the key skip the fetch.
    async fn fill(
        &self,
        endpoint: &dyn Endpoint,
        slot: &CacheSlot,
        key: &str,
        name: &str,
        version: &str,
    ) -> Result<()> {
        let _guard = self.semaphore.acquire(key).await;

        if slot.payload_exists().await? {
            tracing::debug!(path = %key, "Filled by a concurrent request");
            return Ok(());
        }

        tracing::info!(name = %name, version = %version, "Cache miss, fetching from upstream");
        let result = self.fetch_into(endpoint, slot, name, version).await;
        if result.is_err() {
            slot.discard_fill().await;
        }
        let bytes = result?;

        tracing::info!(name = %name, version = %version, bytes = bytes, "Cached artifact");
        Ok(())
    }

    /// Drop a slot that failed validation, holding the key so a fill in
    /// progress is never cut short. The slot is checked again under the key:
    /// when a concurrent fill replaced it with a valid payload, nothing is
    /// removed and the fresh digest is returned instead.
    async fn invalidate_if_corrupt(
        &self,
        slot: &CacheSlot,
        key: &str,
        artifact: &str,
    ) -> Result<Recheck> {
        let _guard = self.semaphore.acquire(key).await;

        if !slot.payload_exists().await? {
            tracing::debug!(path = %key, "Invalidated by a concurrent request");
            return Ok(Recheck::Removed);
        }

        let (expected, valid) = verify(slot, key, artifact).await?;
        if valid {
            tracing::debug!(path = %key, "Refilled by a concurrent request");
            return Ok(Recheck::Refilled(expected));
        }

        slot.invalidate().await?;
        Ok(Recheck::Removed)
    }

    async fn fetch_into(
        &self,
        endpoint: &dyn Endpoint,
        slot: &CacheSlot,
        name: &str,
        version: &str,
    ) -> Result<u64> {
        let hash_url = endpoint.hash_file_url(name, version).await?;
        self.fetcher
            .fetch(&hash_url, &FileSink::new(slot.hash_path(), FILE_MODE))
            .await?;

        let file_url = endpoint.file_url(name, version).await?;
        let bytes = self
            .fetcher
            .fetch(&file_url, &FileSink::new(slot.partial_path(), FILE_MODE))
            .await?;

        slot.commit().await?;
        Ok(bytes)
    }

    fn heal_redirect(&self, key: &str, uri: &Uri) -> Result<Response> {
        let location = format!("/{}", key);
        let Some(max) = self.max_heal_redirects else {
            return Ok(Redirect::temporary(&location).into_response());
        };

        let attempts = heal_attempts(uri.query());
        if attempts >= max {
            return Err(FileProxyError::HealLimit {
                path: location,
                attempts,
            });
        }

        Ok(Redirect::temporary(&format!(
            "{}?{}={}",
            location,
            HEAL_QUERY_PARAM,
            attempts + 1
        ))
        .into_response())
    }
}

/// Expected digest of a cached payload and whether the payload matches it.
/// A slot without a usable checksum counts as valid.
async fn verify(slot: &CacheSlot, key: &str, artifact: &str) -> Result<(Option<String>, bool)> {
    let Some(expected) = slot.expected_digest(artifact).await? else {
        return Ok((None, true));
    };

    let actual = sha256_file(slot.payload_path()).await?;
    if actual != expected {
        tracing::warn!(
            path = %key,
            expected = %expected,
            actual = %actual,
            "Checksum mismatch"
        );
        return Ok((Some(expected), false));
    }
    Ok((Some(expected), true))
}

fn heal_attempts(query: Option<&str>) -> u32 {
    query
        .into_iter()
        .flat_map(|q| q.split('&'))
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == HEAL_QUERY_PARAM)
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0)
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, NOT_FOUND_BODY).into_response()
}

fn with_artifact_headers(mut response: Response, digest: Option<&str>) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM));
    if let Some(value) = digest.and_then(|d| HeaderValue::from_str(d).ok()) {
        headers.insert(header::ETAG, value);
    }
    response
}
