//! GET a URL and hand the response body to a [`Sink`].

pub mod sink;

pub use sink::{FileSink, Select, Sink, TarEntry, TarFilter, TarGzSink, Unpack};

use crate::config::UpstreamConfig;
use crate::error::{FileProxyError, Result};
use futures::TryStreamExt;
use reqwest::{Client, Response, StatusCode};
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

/// Response body exposed to sinks as a byte reader
pub type BodyReader = Pin<Box<dyn AsyncRead + Send>>;

/// Shared HTTP client for upstream downloads and endpoint lookups
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(upstream: &UpstreamConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(upstream.user_agent.clone())
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(upstream.connect_timeout())
            .build()
            .map_err(FileProxyError::Http)?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Issue a GET and fail with [`FileProxyError::Upstream`] unless the answer is 200.
    pub async fn get(&self, url: &str, timeout: Option<Duration>) -> Result<Response> {
        let mut request = self.client.get(url);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(url = %url, status = status.as_u16(), "Upstream returned non-200 status");
            return Err(FileProxyError::upstream(status, &body));
        }

        Ok(response)
    }

    /// Stream the body of `url` into `sink`, returning the bytes it wrote.
    pub async fn fetch(&self, url: &str, sink: &dyn Sink) -> Result<u64> {
        let response = self.get(url, None).await?;
        tracing::debug!(url = %url, content_length = ?response.content_length(), "Fetching");

        let written = sink.consume(body_reader(response)).await?;
        tracing::debug!(url = %url, bytes = written, "Fetch complete");
        Ok(written)
    }

    /// Like [`Fetcher::fetch`], aborting as soon as `cancel` fires.
    pub async fn fetch_with_cancel(
        &self,
        url: &str,
        cancel: &CancellationToken,
        sink: &dyn Sink,
    ) -> Result<u64> {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(url = %url, "Fetch cancelled");
                Err(FileProxyError::Io(std::io::Error::new(
                    std::io::ErrorKind::Interrupted,
                    format!("fetch of {} cancelled", url),
                )))
            }
            result = self.fetch(url, sink) => result,
        }
    }

    pub async fn fetch_text(&self, url: &str, timeout: Option<Duration>) -> Result<String> {
        let response = self.get(url, timeout).await?;
        Ok(response.text().await?)
    }
}

fn body_reader(response: Response) -> BodyReader {
    let stream = response.bytes_stream().map_err(std::io::Error::other);
    Box::pin(StreamReader::new(stream))
}
