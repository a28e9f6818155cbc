use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FileProxyError>;

/// Body used for every "not found" answer, matching what plain HTTP muxes send.
pub const NOT_FOUND_BODY: &str = "404 page not found";

#[derive(Error, Debug)]
pub enum FileProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream answered with something other than 200 OK
    #[error("{status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("asset {asset:?} not found in release {tag:?}")]
    AssetNotFound { asset: String, tag: String },

    #[error("not a regular file: {}", .0.display())]
    NotRegularFile(PathBuf),

    #[error("not implemented")]
    NotImplemented,

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{path}: checksum still mismatched after {attempts} refetch attempt(s)")]
    HealLimit { path: String, attempts: u32 },
}

impl FileProxyError {
    /// Build an upstream error from a status and the (possibly empty) response body.
    pub fn upstream(status: reqwest::StatusCode, body: &str) -> Self {
        let message = if body.is_empty() {
            status.canonical_reason().unwrap_or("unknown status").to_string()
        } else {
            body.to_string()
        };
        FileProxyError::Upstream {
            status: status.as_u16(),
            message,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            FileProxyError::NotRegularFile(_) | FileProxyError::AssetNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            FileProxyError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            FileProxyError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            FileProxyError::HealLimit { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for FileProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self {
            FileProxyError::NotRegularFile(_) => NOT_FOUND_BODY.to_string(),
            FileProxyError::Upstream { message, .. } => message,
            other => other.to_string(),
        };
        (status, body).into_response()
    }
}
