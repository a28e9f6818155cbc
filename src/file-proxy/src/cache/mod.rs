//! On-disk artifact cache: `<assets>/<version>/<name>` plus `<name>.sha256`.

pub mod checksum;

pub use checksum::{expected_digest, sha256_file};

use crate::error::{FileProxyError, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Suffix of the checksum file stored next to each payload
pub const HASH_FILE_SUFFIX: &str = ".sha256";

/// Suffix of the payload while a fill is streaming it
pub const PARTIAL_FILE_SUFFIX: &str = ".partial";

/// Payload and checksum file of one (name, version) artifact
#[derive(Debug, Clone)]
pub struct CacheSlot {
    payload: PathBuf,
    hash: PathBuf,
    partial: PathBuf,
}

impl CacheSlot {
    pub fn new(assets_dir: &Path, name: &str, version: &str) -> Self {
        let payload = assets_dir.join(version).join(name);
        Self {
            hash: with_suffix(&payload, HASH_FILE_SUFFIX),
            partial: with_suffix(&payload, PARTIAL_FILE_SUFFIX),
            payload,
        }
    }

    pub fn payload_path(&self) -> &Path {
        &self.payload
    }

    pub fn hash_path(&self) -> &Path {
        &self.hash
    }

    pub fn partial_path(&self) -> &Path {
        &self.partial
    }

    pub async fn payload_exists(&self) -> Result<bool> {
        regular_file_exists(&self.payload).await
    }

    pub async fn hash_exists(&self) -> Result<bool> {
        regular_file_exists(&self.hash).await
    }

    pub async fn payload_len(&self) -> Result<u64> {
        Ok(tokio::fs::metadata(&self.payload).await?.len())
    }

    /// Raw checksum file content, `None` when the slot has no checksum file
    pub async fn read_checksum(&self) -> Result<Option<String>> {
        if !self.hash_exists().await? {
            return Ok(None);
        }
        let raw = tokio::fs::read(&self.hash).await?;
        Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
    }

    /// Digest the payload must have, if the checksum file states one for `artifact`
    pub async fn expected_digest(&self, artifact: &str) -> Result<Option<String>> {
        Ok(self
            .read_checksum()
            .await?
            .and_then(|content| expected_digest(&content, artifact)))
    }

    /// Move a fully written partial payload into place
    pub async fn commit(&self) -> Result<()> {
        tokio::fs::rename(&self.partial, &self.payload).await?;
        Ok(())
    }

    /// Remove payload and checksum file together.
    ///
    /// The payload goes first: a leftover checksum file without payload only
    /// causes a refill, while a leftover payload would be served unchecked.
    pub async fn invalidate(&self) -> Result<()> {
        remove_if_exists(&self.payload).await?;
        remove_if_exists(&self.hash).await?;
        tracing::info!(path = %self.payload.display(), "Cache slot invalidated");
        Ok(())
    }

    /// Best-effort cleanup after a failed fill. Removes the partial payload
    /// and the checksum file, including a stale checksum file left behind by
    /// an earlier fill that was cancelled before it committed.
    pub async fn discard_fill(&self) {
        for path in [&self.partial, &self.hash] {
            if let Err(e) = remove_if_exists(path).await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to clean up after fill");
            }
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

async fn regular_file_exists(path: &Path) -> Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_dir() => Err(FileProxyError::NotRegularFile(path.to_path_buf())),
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(FileProxyError::Io(e)),
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FileProxyError::Io(e)),
    }
}
