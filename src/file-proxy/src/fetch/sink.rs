use super::BodyReader;
use crate::error::{FileProxyError, Result};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::io::{BufWriter, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio_util::io::SyncIoBridge;

/// Copy buffer used for every file write
pub const COPY_BUFFER_SIZE: usize = 5 * 1024 * 1024;

/// Destination for a fetched response body
#[async_trait]
pub trait Sink: Send + Sync {
    /// Drain `body`, returning the number of bytes written to disk.
    async fn consume(&self, body: BodyReader) -> Result<u64>;
}

/// Write the body to a single file, creating or truncating it.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
    mode: u32,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>, mode: u32) -> Self {
        Self {
            path: path.into(),
            mode,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn consume(&self, body: BodyReader) -> Result<u64> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(self.mode)
            .open(&self.path)
            .await
            .map_err(|e| {
                FileProxyError::Io(std::io::Error::new(
                    e.kind(),
                    format!("failed to open {}: {}", self.path.display(), e),
                ))
            })?;

        let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, body);
        let written = tokio::io::copy_buf(&mut reader, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;

        Ok(written)
    }
}

/// Metadata of the archive entry handed to a [`TarFilter`]
#[derive(Debug, Clone)]
pub struct TarEntry {
    pub path: PathBuf,
    pub kind: tar::EntryType,
    pub mode: u32,
}

impl TarEntry {
    pub fn base_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

/// Per-entry action applied while unpacking a tar.gz stream
pub trait TarFilter: Send + Sync {
    fn apply(&self, dst: &Path, entry: &TarEntry, reader: &mut dyn Read) -> Result<u64>;
}

impl<F> TarFilter for F
where
    F: Fn(&Path, &TarEntry, &mut dyn Read) -> Result<u64> + Send + Sync,
{
    fn apply(&self, dst: &Path, entry: &TarEntry, reader: &mut dyn Read) -> Result<u64> {
        self(dst, entry, reader)
    }
}

/// Recreate directories and regular files under the destination, keeping entry modes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unpack;

impl TarFilter for Unpack {
    fn apply(&self, dst: &Path, entry: &TarEntry, reader: &mut dyn Read) -> Result<u64> {
        if !is_contained(&entry.path) {
            tracing::warn!(entry = %entry.path.display(), "Skipping archive entry outside destination");
            return Ok(0);
        }

        let target = dst.join(&entry.path);
        if entry.kind.is_dir() {
            std::fs::create_dir_all(&target)?;
            Ok(0)
        } else if entry.kind.is_file() {
            write_file(&target, reader, entry.mode)
        } else {
            Ok(0)
        }
    }
}

/// Keep only the listed regular files, optionally renaming them.
///
/// Entries are matched on their base name and written flat into the destination.
#[derive(Debug, Clone, Default)]
pub struct Select {
    names: HashMap<String, String>,
    mode: Option<u32>,
}

impl Select {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keep(self, name: &str) -> Self {
        self.keep_as(name, name)
    }

    pub fn keep_as(mut self, name: &str, dest_name: &str) -> Self {
        self.names.insert(name.to_string(), dest_name.to_string());
        self
    }

    /// Override the entry mode of selected files
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }
}

impl TarFilter for Select {
    fn apply(&self, dst: &Path, entry: &TarEntry, reader: &mut dyn Read) -> Result<u64> {
        if !entry.kind.is_file() {
            return Ok(0);
        }

        let Some(dest_name) = entry.base_name().and_then(|n| self.names.get(n)) else {
            return Ok(0);
        };

        let mode = self.mode.unwrap_or(entry.mode);
        write_file(&dst.join(dest_name), reader, mode)
    }
}

/// Gunzip and untar the body into a destination directory.
#[derive(Clone)]
pub struct TarGzSink {
    dst: PathBuf,
    filters: Arc<Vec<Box<dyn TarFilter>>>,
}

impl TarGzSink {
    /// With no filters every entry is unpacked with [`Unpack`].
    pub fn new(dst: impl Into<PathBuf>, filters: Vec<Box<dyn TarFilter>>) -> Self {
        Self {
            dst: dst.into(),
            filters: Arc::new(filters),
        }
    }

    pub fn unpack_all(dst: impl Into<PathBuf>) -> Self {
        Self::new(dst, Vec::new())
    }
}

impl std::fmt::Debug for TarGzSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TarGzSink")
            .field("dst", &self.dst)
            .field("filters", &self.filters.len())
            .finish()
    }
}

#[async_trait]
impl Sink for TarGzSink {
    async fn consume(&self, body: BodyReader) -> Result<u64> {
        let dst = self.dst.clone();
        let filters = Arc::clone(&self.filters);
        let reader = SyncIoBridge::new(body);

        tokio::task::spawn_blocking(move || unpack_tar_gz(reader, &dst, &filters))
            .await
            .map_err(|e| FileProxyError::Archive(format!("extract task failed: {}", e)))?
    }
}

/// Visit each entry of a gzip-compressed tar stream, applying every filter in order.
pub fn unpack_tar_gz<R: Read>(
    reader: R,
    dst: &Path,
    filters: &[Box<dyn TarFilter>],
) -> Result<u64> {
    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    let mut written = 0u64;

    for entry in archive.entries().map_err(archive_error)? {
        let mut entry = entry.map_err(archive_error)?;
        let meta = TarEntry {
            path: entry.path().map_err(archive_error)?.into_owned(),
            kind: entry.header().entry_type(),
            mode: entry.header().mode().unwrap_or(0o644),
        };

        if filters.is_empty() {
            written += Unpack.apply(dst, &meta, &mut entry)?;
        } else {
            for filter in filters {
                written += filter.apply(dst, &meta, &mut entry)?;
            }
        }
    }

    Ok(written)
}

fn write_file(path: &Path, reader: &mut dyn Read, mode: u32) -> Result<u64> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)?;
    let mut writer = BufWriter::with_capacity(COPY_BUFFER_SIZE, file);
    let written = std::io::copy(reader, &mut writer)?;
    writer.flush()?;

    tracing::debug!(path = %path.display(), bytes = written, "Extracted archive entry");
    Ok(written)
}

fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn archive_error(e: std::io::Error) -> FileProxyError {
    FileProxyError::Archive(e.to_string())
}
