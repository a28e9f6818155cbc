use crate::error::{FileProxyError, Result};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Length of a hex-encoded SHA-256 digest
pub const SHA256_HEX_LEN: usize = 64;

/// Extract the expected digest of `artifact` from checksum file content.
///
/// A bare 64-character digest is returned as is. Anything else is read as a
/// `<digest>  <file>` manifest: an exact file-name match wins, otherwise the
/// first line mentioning `artifact` is used. `None` means the content makes no
/// claim about the artifact.
pub fn expected_digest(content: &str, artifact: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.len() == SHA256_HEX_LEN && !trimmed.contains(char::is_whitespace) {
        return Some(trimmed.to_string());
    }

    for line in trimmed.lines() {
        let mut fields = line.split_whitespace();
        if let (Some(digest), Some(file)) = (fields.next(), fields.next()) {
            // sha256sum marks binary-mode entries with a leading '*'
            if file.trim_start_matches('*') == artifact {
                return Some(digest.to_string());
            }
        }
    }

    trimmed
        .lines()
        .find(|line| line.contains(artifact))
        .and_then(|line| line.trim_start().split(' ').next())
        .filter(|digest| !digest.is_empty())
        .map(str::to_string)
}

/// Hex SHA-256 of a file, computed on a blocking thread.
pub async fn sha256_file(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<String> {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)?;
        Ok(format!("{:x}", hasher.finalize()))
    })
    .await
    .map_err(|e| FileProxyError::Io(std::io::Error::other(e)))?
}
