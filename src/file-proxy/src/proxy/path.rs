use crate::cache::{HASH_FILE_SUFFIX, PARTIAL_FILE_SUFFIX};

/// Parsed form of `/<name>[/<version>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactRequest {
    /// No version given, resolve the latest tag and redirect
    Latest { name: String },
    Versioned { name: String, version: String },
}

impl ArtifactRequest {
    /// Semaphore key of a versioned request, its normalized path
    pub fn key(&self) -> String {
        match self {
            ArtifactRequest::Latest { name } => name.clone(),
            ArtifactRequest::Versioned { name, version } => format!("{}/{}", name, version),
        }
    }
}

/// Parse a request path. `None` means the path is answered with 404.
pub fn parse_request_path(path: &str) -> Option<ArtifactRequest> {
    let cleaned = clean_path(path);
    let rel = cleaned.strip_prefix('/').unwrap_or(&cleaned);

    if rel.is_empty() || rel.starts_with('.') {
        return None;
    }

    let segments: Vec<&str> = rel.split('/').collect();
    // checksum and in-progress files share the payload's directory
    if segments
        .iter()
        .any(|s| s.ends_with(HASH_FILE_SUFFIX) || s.ends_with(PARTIAL_FILE_SUFFIX))
    {
        return None;
    }

    match segments.as_slice() {
        [name] => Some(ArtifactRequest::Latest {
            name: (*name).to_string(),
        }),
        [name, version] if !version.starts_with('.') => Some(ArtifactRequest::Versioned {
            name: (*name).to_string(),
            version: (*version).to_string(),
        }),
        _ => None,
    }
}

/// Lexical path normalization: collapse repeated slashes, drop `.`, resolve `..`
/// without climbing above the root, drop the trailing slash.
pub fn clean_path(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            s => stack.push(s),
        }
    }
    format!("/{}", stack.join("/"))
}
