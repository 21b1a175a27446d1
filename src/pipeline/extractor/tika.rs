//! Content-extraction collaborator.
//!
//! `ContentExtractor` is the seam: the runner only knows it can turn a file
//! into a metadata blob and plain text. `TikaClient` speaks the Tika server
//! upload protocol: the raw file is `PUT` with its exact length to `/meta`
//! (JSON metadata) and then to `/tika` (plain text).

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Body;
use reqwest::header::ACCEPT;

use super::error::ExtractError;

/// Turns one file into metadata and text. Shared read-only across threads.
pub trait ContentExtractor: Send + Sync {
    /// Metadata blob (JSON) for the file at `path` of `len` bytes.
    fn metadata(&self, path: &Path, len: u64) -> Result<String, ExtractError>;

    /// Plain-text content of the file at `path` of `len` bytes.
    fn text(&self, path: &Path, len: u64) -> Result<String, ExtractError>;
}

pub struct TikaClient {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl TikaClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, ExtractError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ExtractError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs,
        })
    }

    fn put_file(&self, endpoint: &str, accept: &str, path: &Path, len: u64) -> Result<String, ExtractError> {
        let file = File::open(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ExtractError::FileNotFound(path.to_path_buf())
            } else {
                ExtractError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let url = format!("{}/{endpoint}", self.base_url);
        let response = self
            .client
            .put(&url)
            .header(ACCEPT, accept)
            .body(Body::sized(file, len))
            .send()
            .map_err(|e| {
                if is_unreachable(&e) {
                    ExtractError::Connection(self.base_url.clone())
                } else if e.is_timeout() {
                    ExtractError::HttpClient(format!(
                        "Request timed out after {}s",
                        self.timeout_secs
                    ))
                } else {
                    ExtractError::HttpClient(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ExtractError::Service {
                status: status.as_u16(),
                body,
            });
        }

        response
            .text()
            .map_err(|e| ExtractError::HttpClient(e.to_string()))
    }
}

/// The service could not be reached. A refused connection can surface as a
/// request body error while the file is still streaming, so body errors
/// raised before any response arrives count too.
fn is_unreachable(e: &reqwest::Error) -> bool {
    if e.is_connect() || e.is_body() {
        return true;
    }
    let mut source = std::error::Error::source(e);
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::ConnectionReset
            ) {
                return true;
            }
        }
        source = inner.source();
    }
    false
}

impl ContentExtractor for TikaClient {
    fn metadata(&self, path: &Path, len: u64) -> Result<String, ExtractError> {
        self.put_file("meta", "application/json", path, len)
    }

    fn text(&self, path: &Path, len: u64) -> Result<String, ExtractError> {
        self.put_file("tika", "text/plain", path, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traits_are_object_safe() {
        fn _accepts(_: &dyn ContentExtractor) {}
    }

    #[test]
    fn missing_file_reported_before_any_request() {
        let client = TikaClient::new("http://127.0.0.1:9/", 1).unwrap();
        let err = client
            .metadata(Path::new("/nonexistent/archindex/file.pdf"), 10)
            .unwrap_err();
        assert!(matches!(err, ExtractError::FileNotFound(_)));
    }

    #[test]
    fn unreachable_service_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();
        let client = TikaClient::new("http://127.0.0.1:9", 2).unwrap();
        for _ in 0..20 {
            let err = client.text(&path, 5).unwrap_err();
            assert!(matches!(err, ExtractError::Connection(_)), "got {err:?}");
            let err = client.metadata(&path, 5).unwrap_err();
            assert!(matches!(err, ExtractError::Connection(_)), "got {err:?}");
        }
    }
}
