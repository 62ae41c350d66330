//! Download transport: the collaborator that moves bytes.
//!
//! The retriever only needs "fetch these URLs into this directory"; the
//! trait keeps the retry state machine testable with a mock and lets the
//! HTTP details live here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::TransportError;

/// Transfers remote resources to local files.
#[async_trait]
pub trait DownloadTransport: Send + Sync {
    /// Download each URL into `destination`, keeping the remote filename.
    ///
    /// `threads` is a parallelism hint. Implementations may skip URLs whose
    /// destination file already exists; callers must re-validate even
    /// "skipped" files, since existence does not imply validity.
    async fn fetch(
        &self,
        urls: &[String],
        destination: &Path,
        threads: usize,
    ) -> Result<(), TransportError>;
}

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Whole-request timeout per file.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Earthdata bearer token, sent as `Authorization: Bearer <token>`.
    pub bearer_token: Option<String>,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(30),
            bearer_token: None,
        }
    }
}

/// Streaming HTTPS downloader for archive granule files.
///
/// Each file streams to a `.partial` sibling, is verified against
/// Content-Length when the server provides one, and is renamed into place
/// only when complete, so a crashed transfer never leaves a plausible-looking
/// destination file behind.
pub struct HttpTransport {
    client: Client,
    bearer_token: Option<String>,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(4)
            .tcp_nodelay(true)
            .build()?;

        Ok(Self {
            client,
            bearer_token: config.bearer_token,
        })
    }

    async fn fetch_one(&self, url: &str, destination: &Path) -> Result<(), TransportError> {
        let filename =
            remote_filename(url).ok_or_else(|| TransportError::BadUrl(url.to_string()))?;
        let final_path = destination.join(&filename);

        if final_path.exists() {
            debug!(path = %final_path.display(), "destination already exists, skipping download");
            return Ok(());
        }

        let temp_path = destination.join(format!("{}.partial", filename));

        let mut request = self.client.get(url);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status,
            });
        }

        let expected = response.content_length();

        let io_err = |path: &PathBuf| {
            let path = path.clone();
            move |source| TransportError::Io { path, source }
        };

        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(io_err(&temp_path))?;

        let mut downloaded = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await.map_err(io_err(&temp_path))?;
            downloaded += chunk.len() as u64;
        }

        file.flush().await.map_err(io_err(&temp_path))?;
        file.sync_all().await.map_err(io_err(&temp_path))?;
        drop(file);

        if let Some(expected) = expected {
            if downloaded != expected {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(TransportError::SizeMismatch {
                    path: final_path,
                    expected,
                    actual: downloaded,
                });
            }
        }

        // Move into place (copy+delete fallback for cross-filesystem setups).
        if tokio::fs::rename(&temp_path, &final_path).await.is_err() {
            tokio::fs::copy(&temp_path, &final_path)
                .await
                .map_err(io_err(&final_path))?;
            tokio::fs::remove_file(&temp_path)
                .await
                .map_err(io_err(&temp_path))?;
        }

        info!(
            url = %url,
            path = %final_path.display(),
            bytes = downloaded,
            "download complete"
        );

        Ok(())
    }
}

#[async_trait]
impl DownloadTransport for HttpTransport {
    async fn fetch(
        &self,
        urls: &[String],
        destination: &Path,
        threads: usize,
    ) -> Result<(), TransportError> {
        let results: Vec<Result<(), TransportError>> = stream::iter(urls)
            .map(|url| self.fetch_one(url, destination))
            .buffer_unordered(threads.max(1))
            .collect()
            .await;

        for result in results {
            result?;
        }

        Ok(())
    }
}

/// Extract the destination filename from a resource URL.
fn remote_filename(url: &str) -> Option<String> {
    let without_query = url.split('?').next().unwrap_or(url);
    without_query
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_filename_strips_path() {
        assert_eq!(
            remote_filename(
                "https://data.lpdaac.earthdatacloud.nasa.gov/x/EMIT_L2A_RFL_001_a_1_001.nc"
            ),
            Some("EMIT_L2A_RFL_001_a_1_001.nc".to_string())
        );
    }

    #[test]
    fn test_remote_filename_strips_query() {
        assert_eq!(
            remote_filename("https://example.com/granule.nc?A-userid=x"),
            Some("granule.nc".to_string())
        );
    }

    #[test]
    fn test_remote_filename_rejects_directories() {
        assert_eq!(remote_filename("https://example.com/path/"), None);
    }
}
