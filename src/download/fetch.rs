//! Single-file fetcher for page binaries.
//!
//! Deliberately narrower than a general-purpose download client: the archive
//! serves public files with stable URLs, so there is no resume, no cookie
//! jar, and no auth-redirect detection here — just stream-to-file with a
//! Content-Length check. Retrying a failed fetch is the caller's job (see
//! [`super::engine`]); this type makes exactly one attempt per call.

use std::path::Path;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::CONTENT_LENGTH;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{instrument, warn};

use super::error::DownloadError;

/// Chunk size used when buffering the response body to disk.
const STREAM_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The file did not exist on disk before this call; `bytes` were written.
    Downloaded { bytes: u64 },
    /// The destination already existed; nothing was fetched.
    Skipped { bytes: u64 },
}

pub struct FileFetcher {
    http: Client,
}

impl FileFetcher {
    #[must_use]
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    /// Fetches `url` into `dest`, which must not yet exist (callers check
    /// via [`Self::skip_if_present`] first so the skip path never touches
    /// the network).
    #[instrument(skip(self), fields(url))]
    pub async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| classify_transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Err(DownloadError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ));
        }

        let expected_len = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let file = File::create(dest)
            .await
            .map_err(|e| DownloadError::io(dest, e))?;
        let bytes_written = stream_to_file(file, response, url, dest).await?;

        if let Some(expected) = expected_len {
            if expected != bytes_written {
                let _ = tokio::fs::remove_file(dest).await;
                return Err(DownloadError::integrity(dest, expected, bytes_written));
            }
        }

        Ok(bytes_written)
    }

    /// Returns the on-disk size if `dest` already exists, without touching
    /// the network. The spec treats an existing destination file as an
    /// already-completed download.
    pub async fn skip_if_present(dest: &Path) -> Option<u64> {
        tokio::fs::metadata(dest).await.ok().map(|m| m.len())
    }
}

async fn stream_to_file(
    file: File,
    response: reqwest::Response,
    url: &str,
    dest: &Path,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::with_capacity(STREAM_CHUNK_BYTES, file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| classify_transport_error(url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(dest.to_path_buf(), e))?;
        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(dest.to_path_buf(), e))?;

    Ok(bytes_written)
}

fn classify_transport_error(url: &str, source: reqwest::Error) -> DownloadError {
    if source.is_timeout() {
        DownloadError::timeout(url)
    } else {
        warn!(url, %source, "transport error fetching file");
        DownloadError::network(url, source)
    }
}
