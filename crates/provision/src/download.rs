//! Resumable single-stream HTTP download into a pending file.
//!
//! One call to [`Downloader::fetch`] is one attempt. If the pending file
//! already holds bytes from an earlier attempt in this run, the request
//! carries `Range: bytes=<len>-` and the response is appended; a source
//! that ignores the range (`200 OK`) causes the file to be truncated and
//! refetched. Bytes received before a failure are flushed to disk so the
//! next attempt resumes from them.

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;

use crate::error::ProvisionError;

/// Log progress every this many percent when the length is known.
const PROGRESS_STEP_PERCENT: u64 = 5;
/// Log progress every this many bytes when the length is unknown.
const PROGRESS_STEP_BYTES: u64 = 512 * 1024 * 1024;

/// What one attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferStats {
    /// Offset the attempt started from (0 for a fresh transfer).
    pub resumed_from: u64,
    /// Bytes written by this attempt.
    pub bytes_written: u64,
    /// Total length announced by the source, if any.
    pub total_len: Option<u64>,
}

/// HTTP downloader shared by every artifact of a run.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    stall_timeout: Duration,
    auth_token: Option<String>,
}

impl Downloader {
    pub fn new(
        connect_timeout: Duration,
        stall_timeout: Duration,
        auth_token: Option<String>,
    ) -> Result<Self, ProvisionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("headswap-provision/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProvisionError::Transfer(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            stall_timeout,
            auth_token,
        })
    }

    /// Stream `url` into `pending`, resuming from its current length.
    pub async fn fetch(&self, url: &str, pending: &Path) -> Result<TransferStats, ProvisionError> {
        let existing = file_len(pending).await?;

        let mut request = self.client.get(url);
        if existing > 0 {
            request = request.header(RANGE, format!("bytes={existing}-"));
        }
        if let Some(token) = &self.auth_token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = tokio::time::timeout(self.stall_timeout, request.send())
            .await
            .map_err(|_| {
                ProvisionError::Transfer(format!(
                    "{url} sent no response headers within {}s",
                    self.stall_timeout.as_secs_f64()
                ))
            })?
            .map_err(|e| ProvisionError::Transfer(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        let offset = match status {
            StatusCode::PARTIAL_CONTENT => {
                let start = content_range_start(response.headers().get(CONTENT_RANGE));
                if start != Some(existing) {
                    // Discard rather than splice bytes at the wrong offset.
                    truncate(pending).await?;
                    return Err(ProvisionError::Transfer(format!(
                        "source resumed at {start:?}, expected byte {existing}"
                    )));
                }
                tracing::info!(url, resume_from = existing, "Resuming download");
                existing
            }
            StatusCode::OK => {
                if existing > 0 {
                    tracing::warn!(url, discarded = existing, "Source ignored range request, restarting from zero");
                }
                0
            }
            StatusCode::RANGE_NOT_SATISFIABLE if existing > 0 => {
                tracing::info!(url, bytes = existing, "Pending file already complete");
                return Ok(TransferStats {
                    resumed_from: existing,
                    bytes_written: 0,
                    total_len: Some(existing),
                });
            }
            other => {
                return Err(ProvisionError::Transfer(format!(
                    "{url} returned HTTP {}",
                    other.as_u16()
                )));
            }
        };

        let total_len = response.content_length().map(|len| len + offset);

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(offset > 0)
            .truncate(offset == 0)
            .open(pending)
            .await
            .map_err(|e| io_err(pending, e))?;

        let mut progress = Progress::new(url, offset, total_len);
        let mut stream = response.bytes_stream();
        let copied: Result<(), ProvisionError> = async {
            loop {
                let next = tokio::time::timeout(self.stall_timeout, stream.next())
                    .await
                    .map_err(|_| {
                        ProvisionError::Transfer(format!(
                            "no data received for {}s",
                            self.stall_timeout.as_secs()
                        ))
                    })?;
                match next {
                    None => break,
                    Some(Err(e)) => {
                        return Err(ProvisionError::Transfer(format!("stream interrupted: {e}")));
                    }
                    Some(Ok(chunk)) => {
                        file.write_all(&chunk).await.map_err(|e| io_err(pending, e))?;
                        progress.advance(chunk.len() as u64);
                    }
                }
            }
            Ok(())
        }
        .await;

        // Persist whatever arrived so a retry can resume from it.
        file.flush().await.map_err(|e| io_err(pending, e))?;
        file.sync_all().await.map_err(|e| io_err(pending, e))?;
        copied?;

        let bytes_written = progress.written;
        if let Some(total) = total_len {
            let on_disk = offset + bytes_written;
            if on_disk < total {
                return Err(ProvisionError::Transfer(format!(
                    "connection closed after {on_disk} of {total} bytes"
                )));
            }
        }

        tracing::info!(url, bytes_written, resumed_from = offset, "Transfer finished");
        Ok(TransferStats {
            resumed_from: offset,
            bytes_written,
            total_len,
        })
    }
}

/// Length of `path`, or 0 if it does not exist.
pub async fn file_len(path: &Path) -> Result<u64, ProvisionError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(io_err(path, e)),
    }
}

async fn truncate(path: &Path) -> Result<(), ProvisionError> {
    tokio::fs::File::create(path)
        .await
        .map(|_| ())
        .map_err(|e| io_err(path, e))
}

fn io_err(path: &Path, e: std::io::Error) -> ProvisionError {
    ProvisionError::Core(headswap_core::error::CoreError::io(path, e))
}

/// Parse the first byte offset of a `Content-Range: bytes <start>-<end>/<total>` header.
fn content_range_start(value: Option<&reqwest::header::HeaderValue>) -> Option<u64> {
    let raw = value?.to_str().ok()?;
    let range = raw.trim().strip_prefix("bytes")?.trim_start();
    let (start, _) = range.split_once('-')?;
    start.trim().parse().ok()
}

/// Periodic progress logging.
struct Progress<'a> {
    url: &'a str,
    offset: u64,
    total: Option<u64>,
    written: u64,
    next_mark: u64,
}

impl<'a> Progress<'a> {
    fn new(url: &'a str, offset: u64, total: Option<u64>) -> Self {
        let mut p = Self {
            url,
            offset,
            total,
            written: 0,
            next_mark: 0,
        };
        p.next_mark = p.step();
        p
    }

    fn step(&self) -> u64 {
        match self.total {
            Some(t) if t > 0 => (t * PROGRESS_STEP_PERCENT / 100).max(1),
            _ => PROGRESS_STEP_BYTES,
        }
    }

    fn advance(&mut self, n: u64) {
        self.written += n;
        let position = self.offset + self.written;
        if position < self.next_mark {
            return;
        }
        match self.total {
            Some(t) if t > 0 => {
                let percent = (position * 100 / t).min(100);
                tracing::info!(url = self.url, bytes = position, total = t, percent, "Download progress");
            }
            _ => tracing::info!(url = self.url, bytes = position, "Download progress"),
        }
        let step = self.step();
        self.next_mark = (position / step + 1) * step;
    }
}
