use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use reqwest::{StatusCode, Url, header};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

use crate::common::HttpClient;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("upstream returned status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("download of {url} timed out after {timeout:?}")]
    TimedOut { url: String, timeout: Duration },
    #[error("redirect chain exceeded {max} hops starting from {url}")]
    TooManyRedirects { url: String, max: usize },
    #[error("redirect to unparseable location '{0}'")]
    BadRedirect(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Non-error fetch outcomes. An upstream 404 is expected for assets whose
/// mirror has not finished processing server-side, so it is a value rather
/// than an error; callers fall back to streaming the original URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Complete,
    Missing,
}

/// Fetches one remote resource into one local file.
///
/// Redirects are walked with an explicit bounded loop against a client that
/// has automatic redirects disabled; every hop restarts the full fetch
/// against the new target. Every non-success path removes whatever was
/// written, so a file at the destination always means a complete download.
pub struct Downloader {
    client: reqwest::Client,
    max_redirects: usize,
}

impl Downloader {
    pub fn new(max_redirects: usize) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: HttpClient::media()?,
            max_redirects,
        })
    }

    pub async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        timeout: Duration,
    ) -> Result<FetchOutcome, DownloadError> {
        let result = match tokio::time::timeout(timeout, self.fetch_inner(url, dest)).await {
            Ok(res) => res,
            Err(_) => Err(DownloadError::TimedOut {
                url: url.to_string(),
                timeout,
            }),
        };

        // A partial file at the final path would later be mistaken for a
        // valid cached copy, so anything but a completed download removes it.
        if !matches!(result, Ok(FetchOutcome::Complete)) {
            let _ = tokio::fs::remove_file(dest).await;
        }

        result
    }

    async fn fetch_inner(&self, url: &str, dest: &Path) -> Result<FetchOutcome, DownloadError> {
        let mut target = url.to_string();

        for _hop in 0..=self.max_redirects {
            let response = self.client.get(&target).send().await?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| DownloadError::Status {
                        status: status.as_u16(),
                        url: target.clone(),
                    })?;

                let resolved = Url::parse(&target)
                    .and_then(|base| base.join(location))
                    .map_err(|_| DownloadError::BadRedirect(location.to_string()))?;

                trace!("Redirected {} -> {}", target, resolved);
                target = resolved.into();
                continue;
            }

            if status == StatusCode::NOT_FOUND {
                debug!("Upstream has no copy of {} yet", target);
                return Ok(FetchOutcome::Missing);
            }

            if !status.is_success() {
                return Err(DownloadError::Status {
                    status: status.as_u16(),
                    url: target,
                });
            }

            let mut file = tokio::fs::File::create(dest).await?;
            let mut stream = response.bytes_stream();
            let mut written: u64 = 0;

            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                written += chunk.len() as u64;
                file.write_all(&chunk).await?;
            }

            file.flush().await?;
            file.sync_all().await?;

            debug!("Downloaded {} bytes from {} to {}", written, target, dest.display());
            return Ok(FetchOutcome::Complete);
        }

        Err(DownloadError::TooManyRedirects {
            url: url.to_string(),
            max: self.max_redirects,
        })
    }
}
