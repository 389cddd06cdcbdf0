//! HTTP client with built-in retry logic and error handling.

use anyhow::{Context, Result};
use log::{debug, warn};
use reqwest::Client;
use std::io::Write;

use super::retry::{NonRetryableError, RetryPolicy, check_retryable};

/// Result of a completed download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Downloaded {
    pub bytes: u64,
    /// Number of attempts it took, including the successful one.
    pub attempts: usize,
}

/// HTTP client with built-in retry logic for network operations.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    policy: RetryPolicy,
}

impl HttpClient {
    /// Creates a new HTTP client wrapping the given reqwest Client.
    ///
    /// Timeouts and proxy settings live on the reqwest Client itself.
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Downloads a file from a URL through a writer created per attempt.
    ///
    /// `create_writer` is called at the start of every attempt, so each retry
    /// starts from an empty file. Timeouts and 5xx responses are retried with
    /// linear backoff; 4xx responses fail immediately.
    #[tracing::instrument(skip(self, create_writer))]
    pub async fn download_file<W, F>(&self, url: &str, create_writer: F) -> Result<Downloaded>
    where
        W: Write,
        F: Fn() -> Result<W>,
    {
        debug!("Downloading file from {}...", url);

        let max_attempts = self.policy.max_attempts;
        let mut attempt = 1;
        loop {
            match self.download_file_once(url, &create_writer).await {
                Ok(bytes) => return Ok(Downloaded { bytes, attempts: attempt }),
                Err(e) => {
                    if e.downcast_ref::<NonRetryableError>().is_some() {
                        return Err(e.context(format!("GET {}", url)));
                    }

                    if attempt >= max_attempts {
                        return Err(e.context(format!(
                            "GET {} failed after {} attempt(s)",
                            url, attempt
                        )));
                    }

                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        "Download attempt {}/{} for {} failed ({:#}), retrying in {}ms...",
                        attempt,
                        max_attempts,
                        url,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Single download attempt without retry.
    async fn download_file_once<W, F>(&self, url: &str, create_writer: &F) -> Result<u64>
    where
        W: Write,
        F: Fn() -> Result<W>,
    {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to start download request")?;

        let mut response = response.error_for_status().map_err(check_retryable)?;

        let mut writer = create_writer()?;
        let mut downloaded_bytes: u64 = 0;

        while let Some(chunk) = response
            .chunk()
            .await
            .context("Failed to read chunk from download stream")?
        {
            writer
                .write_all(&chunk)
                .context("Failed to write chunk to file")?;
            downloaded_bytes += chunk.len() as u64;
        }
        writer.flush().context("Failed to flush downloaded file")?;

        debug!(
            "Downloaded {:.2} MB",
            downloaded_bytes as f64 / (1024.0 * 1024.0)
        );

        Ok(downloaded_bytes)
    }
}
