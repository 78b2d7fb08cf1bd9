//! Resilient downloader for generated export files.
//!
//! Two phases: a `Range: bytes=0-0` availability probe that waits (bounded)
//! for the export to materialise, then a streamed GET that retries on the
//! statuses a file host returns while a freshly generated object propagates.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, RANGE};

use crate::error::{DownloadError, HttpError};
use crate::http::{DEFAULT_USER_AGENT, SHARED_RUNTIME};
use crate::progress::{Stage, upgrade_to_bar};
use crate::rate_limit::RateLimiter;
use crate::retry::Backoff;
use crate::shutdown::CancelToken;

/// Write buffer for the destination file (1MB)
const WRITE_BUF_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub user_agent: String,
    pub connect_timeout: Duration,
    /// Max time without receiving a body chunk before the fetch is retried
    pub read_timeout: Duration,
    /// Wall-clock budget for the availability probe
    pub probe_budget: Duration,
    pub probe_initial: Duration,
    pub probe_multiplier: f64,
    pub probe_cap: Duration,
    pub fetch_initial: Duration,
    pub fetch_multiplier: f64,
    pub fetch_cap: Duration,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            probe_budget: Duration::from_secs(45 * 60),
            probe_initial: Duration::from_secs(2),
            probe_multiplier: 1.5,
            probe_cap: Duration::from_secs(30),
            fetch_initial: Duration::from_secs(2),
            fetch_multiplier: 1.5,
            fetch_cap: Duration::from_secs(45),
        }
    }
}

/// Statuses that mean the probed object can be served
pub fn is_servable(status: StatusCode) -> bool {
    matches!(status.as_u16(), 200 | 206 | 301 | 302 | 303 | 307 | 308)
}

/// Statuses a streamed fetch retries on
pub fn is_retryable_fetch_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 403 | 404 | 429) || status.is_server_error()
}

/// Outcome of a single fetch attempt
enum FetchFailure {
    Retry(String),
    Fatal(DownloadError),
}

impl From<std::io::Error> for FetchFailure {
    fn from(e: std::io::Error) -> Self {
        Self::Fatal(DownloadError::Io(e))
    }
}

pub struct Downloader {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    cancel: CancelToken,
    settings: DownloadSettings,
}

impl Downloader {
    pub fn new(
        settings: DownloadSettings,
        limiter: Arc<RateLimiter>,
        cancel: CancelToken,
    ) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|e| DownloadError::Http(HttpError::from_reqwest(&e)))?;
        Ok(Self {
            client,
            limiter,
            cancel,
            settings,
        })
    }

    /// Wait for `url` to become servable, then stream it to `dest`.
    ///
    /// Returns the number of bytes written. `dest` only appears once the
    /// body is complete; the stream is written to `<dest>.part` first.
    pub fn download(&self, url: &str, dest: &Path, pb: &ProgressBar) -> Result<u64, DownloadError> {
        pb.set_message(Stage::WaitingForFile.to_string());
        let probes = self.wait_until_available(url)?;
        log::debug!("{url} servable after {probes} probe(s)");
        pb.set_message(Stage::Downloading.to_string());
        self.fetch(url, dest, pb)
    }

    /// Probe until the server answers with a servable status.
    ///
    /// Returns the number of probes issued.
    pub fn wait_until_available(&self, url: &str) -> Result<u32, DownloadError> {
        let start = Instant::now();
        let mut backoff = Backoff::new(
            self.settings.probe_initial,
            self.settings.probe_multiplier,
            self.settings.probe_cap,
        );
        let mut probes = 0u32;

        loop {
            self.cancel.check()?;
            probes += 1;
            match self.probe(url) {
                Ok(status) if is_servable(status) => return Ok(probes),
                Ok(status) => log::debug!("probe {probes} {url} -> {}", status.as_u16()),
                Err(e) => log::debug!("probe {probes} {url}: {e}"),
            }

            let elapsed = start.elapsed();
            if elapsed >= self.settings.probe_budget {
                log::warn!("{url} still unavailable after {probes} probes ({}s)", elapsed.as_secs());
                return Err(DownloadError::Unavailable {
                    url: url.to_string(),
                    waited: elapsed,
                });
            }
            let delay = backoff
                .next_delay()
                .min(self.settings.probe_budget - elapsed);
            if probes % 10 == 0 {
                log::info!(
                    "waiting for {url} ({probes} probes, {}s elapsed)",
                    elapsed.as_secs()
                );
            }
            self.cancel.sleep(delay)?;
        }
    }

    fn probe(&self, url: &str) -> Result<StatusCode, HttpError> {
        self.limiter.wait();
        let status = SHARED_RUNTIME.handle().block_on(async {
            let resp = self
                .client
                .get(url)
                .header(RANGE, "bytes=0-0")
                .timeout(self.settings.read_timeout)
                .send()
                .await
                .map_err(|e| HttpError::from_reqwest(&e))?;
            Ok::<_, HttpError>(resp.status())
        })?;
        log::debug!("HTTP GET {url} (range 0-0) -> {}", status.as_u16());
        Ok(status)
    }

    /// Streamed GET with retry on retryable statuses and transport errors.
    /// Only 200 is saved; any other status that is not retryable is fatal.
    /// Unbounded in attempts; only cancellation or a fatal status ends it early.
    fn fetch(&self, url: &str, dest: &Path, pb: &ProgressBar) -> Result<u64, DownloadError> {
        let part = part_path(dest);
        let mut backoff = Backoff::new(
            self.settings.fetch_initial,
            self.settings.fetch_multiplier,
            self.settings.fetch_cap,
        );
        let mut attempt = 0u32;

        loop {
            self.cancel.check()?;
            attempt += 1;
            match self.fetch_once(url, &part, pb) {
                Ok(bytes) => {
                    std::fs::rename(&part, dest)?;
                    log::info!("downloaded {} ({bytes} bytes)", dest.display());
                    return Ok(bytes);
                }
                Err(FetchFailure::Fatal(e)) => {
                    let _ = std::fs::remove_file(&part);
                    return Err(e);
                }
                Err(FetchFailure::Retry(reason)) => {
                    let delay = backoff.next_delay();
                    log::warn!("GET {url}: {reason}; retry {attempt} in {delay:?}");
                    pb.set_message(format!("retry {attempt}: {reason}"));
                    self.cancel.sleep(delay)?;
                }
            }
        }
    }

    fn fetch_once(&self, url: &str, part: &Path, pb: &ProgressBar) -> Result<u64, FetchFailure> {
        self.limiter.wait();
        let handle = SHARED_RUNTIME.handle();

        let mut resp = handle
            .block_on(async { self.client.get(url).send().await })
            .map_err(|e| FetchFailure::Retry(e.to_string()))?;
        let status = resp.status();
        log::debug!("HTTP GET {url} -> {}", status.as_u16());

        if status != StatusCode::OK {
            if is_retryable_fetch_status(status) {
                return Err(FetchFailure::Retry(format!("HTTP {}", status.as_u16())));
            }
            let body = handle
                .block_on(async { resp.text().await })
                .unwrap_or_default();
            return Err(FetchFailure::Fatal(DownloadError::Http(HttpError::status(
                status.as_u16(),
                &body,
            ))));
        }

        let total = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        pb.reset();
        if let Some(total) = total {
            upgrade_to_bar(pb, total);
        }

        let mut out = BufWriter::with_capacity(WRITE_BUF_SIZE, File::create(part)?);
        let mut written = 0u64;
        loop {
            if self.cancel.is_cancelled() {
                return Err(FetchFailure::Fatal(DownloadError::Cancelled));
            }
            let chunk = handle
                .block_on(async {
                    tokio::time::timeout(self.settings.read_timeout, resp.chunk()).await
                })
                .map_err(|_| {
                    FetchFailure::Retry(format!(
                        "stalled: no data for {}s",
                        self.settings.read_timeout.as_secs()
                    ))
                })?
                .map_err(|e| FetchFailure::Retry(e.to_string()))?;
            let Some(chunk) = chunk else { break };
            out.write_all(&chunk)?;
            written += chunk.len() as u64;
            pb.set_position(written);
        }
        out.flush()?;

        if let Some(total) = total {
            if written < total {
                return Err(FetchFailure::Retry(format!(
                    "truncated body: {written} of {total} bytes"
                )));
            }
        }
        Ok(written)
    }
}

/// Temporary path a download streams into before the final rename
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
