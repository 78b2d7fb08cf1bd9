//! Error types for API requests and file downloads

use std::time::Duration;

use crate::shutdown::Cancelled;

/// Maximum number of response-body bytes kept in a status error
const BODY_SNIPPET_LEN: usize = 2000;

/// Error from a single API request (after transport retries).
#[derive(Debug)]
pub enum HttpError {
    /// Connection failure, timeout, or body read failure (no usable response)
    Transport { message: String },
    /// Server answered with a non-2xx status
    Status { status: u16, body: String },
    /// Response declared JSON but did not parse
    Decode { message: String },
    Io(std::io::Error),
    Cancelled,
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport { message } => write!(f, "HTTP transport error: {message}"),
            Self::Status { status, body } if body.is_empty() => write!(f, "HTTP {status}"),
            Self::Status { status, body } => write!(f, "HTTP {status}: {body}"),
            Self::Decode { message } => write!(f, "invalid JSON response: {message}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Cancelled => f.write_str("request cancelled"),
        }
    }
}

impl std::error::Error for HttpError {}

impl HttpError {
    /// Create transport error from a reqwest error (status-less failures)
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Self::Status {
                status: status.as_u16(),
                body: String::new(),
            },
            None => Self::Transport {
                message: e.to_string(),
            },
        }
    }

    /// Status error carrying a truncated copy of the server's response body
    pub fn status(status: u16, body: &str) -> Self {
        let body = match body.char_indices().nth(BODY_SNIPPET_LEN) {
            Some((idx, _)) => format!("{}...", &body[..idx]),
            None => body.to_string(),
        };
        Self::Status { status, body }
    }

    /// Only transport-level failures are retried automatically.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

impl From<std::io::Error> for HttpError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<Cancelled> for HttpError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Error from the resilient downloader.
#[derive(Debug)]
pub enum DownloadError {
    /// Availability probe never saw a servable status within its budget
    Unavailable { url: String, waited: Duration },
    /// Non-retryable HTTP status on the streamed fetch
    Http(HttpError),
    Io(std::io::Error),
    Cancelled,
}

impl std::fmt::Display for DownloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable { url, waited } => {
                write!(f, "file not available after {}s: {url}", waited.as_secs())
            }
            Self::Http(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "IO: {e}"),
            Self::Cancelled => f.write_str("download cancelled"),
        }
    }
}

impl std::error::Error for DownloadError {}

impl From<std::io::Error> for DownloadError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<Cancelled> for DownloadError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}
