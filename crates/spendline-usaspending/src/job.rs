//! Bulk job lifecycle: submission handle, status normalization, the polling
//! state machine, and the job error taxonomy.

use std::fmt;
use std::path::PathBuf;

use serde_json::Value;
use spendline_core::{Cancelled, DownloadError, HttpError};

/// Max characters of a status message echoed into logs
const MESSAGE_LOG_LEN: usize = 300;

/// Consecutive exception-bearing polls that mark a job as stuck
pub const DEFAULT_EXCEPTION_THRESHOLD: u32 = 3;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug)]
pub enum JobError {
    /// API request failed (status error or exhausted transport retries)
    Api(HttpError),
    /// Submission response carried no job identifier
    MissingJobId { response: String },
    /// Job finished but neither status nor submission named a file URL
    MissingFileUrl { file_name: String, status: String },
    /// Server reported a terminal failure status
    BackendFailed { file_name: String, status: String },
    /// Status message kept reporting an exception while the job stayed pending
    StuckOnException {
        file_name: String,
        polls: u32,
        message: String,
    },
    Download(DownloadError),
    Archive { path: PathBuf, message: String },
    Io(std::io::Error),
    Cancelled,
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Api(e) => write!(f, "API request failed: {e}"),
            Self::MissingJobId { response } => {
                write!(f, "bulk start failed, no file_name in response: {response}")
            }
            Self::MissingFileUrl { file_name, status } => {
                write!(f, "no file_url on finished job {file_name}: {status}")
            }
            Self::BackendFailed { file_name, status } => {
                write!(f, "bulk job {file_name} failed: {status}")
            }
            Self::StuckOnException {
                file_name,
                polls,
                message,
            } => write!(
                f,
                "backend exception while generating {file_name} ({polls} consecutive polls): {message}"
            ),
            Self::Download(e) => write!(f, "download failed: {e}"),
            Self::Archive { path, message } => {
                write!(f, "cannot extract {}: {message}", path.display())
            }
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Cancelled => f.write_str("job cancelled"),
        }
    }
}

impl std::error::Error for JobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Api(e) => Some(e),
            Self::Download(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl JobError {
    /// Failures caused by the backend choking on the export itself. These are
    /// the only ones a smaller date range can fix.
    pub fn is_generation_failure(&self) -> bool {
        matches!(
            self,
            Self::BackendFailed { .. }
                | Self::StuckOnException { .. }
                | Self::Download(DownloadError::Unavailable { .. })
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<HttpError> for JobError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Cancelled => Self::Cancelled,
            other => Self::Api(other),
        }
    }
}

impl From<DownloadError> for JobError {
    fn from(e: DownloadError) -> Self {
        match e {
            DownloadError::Cancelled => Self::Cancelled,
            other => Self::Download(other),
        }
    }
}

impl From<std::io::Error> for JobError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<Cancelled> for JobError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Pretty-printed JSON for error payloads
pub(crate) fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

// =============================================================================
// Submission handle
// =============================================================================

/// Server-side identity of a submitted job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkJobHandle {
    /// Opaque job identifier, also the poll key
    pub file_name: String,
    pub status_url: Option<String>,
    /// Download URL announced at submission (may be superseded by status)
    pub file_url: Option<String>,
}

impl BulkJobHandle {
    pub fn from_response(resp: &Value) -> Result<Self, JobError> {
        let file_name = non_empty_str(resp, "file_name").ok_or_else(|| JobError::MissingJobId {
            response: pretty(resp),
        })?;
        Ok(Self {
            file_name,
            status_url: non_empty_str(resp, "status_url"),
            file_url: non_empty_str(resp, "file_url"),
        })
    }
}

fn non_empty_str(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// =============================================================================
// Status
// =============================================================================

/// Normalized job status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Finished,
    Failed,
}

impl JobStatus {
    /// Case-insensitive mapping of the raw status string.
    /// Anything not recognized as terminal counts as pending.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "finished" | "ready" | "success" => Self::Finished,
            "failed" | "error" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// One status poll, decoded at the boundary
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub status: JobStatus,
    /// Lowercased raw status string ("" if absent)
    pub raw_status: String,
    pub message: Option<String>,
    pub file_url: Option<String>,
    pub payload: Value,
}

impl StatusReport {
    pub fn from_json(payload: Value) -> Self {
        let raw_status = payload
            .get("status")
            .map(|v| match v {
                Value::String(s) => s.trim().to_ascii_lowercase(),
                Value::Null => String::new(),
                other => other.to_string().to_ascii_lowercase(),
            })
            .unwrap_or_default();
        Self {
            status: JobStatus::normalize(&raw_status),
            message: non_empty_str(&payload, "message"),
            file_url: non_empty_str(&payload, "file_url"),
            raw_status,
            payload,
        }
    }

    /// Backend quirk: a pending job whose message embeds an exception
    pub fn mentions_exception(&self) -> bool {
        self.message
            .as_deref()
            .is_some_and(|m| m.to_ascii_lowercase().contains("exception"))
    }

    /// First line of the message, truncated for logging
    pub fn short_message(&self) -> Option<String> {
        let line = self.message.as_deref()?.trim().lines().next()?;
        Some(line.chars().take(MESSAGE_LOG_LEN).collect())
    }

    pub fn display_status(&self) -> &str {
        if self.raw_status.is_empty() {
            "unknown"
        } else {
            &self.raw_status
        }
    }
}

// =============================================================================
// Polling state machine
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    Continue,
    Finished,
    Failed,
    StuckOnException,
}

/// Decides the outcome of each poll. Terminal statuses win over the exception
/// heuristic; a poll without an exception mention resets the streak.
/// A threshold of 0 disables the heuristic.
#[derive(Debug, Clone)]
pub struct JobPoller {
    threshold: u32,
    consecutive_exceptions: u32,
    polls: u32,
}

impl JobPoller {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            consecutive_exceptions: 0,
            polls: 0,
        }
    }

    pub fn observe(&mut self, report: &StatusReport) -> PollDecision {
        self.polls += 1;
        match report.status {
            JobStatus::Finished => return PollDecision::Finished,
            JobStatus::Failed => return PollDecision::Failed,
            JobStatus::Pending => {}
        }
        if report.mentions_exception() {
            self.consecutive_exceptions += 1;
            if self.threshold > 0 && self.consecutive_exceptions >= self.threshold {
                return PollDecision::StuckOnException;
            }
        } else {
            self.consecutive_exceptions = 0;
        }
        PollDecision::Continue
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn consecutive_exceptions(&self) -> u32 {
        self.consecutive_exceptions
    }
}

impl Default for JobPoller {
    fn default() -> Self {
        Self::new(DEFAULT_EXCEPTION_THRESHOLD)
    }
}
