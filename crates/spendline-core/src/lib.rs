//! Spendline Core - transport and storage infrastructure for award retrieval
//!
//! Rate-limited HTTP access, resilient downloads of generated exports,
//! string tables with minimal dedup, and Parquet/CSV sinks.

pub mod download;
pub mod error;
pub mod http;
pub mod logging;
pub mod progress;
pub mod rate_limit;
pub mod retry;
pub mod shutdown;
pub mod sink;
pub mod table;

// Re-exports for convenience
pub use download::{DownloadSettings, Downloader, is_retryable_fetch_status, is_servable, part_path};
pub use error::{DownloadError, HttpError};
pub use http::{ApiClient, ApiSettings, DEFAULT_USER_AGENT, SHARED_RUNTIME};
pub use logging::{IndicatifLogger, init_logging};
pub use progress::{ProgressContext, SharedProgress, Stage, StageLine, fmt_num};
pub use rate_limit::RateLimiter;
pub use retry::Backoff;
pub use shutdown::{CancelToken, Cancelled};
pub use sink::{DEFAULT_ZSTD_LEVEL, ParquetSink, is_valid_parquet, write_csv, write_parquet};
pub use table::{DEFAULT_BATCH_SIZE, DEFAULT_DEDUP_KEYS, StringTable};
