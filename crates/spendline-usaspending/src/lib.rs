//! Spendline USAspending - federal award retrieval pipeline
//!
//! Drives the USAspending bulk-export API (submit, poll, download, extract,
//! convert) with automatic date-range splitting on backend failures, and
//! drains the paginated award search for smaller incremental windows.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use spendline_core::{CancelToken, ProgressContext};
//! use spendline_usaspending::{BackfillConfig, DateRange, Pipeline, PipelineSettings};
//!
//! let range = DateRange::parse("2024-09-01", "2024-09-30").unwrap();
//! let pipeline = Pipeline::new(
//!     PipelineSettings::default(),
//!     CancelToken::new(),
//!     Arc::new(ProgressContext::new()),
//! )
//! .unwrap();
//! let code = pipeline.backfill(&BackfillConfig::new(range)).unwrap();
//! ```

pub mod agency;
pub mod api;
pub mod archive;
pub mod award_group;
pub mod backfill;
pub mod bulk;
pub mod config;
pub mod date_range;
pub mod incremental;
pub mod job;
pub mod request;
pub mod run_log;
pub mod runner;
pub mod stats;

// Re-exports for convenience
pub use agency::{AgencyFilter, AgencyParseError, AgencyRole, AgencyTier};
pub use api::{DEFAULT_API_ROOT, DEFAULT_MAX_RPS, UsaClient};
pub use award_group::{AwardGroup, UnknownGroup, parse_groups};
pub use backfill::{BackfillOutcome, backfill_range, run_backfill};
pub use bulk::{BulkJobRunner, JobOutcome, JobSettings};
pub use config::{
    BackfillConfig, DEFAULT_CHUNK_DAYS, DEFAULT_MIN_SPLIT_DAYS, DEFAULT_OUTPUT_DIR,
    IncrementalConfig, OutputFormat,
};
pub use date_range::{DateRange, DateRangeError, Window};
pub use incremental::{IncrementalOutcome, Shard, drain_shard, run_incremental, shard_iter};
pub use job::{JobError, JobStatus};
pub use request::{BulkJobRequest, BulkPayload, DateType, FileFormat, SearchPayload, SearchRequest};
pub use run_log::{RunLog, RunStatus};
pub use runner::{Pipeline, PipelineSettings};
