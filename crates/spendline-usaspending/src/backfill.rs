//! Auto-splitting backfill driver.
//!
//! Large exports fail on the backend unpredictably, as a function of row
//! volume. A generation failure on a range longer than `min_split_days`
//! bisects it and retries each half with the same rule; halves run
//! sequentially so the shared rate budget is never contended.

use spendline_core::CancelToken;

use crate::award_group::AwardGroup;
use crate::bulk::{BulkJobRunner, JobOutcome};
use crate::config::BackfillConfig;
use crate::date_range::DateRange;
use crate::job::JobError;
use crate::request::BulkJobRequest;

/// Max characters of a failure echoed in the split warning
const SPLIT_LOG_LEN: usize = 2000;

#[derive(Debug, Clone)]
pub struct CompletedJob {
    pub group: AwardGroup,
    pub range: DateRange,
    pub outcome: JobOutcome,
}

/// A minimal window that still failed to generate
#[derive(Debug, Clone)]
pub struct FailedRange {
    pub group: AwardGroup,
    pub range: DateRange,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct BackfillOutcome {
    pub completed: Vec<CompletedJob>,
    pub failed: Vec<FailedRange>,
    /// Number of bisections performed
    pub splits: usize,
}

impl BackfillOutcome {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Attempt `request`, bisecting on generation failures while the range is
/// longer than `min_split_days`. Failures at the minimal window are recorded
/// in `outcome` and do not stop sibling ranges. Any other error aborts.
///
/// The caller sees minimal-window failures through `outcome.failed` (the
/// pipeline turns a non-empty list into a PARTIAL run and exit code 1).
pub fn backfill_range<F>(
    request: &BulkJobRequest,
    min_split_days: u32,
    cancel: &CancelToken,
    attempt: &mut F,
    outcome: &mut BackfillOutcome,
) -> Result<(), JobError>
where
    F: FnMut(&BulkJobRequest) -> Result<JobOutcome, JobError>,
{
    cancel.check()?;
    let err = match attempt(request) {
        Ok(job) => {
            outcome.completed.push(CompletedJob {
                group: request.group,
                range: request.range,
                outcome: job,
            });
            return Ok(());
        }
        Err(e) if e.is_generation_failure() => e,
        Err(e) => return Err(e),
    };

    let days = request.range.days();
    let halves = if days > u64::from(min_split_days) {
        request.range.split()
    } else {
        None
    };
    match halves {
        Some((first, second)) => {
            let msg: String = err.to_string().chars().take(SPLIT_LOG_LEN).collect();
            log::warn!(
                "Backend error on {} {} ({days} days). Splitting into {first} and {second}: {msg}",
                request.group,
                request.range
            );
            outcome.splits += 1;
            backfill_range(&request.with_range(first), min_split_days, cancel, attempt, outcome)?;
            backfill_range(&request.with_range(second), min_split_days, cancel, attempt, outcome)
        }
        None => {
            log::error!(
                "{} {} failed at minimum window ({days} days): {err}",
                request.group,
                request.range
            );
            outcome.failed.push(FailedRange {
                group: request.group,
                range: request.range,
                error: err.to_string(),
            });
            Ok(())
        }
    }
}

/// Backfill every configured group in order, accumulating into `outcome`
/// so partial results survive an aborting error.
pub fn run_backfill(
    config: &BackfillConfig,
    runner: &BulkJobRunner<'_>,
    cancel: &CancelToken,
    outcome: &mut BackfillOutcome,
) -> Result<(), JobError> {
    let mut attempt = |req: &BulkJobRequest| runner.run(req, &config.output_dir);
    for &group in &config.groups {
        log::info!("Backfill {group}: {} ({} days)", config.range, config.range.days());
        let request = config.request_for(group);
        backfill_range(&request, config.min_split_days, cancel, &mut attempt, outcome)?;
    }
    Ok(())
}
