//! Main execution logic for backfill and incremental runs

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use serde_json::{Value, json};
use spendline_core::{
    ApiSettings, CancelToken, DownloadSettings, Downloader, RateLimiter, SharedProgress,
};

use crate::api::{DEFAULT_API_ROOT, DEFAULT_MAX_RPS, UsaClient};
use crate::backfill::{BackfillOutcome, run_backfill};
use crate::bulk::BulkJobRunner;
use crate::config::{BackfillConfig, IncrementalConfig};
use crate::incremental::{IncrementalOutcome, run_incremental};
use crate::job::JobError;
use crate::run_log::{RunLog, RunStatus};
use crate::stats::{BackfillSummary, IncrementalSummary};

/// Transport-level knobs shared by every run
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub api_root: String,
    pub max_rps: f64,
    pub api: ApiSettings,
    pub download: DownloadSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            api_root: DEFAULT_API_ROOT.to_string(),
            max_rps: DEFAULT_MAX_RPS,
            api: ApiSettings::default(),
            download: DownloadSettings::default(),
        }
    }
}

/// One rate budget, one API client and one downloader for the whole run
pub struct Pipeline {
    api: UsaClient,
    downloader: Downloader,
    cancel: CancelToken,
    progress: SharedProgress,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        cancel: CancelToken,
        progress: SharedProgress,
    ) -> anyhow::Result<Self> {
        let limiter = Arc::new(RateLimiter::new(settings.max_rps));
        log::debug!(
            "Rate limit: {} rps (min interval {:?})",
            settings.max_rps,
            limiter.min_interval()
        );
        let api = UsaClient::new(
            &settings.api_root,
            settings.api,
            Arc::clone(&limiter),
            cancel.clone(),
        )
        .context("Failed to build API client")?;
        let downloader = Downloader::new(settings.download, limiter, cancel.clone())
            .context("Failed to build downloader")?;
        Ok(Self {
            api,
            downloader,
            cancel,
            progress,
        })
    }

    /// Bulk backfill with auto-splitting. Exit code 1 when any minimal window
    /// failed, 130 when cancelled. Fatal errors are returned after the run
    /// log is written.
    pub fn backfill(&self, config: &BackfillConfig) -> anyhow::Result<ExitCode> {
        let start = Instant::now();
        std::fs::create_dir_all(&config.output_dir).with_context(|| {
            format!("Cannot create output directory {}", config.output_dir.display())
        })?;
        let mut run_log = RunLog::start("backfill", backfill_parameters(config));
        let log_path = run_log.save(&config.output_dir)?;
        log::info!(
            "Backfill starting: run_id={} groups={} range={} ({} days) min_split_days={}",
            run_log.run_id,
            join_names(config.groups.iter().map(|g| g.name())),
            config.range,
            config.range.days(),
            config.min_split_days
        );

        let runner = BulkJobRunner::new(
            &self.api,
            &self.downloader,
            config.job.clone(),
            self.cancel.clone(),
            Arc::clone(&self.progress),
        );
        let mut outcome = BackfillOutcome::default();
        let result = run_backfill(config, &runner, &self.cancel, &mut outcome);

        run_log.record_backfill(&outcome);
        let summary = BackfillSummary::from_outcome(&outcome, start.elapsed());
        self.report(|| summary.print(), || summary.log());

        let code = self.conclude(result, outcome.is_success(), &mut run_log);
        run_log.save(&config.output_dir)?;
        log::info!("Run log: {}", log_path.display());
        code
    }

    /// Paginated search over every shard. Exit code 1 when any shard
    /// failed, 130 when cancelled.
    pub fn incremental(&self, config: &IncrementalConfig) -> anyhow::Result<ExitCode> {
        let start = Instant::now();
        std::fs::create_dir_all(&config.output_dir).with_context(|| {
            format!("Cannot create output directory {}", config.output_dir.display())
        })?;
        let mut run_log = RunLog::start("incremental", incremental_parameters(config));
        let log_path = run_log.save(&config.output_dir)?;

        let mut outcome = IncrementalOutcome::default();
        let result = run_incremental(config, &self.api, &self.cancel, &self.progress, &mut outcome);

        run_log.record_incremental(&outcome);
        let summary = IncrementalSummary::from_outcome(&outcome, start.elapsed());
        self.report(|| summary.print(), || summary.log());

        let code = self.conclude(result, outcome.is_success(), &mut run_log);
        run_log.save(&config.output_dir)?;
        log::info!("Run log: {}", log_path.display());
        code
    }

    fn report(&self, print: impl FnOnce(), log: impl FnOnce()) {
        if self.progress.is_tty() {
            print();
        } else {
            log();
        }
    }

    /// Map a run result to a final status and exit code
    fn conclude(
        &self,
        result: Result<(), JobError>,
        all_succeeded: bool,
        run_log: &mut RunLog,
    ) -> anyhow::Result<ExitCode> {
        match result {
            Ok(()) if all_succeeded => {
                run_log.finish(RunStatus::Success);
                log::info!("Run {} completed successfully", run_log.run_id);
                Ok(ExitCode::SUCCESS)
            }
            Ok(()) => {
                run_log.finish(RunStatus::Partial);
                log::error!(
                    "Run {} finished with {} failures",
                    run_log.run_id,
                    run_log.errors.len()
                );
                Ok(ExitCode::from(1))
            }
            Err(e) if e.is_cancelled() => {
                run_log.errors.push("cancelled".to_string());
                run_log.finish(RunStatus::Failed);
                log::warn!("Shutdown requested, run {} cancelled", run_log.run_id);
                Ok(ExitCode::from(130))
            }
            Err(e) => {
                run_log.errors.push(e.to_string());
                run_log.finish(RunStatus::Failed);
                Err(anyhow::Error::new(e).context(format!("Run {} failed", run_log.run_id)))
            }
        }
    }
}

fn join_names<'a>(names: impl Iterator<Item = &'a str>) -> String {
    names.collect::<Vec<_>>().join(",")
}

fn backfill_parameters(config: &BackfillConfig) -> Value {
    json!({
        "output_dir": config.output_dir,
        "groups": config.groups.iter().map(|g| g.name()).collect::<Vec<_>>(),
        "start_date": config.range.start_str(),
        "end_date": config.range.end_str(),
        "date_type": config.date_type,
        "file_format": config.file_format,
        "columns": config.columns,
        "agencies": config.agencies,
        "min_split_days": config.min_split_days,
        "poll_interval_secs": config.job.poll_interval.as_secs_f64(),
        "exception_threshold": config.job.exception_threshold,
        "convert": config.job.convert,
    })
}

fn incremental_parameters(config: &IncrementalConfig) -> Value {
    json!({
        "output_dir": config.output_dir,
        "groups": config.groups.iter().map(|g| g.name()).collect::<Vec<_>>(),
        "start_date": config.range.start_str(),
        "end_date": config.range.end_str(),
        "chunk_days": config.chunk_days,
        "agencies": config.agencies,
        "fields": config.fields,
        "format": config.format.extension(),
    })
}
