//! Bulk job runner: submit → poll → download → extract → convert

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use spendline_core::{
    CancelToken, DEFAULT_DEDUP_KEYS, DEFAULT_ZSTD_LEVEL, Downloader, SharedProgress, Stage,
    StageLine,
};

use crate::api::UsaClient;
use crate::archive::{ConversionReport, archive_file_name, convert_extracted, extract_zip};
use crate::job::{
    BulkJobHandle, DEFAULT_EXCEPTION_THRESHOLD, JobError, JobPoller, PollDecision, StatusReport,
    pretty,
};
use crate::request::BulkJobRequest;

/// Per-job behaviour of the runner
#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Fixed delay between status polls
    pub poll_interval: Duration,
    /// Consecutive exception-bearing polls that fail a job (0 = disabled)
    pub exception_threshold: u32,
    /// Convert extracted delimited files to Parquet
    pub convert: bool,
    pub dedup_keys: Vec<String>,
    pub zstd_level: i32,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            exception_threshold: DEFAULT_EXCEPTION_THRESHOLD,
            convert: true,
            dedup_keys: DEFAULT_DEDUP_KEYS.iter().map(|k| k.to_string()).collect(),
            zstd_level: DEFAULT_ZSTD_LEVEL,
        }
    }
}

/// Artifacts of a finished job
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub file_name: String,
    pub archive: PathBuf,
    pub archive_bytes: u64,
    pub extract_dir: PathBuf,
    pub extracted_files: usize,
    pub conversion: ConversionReport,
    pub polls: u32,
    pub elapsed: Duration,
}

/// Directory a job's archive is extracted into
pub fn extract_dir_name(request: &BulkJobRequest) -> String {
    format!("bulk_{}_{}", request.group.name(), request.range.slug())
}

/// Drives one bulk export job at a time. All HTTP goes through the shared
/// rate limiter held by `api` and `downloader`.
pub struct BulkJobRunner<'a> {
    api: &'a UsaClient,
    downloader: &'a Downloader,
    settings: JobSettings,
    cancel: CancelToken,
    progress: SharedProgress,
}

impl<'a> BulkJobRunner<'a> {
    pub fn new(
        api: &'a UsaClient,
        downloader: &'a Downloader,
        settings: JobSettings,
        cancel: CancelToken,
        progress: SharedProgress,
    ) -> Self {
        Self {
            api,
            downloader,
            settings,
            cancel,
            progress,
        }
    }

    /// Run one job to completion. Output lands under `out_dir`.
    pub fn run(&self, request: &BulkJobRequest, out_dir: &Path) -> Result<JobOutcome, JobError> {
        let start = Instant::now();
        let label = format!("{} {}", request.group, request.range);
        let line = self.progress.stage_line(&label);

        let result = self.run_inner(request, out_dir, &line, start);
        match &result {
            Ok(outcome) => line.finish(format!(
                "done: {} files, {} rows",
                outcome.extracted_files,
                outcome.conversion.rows()
            )),
            Err(e) => line.abandon(format!("failed: {}", first_line(&e.to_string()))),
        }
        result
    }

    fn run_inner(
        &self,
        request: &BulkJobRequest,
        out_dir: &Path,
        line: &StageLine,
        start: Instant,
    ) -> Result<JobOutcome, JobError> {
        self.cancel.check()?;
        let handle = self.submit(request)?;
        line.enter(Stage::Submitted);

        let (report, polls) = self.poll_until_terminal(&handle, line)?;

        let file_url = report
            .file_url
            .clone()
            .or_else(|| handle.file_url.clone())
            .ok_or_else(|| JobError::MissingFileUrl {
                file_name: handle.file_name.clone(),
                status: pretty(&report.payload),
            })?;

        std::fs::create_dir_all(out_dir)?;
        let archive = out_dir.join(archive_file_name(&handle.file_name));
        log::info!("Downloading: {file_url} -> {}", archive.display());
        line.enter(Stage::Downloading);
        let dl_bar = self.progress.download_bar(&handle.file_name);
        let archive_bytes = self.downloader.download(&file_url, &archive, &dl_bar);
        dl_bar.finish_and_clear();
        let archive_bytes = archive_bytes?;

        line.enter(Stage::Extracting);
        let extract_dir = out_dir.join(extract_dir_name(request));
        let extracted = extract_zip(&archive, &extract_dir)?;

        let conversion = if self.settings.convert {
            line.enter(Stage::Converting);
            convert_extracted(
                &extract_dir,
                request.file_format,
                &self.settings.dedup_keys,
                self.settings.zstd_level,
            )
        } else {
            ConversionReport::default()
        };

        Ok(JobOutcome {
            file_name: handle.file_name,
            archive,
            archive_bytes,
            extract_dir,
            extracted_files: extracted.len(),
            conversion,
            polls,
            elapsed: start.elapsed(),
        })
    }

    /// POST the job; a response without an identifier is fatal.
    pub fn submit(&self, request: &BulkJobRequest) -> Result<BulkJobHandle, JobError> {
        log::info!(
            "Starting bulk job: group={} | {} | {} | {}",
            request.group,
            request.range,
            request.date_type,
            request.file_format
        );
        let resp = self.api.start_bulk_awards(&request.payload())?;
        let handle = BulkJobHandle::from_response(&resp)?;
        log::info!(
            "Bulk started. file_name={} status_url={}",
            handle.file_name,
            handle.status_url.as_deref().unwrap_or("n/a")
        );
        Ok(handle)
    }

    /// Poll at a fixed interval until the job is finished or failed.
    /// Returns the final status report and the number of polls.
    pub fn poll_until_terminal(
        &self,
        handle: &BulkJobHandle,
        line: &StageLine,
    ) -> Result<(StatusReport, u32), JobError> {
        let mut poller = JobPoller::new(self.settings.exception_threshold);
        loop {
            self.cancel.check()?;
            let report = StatusReport::from_json(self.api.download_status(&handle.file_name)?);
            match report.short_message() {
                Some(m) => log::info!("Bulk status: {} ({m})", report.display_status()),
                None => log::info!("Bulk status: {}", report.display_status()),
            }
            line.enter(Stage::Polling(report.display_status().to_string()));

            match poller.observe(&report) {
                PollDecision::Finished => return Ok((report, poller.polls())),
                PollDecision::Failed => {
                    return Err(JobError::BackendFailed {
                        file_name: handle.file_name.clone(),
                        status: pretty(&report.payload),
                    });
                }
                PollDecision::StuckOnException => {
                    return Err(JobError::StuckOnException {
                        file_name: handle.file_name.clone(),
                        polls: poller.consecutive_exceptions(),
                        message: report.short_message().unwrap_or_default(),
                    });
                }
                PollDecision::Continue => self.cancel.sleep(self.settings.poll_interval)?,
            }
        }
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or(s)
}
