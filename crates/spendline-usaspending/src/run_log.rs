//! JSON run log written under `<out>/results/run_results_<run_id>.json`

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::Value;

use crate::backfill::BackfillOutcome;
use crate::incremental::IncrementalOutcome;

/// Timestamp format of run identifiers. Milliseconds keep runs started in
/// the same second from sharing a log file.
pub const RUN_ID_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Success,
    /// Finished, but some ranges or shards failed
    Partial,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Partial => "PARTIAL",
            Self::Failed => "FAILED",
        })
    }
}

/// One job or shard entry
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub group: String,
    pub start_date: String,
    pub end_date: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract_dir: Option<PathBuf>,
    pub converted_files: usize,
    pub rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunLog {
    pub run_id: String,
    pub command: String,
    pub start_time: DateTime<Local>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Local>>,
    pub status: RunStatus,
    pub parameters: Value,
    pub jobs: Vec<JobRecord>,
    pub errors: Vec<String>,
    pub output_files: Vec<PathBuf>,
}

impl RunLog {
    pub fn start(command: &str, parameters: Value) -> Self {
        Self::started_at(command, parameters, Local::now())
    }

    fn started_at(command: &str, parameters: Value, start_time: DateTime<Local>) -> Self {
        Self {
            run_id: start_time.format(RUN_ID_FORMAT).to_string(),
            command: command.to_string(),
            start_time,
            end_time: None,
            status: RunStatus::Running,
            parameters,
            jobs: Vec::new(),
            errors: Vec::new(),
            output_files: Vec::new(),
        }
    }

    pub fn path_in(&self, output_dir: &Path) -> PathBuf {
        output_dir
            .join("results")
            .join(format!("run_results_{}.json", self.run_id))
    }

    /// Write (or rewrite) the log, returning its path.
    pub fn save(&self, output_dir: &Path) -> Result<PathBuf> {
        let path = self.path_in(output_dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("failed to serialize run log")?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("failed to rename {}", tmp.display()))?;
        Ok(path)
    }

    pub fn record_backfill(&mut self, outcome: &BackfillOutcome) {
        for job in &outcome.completed {
            let o = &job.outcome;
            self.jobs.push(JobRecord {
                group: job.group.name().to_string(),
                start_date: job.range.start_str(),
                end_date: job.range.end_str(),
                status: RunStatus::Success,
                agency: None,
                file_name: Some(o.file_name.clone()),
                archive: Some(o.archive.clone()),
                extract_dir: Some(o.extract_dir.clone()),
                converted_files: o.conversion.converted.len(),
                rows: o.conversion.rows(),
                error: None,
            });
            self.output_files.push(o.archive.clone());
            self.output_files
                .extend(o.conversion.converted.iter().map(|c| c.output.clone()));
            for (path, reason) in &o.conversion.failed {
                self.errors
                    .push(format!("Conversion failed for {}: {reason}", path.display()));
            }
        }
        for failed in &outcome.failed {
            self.jobs.push(JobRecord {
                group: failed.group.name().to_string(),
                start_date: failed.range.start_str(),
                end_date: failed.range.end_str(),
                status: RunStatus::Failed,
                agency: None,
                file_name: None,
                archive: None,
                extract_dir: None,
                converted_files: 0,
                rows: 0,
                error: Some(failed.error.clone()),
            });
            self.errors.push(format!(
                "{} {} failed: {}",
                failed.group, failed.range, failed.error
            ));
        }
    }

    pub fn record_incremental(&mut self, outcome: &IncrementalOutcome) {
        for r in &outcome.results {
            self.jobs.push(JobRecord {
                group: r.shard.group.name().to_string(),
                start_date: r.shard.range.start_str(),
                end_date: r.shard.range.end_str(),
                status: RunStatus::Success,
                agency: r.shard.agency.as_ref().map(|a| a.label()),
                file_name: None,
                archive: None,
                extract_dir: None,
                converted_files: usize::from(r.output.is_some()),
                rows: r.rows,
                error: None,
            });
        }
        self.output_files.extend(outcome.outputs().cloned());
        for f in &outcome.failed {
            self.jobs.push(JobRecord {
                group: f.shard.group.name().to_string(),
                start_date: f.shard.range.start_str(),
                end_date: f.shard.range.end_str(),
                status: RunStatus::Failed,
                agency: f.shard.agency.as_ref().map(|a| a.label()),
                file_name: None,
                archive: None,
                extract_dir: None,
                converted_files: 0,
                rows: 0,
                error: Some(f.error.clone()),
            });
            self.errors.push(format!("Shard {} failed: {}", f.shard, f.error));
        }
    }

    /// Close the log with a final status.
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.end_time = Some(Local::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::award_group::AwardGroup;
    use crate::backfill::FailedRange;
    use crate::date_range::DateRange;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn saves_under_results_dir() {
        let dir = TempDir::new().unwrap();
        let mut log = RunLog::start("backfill", serde_json::json!({"groups": ["contracts"]}));
        let path = log.save(dir.path()).unwrap();
        assert_eq!(
            path,
            dir.path()
                .join("results")
                .join(format!("run_results_{}.json", log.run_id))
        );

        let v: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(v["status"], "RUNNING");
        assert!(v.get("end_time").is_none());

        log.finish(RunStatus::Success);
        log.save(dir.path()).unwrap();
        let v: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(v["status"], "SUCCESS");
        assert!(v["end_time"].is_string());
        assert_eq!(v["parameters"]["groups"][0], "contracts");
    }

    #[test]
    fn run_id_is_timestamp() {
        let log = RunLog::start("incremental", Value::Null);
        assert_eq!(log.run_id.len(), 19);
        assert_eq!(&log.run_id[8..9], "_");
        assert_eq!(&log.run_id[15..16], "_");
    }

    #[test]
    fn runs_in_the_same_second_get_separate_logs() {
        let dir = TempDir::new().unwrap();
        let t0 = Local.with_ymd_and_hms(2024, 10, 1, 6, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::milliseconds(250);
        let first = RunLog::started_at("backfill", Value::Null, t0);
        let second = RunLog::started_at("incremental", Value::Null, t1);
        assert_eq!(first.run_id, "20241001_060000_000");
        assert_eq!(second.run_id, "20241001_060000_250");

        let a = first.save(dir.path()).unwrap();
        let b = second.save(dir.path()).unwrap();
        assert_ne!(a, b);
        let v: Value = serde_json::from_str(&std::fs::read_to_string(&a).unwrap()).unwrap();
        assert_eq!(v["command"], "backfill");
    }

    #[test]
    fn failed_ranges_become_errors() {
        let mut outcome = BackfillOutcome::default();
        outcome.failed.push(FailedRange {
            group: AwardGroup::Grants,
            range: DateRange::parse("2024-09-01", "2024-09-07").unwrap(),
            error: "bulk job x failed".into(),
        });
        let mut log = RunLog::start("backfill", Value::Null);
        log.record_backfill(&outcome);
        assert_eq!(log.jobs.len(), 1);
        assert_eq!(log.jobs[0].status, RunStatus::Failed);
        assert_eq!(log.jobs[0].start_date, "2024-09-01");
        assert_eq!(log.errors.len(), 1);
        assert!(log.errors[0].contains("grants"));
    }
}
