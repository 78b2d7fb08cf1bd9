//! `spendline backfill` - bulk export with automatic range splitting

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use spendline_core::{CancelToken, SharedProgress};
use spendline_usaspending::{
    BackfillConfig, DateType, FileFormat, JobSettings, Pipeline, PipelineSettings,
};

use super::{FilterArgs, RangeArgs};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct BackfillArgs {
    #[command(flatten)]
    pub range: RangeArgs,

    #[command(flatten)]
    pub filters: FilterArgs,

    /// Date dimension: action_date or last_modified_date
    #[arg(long)]
    pub date_type: Option<DateType>,

    /// Export format: csv, tsv or pstxt
    #[arg(long)]
    pub file_format: Option<FileFormat>,

    /// Explicit export columns (comma-separated; default: server columns)
    #[arg(long, value_delimiter = ',')]
    pub columns: Vec<String>,

    /// Ranges this short are not split further on backend failure
    #[arg(long)]
    pub min_split_days: Option<u32>,

    /// Seconds between status polls
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Consecutive exception-bearing polls that fail a job (0 disables)
    #[arg(long)]
    pub exception_threshold: Option<u32>,

    /// Keep extracted files as-is (skip Parquet conversion)
    #[arg(long)]
    pub no_convert: bool,

    /// Zstd compression level (1-22)
    #[arg(short, long)]
    pub zstd_level: Option<i32>,
}

impl BackfillArgs {
    /// Merge arguments over the config file into a run configuration
    pub fn to_config(&self, config: &Config, today: chrono::NaiveDate) -> Result<BackfillConfig> {
        let range = self.range.resolve(today)?;
        let bulk = &config.bulk;
        let date_type = match self.date_type {
            Some(d) => d,
            None => bulk.date_type.parse().map_err(anyhow::Error::msg)?,
        };
        let file_format = match self.file_format {
            Some(f) => f,
            None => bulk.file_format.parse().map_err(anyhow::Error::msg)?,
        };

        let mut out = BackfillConfig::new(range);
        out.output_dir = self
            .filters
            .output
            .clone()
            .unwrap_or_else(|| config.output.default_dir.clone());
        out.groups = self.filters.groups()?;
        out.agencies = self.filters.agencies()?;
        out.date_type = date_type;
        out.file_format = file_format;
        out.columns = self.columns.clone();
        out.min_split_days = self.min_split_days.unwrap_or(bulk.min_split_days);
        out.job = JobSettings {
            poll_interval: Duration::from_secs(self.poll_interval.unwrap_or(bulk.poll_interval_secs)),
            exception_threshold: self.exception_threshold.unwrap_or(bulk.exception_threshold),
            convert: bulk.convert && !self.no_convert,
            dedup_keys: config.output.dedup_keys.clone(),
            zstd_level: self.zstd_level.unwrap_or(config.output.compression_level),
        };
        Ok(out)
    }
}

pub fn run(
    args: BackfillArgs,
    config: &Config,
    settings: PipelineSettings,
    cancel: CancelToken,
    progress: &SharedProgress,
) -> Result<ExitCode> {
    let today = chrono::Local::now().date_naive();
    let backfill = args.to_config(config, today).context("Invalid backfill arguments")?;
    let pipeline = Pipeline::new(settings, cancel, progress.clone())?;
    pipeline.backfill(&backfill)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use spendline_usaspending::AwardGroup;

    fn args() -> BackfillArgs {
        BackfillArgs {
            range: RangeArgs {
                start: NaiveDate::from_ymd_opt(2024, 9, 1),
                end: NaiveDate::from_ymd_opt(2024, 9, 30),
                ..Default::default()
            },
            filters: FilterArgs {
                groups: vec!["contracts".into(), "grants".into()],
                ..Default::default()
            },
            date_type: None,
            file_format: None,
            columns: Vec::new(),
            min_split_days: None,
            poll_interval: None,
            exception_threshold: None,
            no_convert: false,
            zstd_level: None,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 1).unwrap()
    }

    #[test]
    fn config_file_fills_unset_arguments() {
        let mut config = Config::default();
        config.bulk.file_format = "tsv".into();
        config.bulk.min_split_days = 3;
        config.bulk.poll_interval_secs = 9;
        let c = args().to_config(&config, today()).unwrap();
        assert_eq!(c.groups, vec![AwardGroup::Contracts, AwardGroup::Grants]);
        assert_eq!(c.file_format, FileFormat::Tsv);
        assert_eq!(c.min_split_days, 3);
        assert_eq!(c.job.poll_interval, Duration::from_secs(9));
        assert_eq!(c.output_dir, config.output.default_dir);
        assert!(c.job.convert);
    }

    #[test]
    fn arguments_override_config() {
        let mut a = args();
        a.file_format = Some(FileFormat::Pstxt);
        a.min_split_days = Some(1);
        a.no_convert = true;
        a.exception_threshold = Some(0);
        let c = a.to_config(&Config::default(), today()).unwrap();
        assert_eq!(c.file_format, FileFormat::Pstxt);
        assert_eq!(c.min_split_days, 1);
        assert_eq!(c.job.exception_threshold, 0);
        assert!(!c.job.convert);
    }

    #[test]
    fn bad_config_format_is_reported() {
        let mut config = Config::default();
        config.bulk.file_format = "xlsx".into();
        let err = args().to_config(&config, today()).unwrap_err();
        assert!(err.to_string().contains("xlsx"));
    }
}
