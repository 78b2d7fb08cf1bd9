//! `spendline incremental` - paginated search over recent windows

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use spendline_core::{CancelToken, SharedProgress};
use spendline_usaspending::{IncrementalConfig, OutputFormat, Pipeline, PipelineSettings};

use super::{FilterArgs, RangeArgs};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct IncrementalArgs {
    #[command(flatten)]
    pub range: RangeArgs,

    #[command(flatten)]
    pub filters: FilterArgs,

    /// Shard width in days
    #[arg(long)]
    pub chunk_days: Option<u32>,

    /// Output format: parquet or csv
    #[arg(long = "fmt")]
    pub format: Option<OutputFormat>,

    /// Zstd compression level (1-22)
    #[arg(short, long)]
    pub zstd_level: Option<i32>,
}

impl IncrementalArgs {
    pub fn to_config(&self, config: &Config, today: chrono::NaiveDate) -> Result<IncrementalConfig> {
        let range = self.range.resolve(today)?;
        let inc = &config.incremental;
        let format = match self.format {
            Some(f) => f,
            None => inc.format.parse().map_err(anyhow::Error::msg)?,
        };

        let mut out = IncrementalConfig::new(range);
        out.output_dir = self
            .filters
            .output
            .clone()
            .unwrap_or_else(|| config.output.default_dir.clone());
        out.groups = self.filters.groups()?;
        out.agencies = self.filters.agencies()?;
        out.chunk_days = self.chunk_days.unwrap_or(inc.chunk_days);
        anyhow::ensure!(out.chunk_days > 0, "chunk size must be at least one day");
        if !inc.fields.is_empty() {
            out.fields = inc.fields.clone();
        }
        out.format = format;
        out.dedup_keys = config.output.dedup_keys.clone();
        out.zstd_level = self.zstd_level.unwrap_or(config.output.compression_level);
        Ok(out)
    }
}

pub fn run(
    args: IncrementalArgs,
    config: &Config,
    settings: PipelineSettings,
    cancel: CancelToken,
    progress: &SharedProgress,
) -> Result<ExitCode> {
    let today = chrono::Local::now().date_naive();
    let incremental = args
        .to_config(config, today)
        .context("Invalid incremental arguments")?;
    let pipeline = Pipeline::new(settings, cancel, progress.clone())?;
    pipeline.incremental(&incremental)
}
