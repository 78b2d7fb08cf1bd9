//! Runtime configuration for backfill and incremental runs

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use spendline_core::{DEFAULT_DEDUP_KEYS, DEFAULT_ZSTD_LEVEL};

use crate::agency::AgencyFilter;
use crate::award_group::AwardGroup;
use crate::bulk::JobSettings;
use crate::date_range::DateRange;
use crate::request::{BulkJobRequest, DateType, FileFormat, default_search_fields};

/// Default output root
pub const DEFAULT_OUTPUT_DIR: &str = "usaspending_data";

/// Default smallest window the splitting driver will still bisect
pub const DEFAULT_MIN_SPLIT_DAYS: u32 = 7;

/// Default incremental shard width
pub const DEFAULT_CHUNK_DAYS: u32 = 7;

/// Bulk backfill run
#[derive(Debug, Clone)]
pub struct BackfillConfig {
    pub output_dir: PathBuf,
    pub groups: Vec<AwardGroup>,
    pub range: DateRange,
    pub date_type: DateType,
    pub file_format: FileFormat,
    pub columns: Vec<String>,
    pub agencies: Vec<AgencyFilter>,
    /// Ranges of at most this many days are not split further
    pub min_split_days: u32,
    pub job: JobSettings,
}

impl BackfillConfig {
    pub fn new(range: DateRange) -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            groups: vec![AwardGroup::Contracts],
            range,
            date_type: DateType::default(),
            file_format: FileFormat::default(),
            columns: Vec::new(),
            agencies: Vec::new(),
            min_split_days: DEFAULT_MIN_SPLIT_DAYS,
            job: JobSettings::default(),
        }
    }

    /// Full-range request for one group
    pub fn request_for(&self, group: AwardGroup) -> BulkJobRequest {
        BulkJobRequest {
            group,
            date_type: self.date_type,
            range: self.range,
            file_format: self.file_format,
            columns: self.columns.clone(),
            agencies: self.agencies.clone(),
        }
    }
}

/// Output format of incremental shard files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Parquet,
    Csv,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Parquet => "parquet",
            Self::Csv => "csv",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "parquet" => Ok(Self::Parquet),
            "csv" => Ok(Self::Csv),
            other => Err(format!("unknown output format '{other}' (expected parquet|csv)")),
        }
    }
}

/// Incremental search run
#[derive(Debug, Clone)]
pub struct IncrementalConfig {
    pub output_dir: PathBuf,
    pub groups: Vec<AwardGroup>,
    pub range: DateRange,
    pub chunk_days: u32,
    /// One shard per agency; empty means a single unfiltered shard
    pub agencies: Vec<AgencyFilter>,
    pub fields: Vec<String>,
    pub format: OutputFormat,
    pub dedup_keys: Vec<String>,
    pub zstd_level: i32,
}

impl IncrementalConfig {
    pub fn new(range: DateRange) -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            groups: vec![AwardGroup::Contracts],
            range,
            chunk_days: DEFAULT_CHUNK_DAYS,
            agencies: Vec::new(),
            fields: default_search_fields(),
            format: OutputFormat::default(),
            dedup_keys: DEFAULT_DEDUP_KEYS.iter().map(|k| k.to_string()).collect(),
            zstd_level: DEFAULT_ZSTD_LEVEL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agency::AgencyRole;

    fn range() -> DateRange {
        DateRange::parse("2024-09-01", "2024-09-30").unwrap()
    }

    #[test]
    fn backfill_defaults() {
        let c = BackfillConfig::new(range());
        assert_eq!(c.output_dir, PathBuf::from("usaspending_data"));
        assert_eq!(c.groups, vec![AwardGroup::Contracts]);
        assert_eq!(c.min_split_days, 7);
        assert_eq!(c.file_format, FileFormat::Csv);
        assert_eq!(c.date_type, DateType::ActionDate);
    }

    #[test]
    fn request_for_copies_filters() {
        let mut c = BackfillConfig::new(range());
        c.agencies = vec![AgencyFilter::toptier(AgencyRole::Funding, "NASA")];
        c.columns = vec!["award_id_piid".into()];
        let req = c.request_for(AwardGroup::Idvs);
        assert_eq!(req.group, AwardGroup::Idvs);
        assert_eq!(req.range, range());
        assert_eq!(req.agencies.len(), 1);
        assert_eq!(req.columns, vec!["award_id_piid".to_string()]);
    }

    #[test]
    fn incremental_defaults() {
        let c = IncrementalConfig::new(range());
        assert_eq!(c.chunk_days, 7);
        assert_eq!(c.format, OutputFormat::Parquet);
        assert_eq!(c.fields.len(), 11);
        assert!(c.agencies.is_empty());
    }

    #[test]
    fn output_format_parse() {
        assert_eq!("CSV".parse::<OutputFormat>(), Ok(OutputFormat::Csv));
        assert!("json".parse::<OutputFormat>().is_err());
    }
}
