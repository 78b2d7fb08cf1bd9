//! Incremental search driver: shard a date range and drain the paginated
//! search endpoint for each shard.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde_json::Value;
use spendline_core::{CancelToken, SharedProgress, Stage, StringTable, write_csv, write_parquet};

use crate::agency::AgencyFilter;
use crate::api::UsaClient;
use crate::archive::safe_slug;
use crate::award_group::AwardGroup;
use crate::config::{IncrementalConfig, OutputFormat};
use crate::date_range::{DateRange, DateRangeError};
use crate::job::JobError;
use crate::request::SearchRequest;

/// Unit of work: one window, one group, at most one agency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub group: AwardGroup,
    pub range: DateRange,
    pub agency: Option<AgencyFilter>,
}

impl Shard {
    /// File-name component for the agency (`all` when unfiltered)
    pub fn agency_slug(&self) -> String {
        self.agency
            .as_ref()
            .map(|a| safe_slug(&a.label()))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "all".to_string())
    }
}

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {} | agency=", self.group, self.range)?;
        match &self.agency {
            Some(a) => write!(f, "{}", a.label()),
            None => f.write_str("ALL"),
        }
    }
}

/// Windows × groups × agencies, window-major. No agencies yields one
/// unfiltered shard per window and group.
pub fn shard_iter(
    range: &DateRange,
    chunk_days: u32,
    groups: &[AwardGroup],
    agencies: &[AgencyFilter],
) -> Result<Vec<Shard>, DateRangeError> {
    let agency_slots: Vec<Option<&AgencyFilter>> = if agencies.is_empty() {
        vec![None]
    } else {
        agencies.iter().map(Some).collect()
    };
    let windows = range.chunks(chunk_days)?;
    let mut shards = Vec::with_capacity(windows.len() * groups.len() * agency_slots.len());
    for window in windows {
        for &group in groups {
            for agency in &agency_slots {
                shards.push(Shard {
                    group,
                    range: window,
                    agency: agency.cloned(),
                });
            }
        }
    }
    Ok(shards)
}

/// Rows of one drained shard
#[derive(Debug, Clone)]
pub struct Drained {
    pub table: StringTable,
    pub pages: u32,
    pub duplicates_removed: usize,
}

/// Request pages until one comes back empty or the server reports no next
/// page, then dedup the accumulated rows.
pub fn drain_shard(
    api: &UsaClient,
    shard: &Shard,
    fields: &[String],
    dedup_keys: &[String],
    cancel: &CancelToken,
) -> Result<Drained, JobError> {
    let mut rows: Vec<Value> = Vec::new();
    let mut page = 1u32;
    let mut pages = 0u32;
    loop {
        cancel.check()?;
        let request = SearchRequest {
            group: shard.group,
            range: shard.range,
            agency: shard.agency.as_ref(),
            fields,
            page,
        };
        let resp = api.search_spending_by_award(&request.payload())?;
        pages += 1;

        let results = match resp.get("results").and_then(Value::as_array) {
            Some(r) if !r.is_empty() => r,
            _ => break,
        };
        rows.extend(results.iter().cloned());
        log::debug!("{shard}: page {page} -> {} rows", results.len());

        let has_next = resp
            .pointer("/page_metadata/hasNext")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !has_next {
            break;
        }
        page += 1;
    }

    let preferred: Vec<&str> = fields.iter().map(String::as_str).collect();
    let mut table = StringTable::from_json_records(&preferred, &rows);
    let keys: Vec<&str> = dedup_keys.iter().map(String::as_str).collect();
    let before = table.num_rows();
    let duplicates_removed = table.dedup_by_keys(&keys);
    if duplicates_removed > 0 {
        log::info!(
            "Deduped rows: {before} -> {} (-{duplicates_removed})",
            table.num_rows()
        );
    }
    Ok(Drained {
        table,
        pages,
        duplicates_removed,
    })
}

/// Output path `<out>/incremental/<group>/<start>_to_<end>/awards_<agency>_<ts>.<ext>`
pub fn shard_output_path(
    output_dir: &Path,
    shard: &Shard,
    timestamp: &str,
    format: OutputFormat,
) -> PathBuf {
    output_dir
        .join("incremental")
        .join(safe_slug(shard.group.name()))
        .join(shard.range.slug())
        .join(format!(
            "awards_{}_{timestamp}.{}",
            shard.agency_slug(),
            format.extension()
        ))
}

#[derive(Debug, Clone)]
pub struct ShardResult {
    pub shard: Shard,
    pub rows: usize,
    pub pages: u32,
    pub duplicates_removed: usize,
    /// None when the shard had no results
    pub output: Option<PathBuf>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct FailedShard {
    pub shard: Shard,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct IncrementalOutcome {
    pub total_shards: usize,
    pub results: Vec<ShardResult>,
    pub failed: Vec<FailedShard>,
}

impl IncrementalOutcome {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn rows(&self) -> usize {
        self.results.iter().map(|r| r.rows).sum()
    }

    pub fn outputs(&self) -> impl Iterator<Item = &PathBuf> {
        self.results.iter().filter_map(|r| r.output.as_ref())
    }
}

/// Drain every shard in order. API failures mark the shard failed and the run
/// moves on; cancellation and local write errors abort.
pub fn run_incremental(
    config: &IncrementalConfig,
    api: &UsaClient,
    cancel: &CancelToken,
    progress: &SharedProgress,
    outcome: &mut IncrementalOutcome,
) -> Result<(), JobError> {
    let shards = shard_iter(&config.range, config.chunk_days, &config.groups, &config.agencies)
        .map_err(|e| JobError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;
    outcome.total_shards = shards.len();
    log::info!(
        "Incremental {}: {} shards ({}-day windows)",
        config.range,
        shards.len(),
        config.chunk_days
    );

    for shard in shards {
        cancel.check()?;
        let start = Instant::now();
        log::info!("Shard: {shard}");
        let line = progress.stage_line(&format!("{} {}", shard.group, shard.range));
        line.enter(Stage::Searching);

        let drained = match drain_shard(api, &shard, &config.fields, &config.dedup_keys, cancel) {
            Ok(d) => d,
            Err(JobError::Cancelled) => {
                line.abandon("cancelled".into());
                return Err(JobError::Cancelled);
            }
            Err(e) => {
                log::error!("Shard {shard} failed: {e}");
                line.abandon("failed".into());
                outcome.failed.push(FailedShard {
                    shard,
                    error: e.to_string(),
                });
                continue;
            }
        };

        let output = if drained.table.is_empty() {
            log::info!("No results for shard.");
            None
        } else {
            let ts = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
            let path = shard_output_path(&config.output_dir, &shard, &ts, config.format);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let rows = match config.format {
                OutputFormat::Parquet => write_parquet(&drained.table, &path, config.zstd_level)?,
                OutputFormat::Csv => write_csv(&drained.table, &path)?,
            };
            log::info!("Wrote {}: {} (rows={rows})", config.format, path.display());
            Some(path)
        };
        line.finish(format!(
            "{} rows, {} pages",
            drained.table.num_rows(),
            drained.pages
        ));

        outcome.results.push(ShardResult {
            shard,
            rows: drained.table.num_rows(),
            pages: drained.pages,
            duplicates_removed: drained.duplicates_removed,
            output,
            elapsed: start.elapsed(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agency::AgencyRole;

    fn range(s: &str, e: &str) -> DateRange {
        DateRange::parse(s, e).unwrap()
    }

    #[test]
    fn shards_cover_windows_groups_agencies() {
        let agencies = vec![
            AgencyFilter::toptier(AgencyRole::Awarding, "Department of Defense"),
            AgencyFilter::toptier(AgencyRole::Awarding, "NASA"),
        ];
        let shards = shard_iter(
            &range("2024-09-01", "2024-09-10"),
            7,
            &[AwardGroup::Contracts, AwardGroup::Grants],
            &agencies,
        )
        .unwrap();
        assert_eq!(shards.len(), 2 * 2 * 2);
        assert_eq!(shards[0].range, range("2024-09-01", "2024-09-07"));
        assert_eq!(shards[0].group, AwardGroup::Contracts);
        assert_eq!(shards[1].agency.as_ref().unwrap().name, "NASA");
        assert_eq!(shards[2].group, AwardGroup::Grants);
        assert_eq!(shards[4].range, range("2024-09-08", "2024-09-10"));
    }

    #[test]
    fn no_agencies_means_one_unfiltered_shard() {
        let shards =
            shard_iter(&range("2024-09-01", "2024-09-10"), 7, &[AwardGroup::Loans], &[]).unwrap();
        assert_eq!(shards.len(), 2);
        assert!(shards.iter().all(|s| s.agency.is_none()));
        assert_eq!(shards[0].agency_slug(), "all");
        assert_eq!(shards[0].to_string(), "loans | 2024-09-01..2024-09-07 | agency=ALL");
    }

    #[test]
    fn output_path_layout() {
        let shard = Shard {
            group: AwardGroup::Contracts,
            range: range("2024-09-01", "2024-09-07"),
            agency: Some(AgencyFilter::toptier(AgencyRole::Awarding, "Department of Defense")),
        };
        let p = shard_output_path(Path::new("out"), &shard, "20240908_101500", OutputFormat::Csv);
        assert_eq!(
            p,
            PathBuf::from(
                "out/incremental/contracts/2024-09-01_to_2024-09-07/awards_Department_of_Defense_20240908_101500.csv"
            )
        );
    }
}
