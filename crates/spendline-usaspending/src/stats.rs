//! End-of-run summaries.
//!
//! TTY runs print a table via `print()`; non-TTY runs call `log()` so the
//! summary lands in the log stream instead.

use std::time::Duration;

use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use spendline_core::fmt_num;

use crate::backfill::BackfillOutcome;
use crate::incremental::IncrementalOutcome;

/// Aggregated backfill results
#[derive(Debug, Default)]
pub struct BackfillSummary {
    pub jobs_completed: usize,
    pub ranges_failed: usize,
    pub splits: usize,
    pub files_extracted: usize,
    pub files_converted: usize,
    pub conversion_failures: usize,
    pub rows: usize,
    pub duplicates_removed: usize,
    pub bytes_downloaded: u64,
    pub elapsed: Duration,
}

impl BackfillSummary {
    pub fn from_outcome(outcome: &BackfillOutcome, elapsed: Duration) -> Self {
        let mut s = Self {
            jobs_completed: outcome.completed.len(),
            ranges_failed: outcome.failed.len(),
            splits: outcome.splits,
            elapsed,
            ..Default::default()
        };
        for job in &outcome.completed {
            let o = &job.outcome;
            s.files_extracted += o.extracted_files;
            s.files_converted += o.conversion.converted.len();
            s.conversion_failures += o.conversion.failed.len();
            s.rows += o.conversion.rows();
            s.duplicates_removed += o.conversion.duplicates_removed();
            s.bytes_downloaded += o.archive_bytes;
        }
        s
    }

    pub fn format_table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("Backfill")
                    .fg(Color::Cyan)
                    .add_attribute(comfy_table::Attribute::Bold),
                Cell::new("Value").fg(Color::Cyan),
            ]);

        let failed_color = if self.ranges_failed > 0 {
            Color::Red
        } else {
            Color::Reset
        };
        table.add_row(vec![
            Cell::new("Jobs completed").fg(Color::Green),
            Cell::new(fmt_num(self.jobs_completed)).fg(Color::Green),
        ]);
        table.add_row(vec![
            Cell::new("Ranges failed").fg(failed_color),
            Cell::new(fmt_num(self.ranges_failed)).fg(failed_color),
        ]);
        table.add_row(vec![Cell::new("Splits"), Cell::new(fmt_num(self.splits))]);
        table.add_row(vec![
            Cell::new("Downloaded"),
            Cell::new(fmt_bytes(self.bytes_downloaded)),
        ]);
        table.add_row(vec![
            Cell::new("Files extracted"),
            Cell::new(fmt_num(self.files_extracted)),
        ]);
        table.add_row(vec![
            Cell::new("Files converted"),
            Cell::new(format!(
                "{} ({} failed)",
                fmt_num(self.files_converted),
                self.conversion_failures
            )),
        ]);
        table.add_row(vec![Cell::new("Rows"), Cell::new(fmt_num(self.rows))]);
        table.add_row(vec![
            Cell::new("Duplicates removed"),
            Cell::new(fmt_num(self.duplicates_removed)),
        ]);
        table.add_row(vec![
            Cell::new("Elapsed"),
            Cell::new(format!("{:.1}s", self.elapsed.as_secs_f64())),
        ]);

        format!("\n{table}")
    }

    pub fn print(&self) {
        eprintln!("{}", self.format_table());
    }

    /// Log minimal summary (non-TTY mode).
    pub fn log(&self) {
        log::info!(
            "Backfill complete: {} jobs, {} failed ranges, {} splits, {} rows [{:.1}s]",
            self.jobs_completed,
            self.ranges_failed,
            self.splits,
            fmt_num(self.rows),
            self.elapsed.as_secs_f64()
        );
    }
}

/// Aggregated incremental results
#[derive(Debug, Default)]
pub struct IncrementalSummary {
    pub total_shards: usize,
    pub shards_written: usize,
    pub shards_empty: usize,
    pub shards_failed: usize,
    pub pages: u64,
    pub rows: usize,
    pub duplicates_removed: usize,
    pub elapsed: Duration,
}

impl IncrementalSummary {
    pub fn from_outcome(outcome: &IncrementalOutcome, elapsed: Duration) -> Self {
        let mut s = Self {
            total_shards: outcome.total_shards,
            shards_failed: outcome.failed.len(),
            elapsed,
            ..Default::default()
        };
        for r in &outcome.results {
            if r.output.is_some() {
                s.shards_written += 1;
            } else {
                s.shards_empty += 1;
            }
            s.pages += u64::from(r.pages);
            s.rows += r.rows;
            s.duplicates_removed += r.duplicates_removed;
        }
        s
    }

    pub fn format_table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("Incremental")
                    .fg(Color::Cyan)
                    .add_attribute(comfy_table::Attribute::Bold),
                Cell::new("Value").fg(Color::Cyan),
            ]);

        let done = self.shards_written + self.shards_empty;
        table.add_row(vec![
            Cell::new("Shards"),
            Cell::new(format!(
                "{done}/{} ({} empty, {} failed)",
                self.total_shards, self.shards_empty, self.shards_failed
            )),
        ]);
        table.add_row(vec![Cell::new("Pages"), Cell::new(fmt_num(self.pages as usize))]);
        table.add_row(vec![
            Cell::new("Rows").fg(Color::Green),
            Cell::new(fmt_num(self.rows)).fg(Color::Green),
        ]);
        table.add_row(vec![
            Cell::new("Duplicates removed"),
            Cell::new(fmt_num(self.duplicates_removed)),
        ]);
        table.add_row(vec![
            Cell::new("Elapsed"),
            Cell::new(format!("{:.1}s", self.elapsed.as_secs_f64())),
        ]);

        format!("\n{table}")
    }

    pub fn print(&self) {
        eprintln!("{}", self.format_table());
    }

    pub fn log(&self) {
        log::info!(
            "Incremental complete: {}/{} shards written, {} failed, {} rows [{:.1}s]",
            self.shards_written,
            self.total_shards,
            self.shards_failed,
            fmt_num(self.rows),
            self.elapsed.as_secs_f64()
        );
    }
}

/// Human-readable byte count
fn fmt_bytes(n: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{n} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
