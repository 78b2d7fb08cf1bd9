//! Terminal progress for bulk jobs and search shards.
//!
//! Each job or shard owns one [`StageLine`] that walks through [`Stage`]s,
//! and an archive download gets a byte bar of its own. Without a TTY every
//! bar is hidden and the log is the only progress indicator.

use std::fmt;
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

const LABEL_WIDTH: usize = 28;

/// Where a job or shard currently is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Submitted,
    /// Last status string the server reported
    Polling(String),
    WaitingForFile,
    Downloading,
    Extracting,
    Converting,
    Searching,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitted => f.write_str("submitted"),
            Self::Polling(status) => write!(f, "polling: {status}"),
            Self::WaitingForFile => f.write_str("waiting for file"),
            Self::Downloading => f.write_str("downloading"),
            Self::Extracting => f.write_str("extracting"),
            Self::Converting => f.write_str("converting"),
            Self::Searching => f.write_str("searching"),
        }
    }
}

/// Spinner line tracking one job or shard
pub struct StageLine {
    pb: ProgressBar,
}

impl StageLine {
    pub fn enter(&self, stage: Stage) {
        self.pb.set_message(stage.to_string());
    }

    pub fn finish(&self, summary: String) {
        self.pb.finish_with_message(summary);
    }

    /// Leave the line on screen with the failure reason
    pub fn abandon(&self, reason: String) {
        self.pb.abandon_with_message(reason);
    }
}

/// Byte bar, drawn once Content-Length is known
fn bytes_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  {prefix:<26.dim} {bar:30.green/dim} {binary_bytes:>9}/{binary_total_bytes:9} {eta:>4} {wide_msg:.dim}")
        .expect("invalid template")
        .progress_chars("--")
}

/// Before the server reports a length: running byte count only
fn waiting_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  {prefix:<26.dim} {binary_bytes:>9} {wide_msg:.dim}")
        .expect("invalid template")
}

fn stage_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {prefix:<28.cyan.bold} {elapsed:>4} {wide_msg}")
        .expect("invalid template")
}

/// Switch a download bar to the byte bar once the body length is known.
pub fn upgrade_to_bar(pb: &ProgressBar, total: u64) {
    pb.set_length(total);
    pb.set_style(bytes_style());
}

pub struct ProgressContext {
    multi: MultiProgress,
    is_tty: bool,
}

impl ProgressContext {
    /// Draws only when stderr is a terminal.
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            is_tty: std::io::stderr().is_terminal(),
        }
    }

    /// Context that never draws (tests, library callers)
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::new(),
            is_tty: false,
        }
    }

    /// Stage line for a job or shard, starting with an empty message
    pub fn stage_line(&self, label: &str) -> StageLine {
        if !self.is_tty {
            return StageLine {
                pb: ProgressBar::hidden(),
            };
        }
        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(stage_style());
        pb.set_prefix(truncate(label, LABEL_WIDTH).to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        StageLine { pb }
    }

    /// Byte counter for an archive download, upgraded by [`upgrade_to_bar`]
    pub fn download_bar(&self, file_name: &str) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }
        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(waiting_style());
        pb.set_prefix(truncate(file_name, LABEL_WIDTH - 2).to_string());
        pb
    }

    pub fn is_tty(&self) -> bool {
        self.is_tty
    }

    /// Shared with the log bridge so log lines print above the bars
    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }
}

impl Default for ProgressContext {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedProgress = Arc<ProgressContext>;

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Format number with thousand separators.
pub fn fmt_num(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}
