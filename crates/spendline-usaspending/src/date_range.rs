//! Inclusive day-granularity date ranges: bisection, chunking and schedule windows

use std::fmt;
use std::str::FromStr;

use chrono::{Days, NaiveDate};
use serde::Serialize;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateRangeError {
    Parse { input: String },
    Inverted { start: NaiveDate, end: NaiveDate },
    ZeroChunk,
    ZeroDays,
    OutOfRange { days: u32 },
}

impl fmt::Display for DateRangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse { input } => write!(f, "invalid date '{input}' (expected YYYY-MM-DD)"),
            Self::Inverted { start, end } => {
                write!(f, "start date {start} is after end date {end}")
            }
            Self::ZeroChunk => f.write_str("chunk size must be at least one day"),
            Self::ZeroDays => f.write_str("trailing window must cover at least one day"),
            Self::OutOfRange { days } => {
                write!(f, "a {days}-day window reaches past the supported calendar")
            }
        }
    }
}

impl std::error::Error for DateRangeError {}

pub fn parse_date(input: &str) -> Result<NaiveDate, DateRangeError> {
    NaiveDate::parse_from_str(input.trim(), DATE_FORMAT).map_err(|_| DateRangeError::Parse {
        input: input.to_string(),
    })
}

/// Inclusive range `[start, end]`; `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DateRangeError> {
        if start > end {
            return Err(DateRangeError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, DateRangeError> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of days covered, counting both ends
    pub fn days(&self) -> u64 {
        (self.end - self.start).num_days() as u64 + 1
    }

    /// Bisect into `[start, mid]` and `[mid+1, end]`; the first half takes
    /// the extra day on odd lengths. Single-day ranges cannot be split.
    pub fn split(&self) -> Option<(DateRange, DateRange)> {
        let days = self.days();
        if days < 2 {
            return None;
        }
        let mid = self.start + Days::new((days - 1) / 2);
        let second_start = mid + Days::new(1);
        Some((
            DateRange {
                start: self.start,
                end: mid,
            },
            DateRange {
                start: second_start,
                end: self.end,
            },
        ))
    }

    /// Consecutive non-overlapping windows of at most `chunk_days` days
    /// covering the whole range.
    pub fn chunks(&self, chunk_days: u32) -> Result<Vec<DateRange>, DateRangeError> {
        if chunk_days == 0 {
            return Err(DateRangeError::ZeroChunk);
        }
        let mut out = Vec::new();
        let mut current = self.start;
        loop {
            let chunk_end = current
                .checked_add_days(Days::new(u64::from(chunk_days) - 1))
                .map_or(self.end, |d| d.min(self.end));
            out.push(DateRange {
                start: current,
                end: chunk_end,
            });
            if chunk_end >= self.end {
                break;
            }
            current = chunk_end + Days::new(1);
        }
        Ok(out)
    }

    /// `{start}_to_{end}`, used in directory names
    pub fn slug(&self) -> String {
        format!(
            "{}_to_{}",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }

    pub fn start_str(&self) -> String {
        self.start.format(DATE_FORMAT).to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format(DATE_FORMAT).to_string()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }
}

/// Schedule windows relative to a reference day. All end yesterday, since
/// the current day's records are still being published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Daily,
    Weekly,
    Monthly,
    Trailing(u32),
}

impl Window {
    pub fn days(&self) -> u32 {
        match self {
            Self::Daily => 1,
            Self::Weekly => 7,
            Self::Monthly => 30,
            Self::Trailing(n) => *n,
        }
    }

    pub fn range_ending_before(&self, today: NaiveDate) -> Result<DateRange, DateRangeError> {
        let days = self.days();
        if days == 0 {
            return Err(DateRangeError::ZeroDays);
        }
        let out_of_range = DateRangeError::OutOfRange { days };
        let end = today
            .checked_sub_days(Days::new(1))
            .ok_or_else(|| out_of_range.clone())?;
        let start = end
            .checked_sub_days(Days::new(u64::from(days) - 1))
            .ok_or(out_of_range)?;
        DateRange::new(start, end)
    }
}

impl FromStr for Window {
    type Err = String;

    /// `daily`, `weekly`, `monthly`, or `trailing:N`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            _ => match s.strip_prefix("trailing:") {
                Some(n) => n
                    .parse::<u32>()
                    .map(Self::Trailing)
                    .map_err(|_| format!("invalid trailing window '{s}' (expected trailing:N)")),
                None => Err(format!(
                    "unknown window '{s}' (expected daily|weekly|monthly|trailing:N)"
                )),
            },
        }
    }
}
