//! Subcommands and the argument groups they share

pub mod backfill;
pub mod config;
pub mod incremental;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Args;
use spendline_usaspending::{
    AgencyFilter, AgencyRole, AwardGroup, DateRange, Window, date_range::parse_date, parse_groups,
};

/// Date range selection: explicit dates or a schedule window ending yesterday
#[derive(Args, Debug, Clone, Default)]
pub struct RangeArgs {
    /// First day, inclusive (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date, requires = "end")]
    pub start: Option<NaiveDate>,

    /// Last day, inclusive (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date, requires = "start")]
    pub end: Option<NaiveDate>,

    /// Schedule window instead of dates: daily, weekly, monthly, trailing
    #[arg(long, conflicts_with_all = ["start", "end"])]
    pub window: Option<String>,

    /// Days covered by a trailing window (alone: trailing N days)
    #[arg(long, conflicts_with_all = ["start", "end"])]
    pub days: Option<u32>,
}

impl RangeArgs {
    pub fn resolve(&self, today: NaiveDate) -> Result<DateRange> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            return DateRange::new(start, end).context("Invalid date range");
        }
        let window = match (self.window.as_deref(), self.days) {
            (Some(w), Some(days)) if w.trim().eq_ignore_ascii_case("trailing") => {
                Window::Trailing(days)
            }
            (Some(w), _) if w.trim().eq_ignore_ascii_case("trailing") => {
                anyhow::bail!("--window trailing requires --days N")
            }
            (Some(w), _) => w.parse::<Window>().map_err(anyhow::Error::msg)?,
            (None, Some(days)) => Window::Trailing(days),
            (None, None) => anyhow::bail!("Specify --start/--end or --window"),
        };
        window
            .range_ending_before(today)
            .context("Invalid schedule window")
    }
}

/// Award groups and agency filters
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Award groups (comma-separated): contracts, loans, idvs, grants,
    /// other_fin_ast, direct_payments
    #[arg(long, value_delimiter = ',', default_value = "contracts")]
    pub groups: Vec<String>,

    /// Agency filter, repeatable: `[funding:|awarding:]Name` or `Subtier|Toptier`
    #[arg(long = "agency")]
    pub agencies: Vec<String>,

    /// Role applied to agencies without a prefix
    #[arg(long, default_value = "awarding")]
    pub agency_type: AgencyRole,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl FilterArgs {
    pub fn groups(&self) -> Result<Vec<AwardGroup>> {
        parse_groups(&self.groups).context("Invalid --groups")
    }

    pub fn agencies(&self) -> Result<Vec<AgencyFilter>> {
        AgencyFilter::parse_list(&self.agencies, self.agency_type).context("Invalid --agency")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spendline_usaspending::AgencyTier;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 1).unwrap()
    }

    #[test]
    fn explicit_dates_win() {
        let args = RangeArgs {
            start: NaiveDate::from_ymd_opt(2024, 9, 1),
            end: NaiveDate::from_ymd_opt(2024, 9, 30),
            ..Default::default()
        };
        let r = args.resolve(today()).unwrap();
        assert_eq!(r.days(), 30);
    }

    #[test]
    fn inverted_dates_rejected() {
        let args = RangeArgs {
            start: NaiveDate::from_ymd_opt(2024, 9, 30),
            end: NaiveDate::from_ymd_opt(2024, 9, 1),
            ..Default::default()
        };
        assert!(args.resolve(today()).is_err());
    }

    #[test]
    fn windows_end_yesterday() {
        let weekly = RangeArgs {
            window: Some("weekly".into()),
            ..Default::default()
        };
        let r = weekly.resolve(today()).unwrap();
        assert_eq!(r.end_str(), "2024-09-30");
        assert_eq!(r.days(), 7);

        let trailing = RangeArgs {
            window: Some("trailing".into()),
            days: Some(3),
            ..Default::default()
        };
        assert_eq!(trailing.resolve(today()).unwrap().start_str(), "2024-09-28");

        let days_only = RangeArgs {
            days: Some(10),
            ..Default::default()
        };
        assert_eq!(days_only.resolve(today()).unwrap().days(), 10);
    }

    #[test]
    fn trailing_without_days_rejected() {
        let args = RangeArgs {
            window: Some("trailing".into()),
            ..Default::default()
        };
        assert!(args.resolve(today()).is_err());
        assert!(RangeArgs::default().resolve(today()).is_err());
    }

    #[test]
    fn huge_day_count_is_an_error() {
        let args = RangeArgs {
            days: Some(100_000_000),
            ..Default::default()
        };
        let err = format!("{:#}", args.resolve(today()).unwrap_err());
        assert!(err.contains("100000000-day window"), "{err}");
    }

    #[test]
    fn filters_parse_groups_and_agencies() {
        let args = FilterArgs {
            groups: vec!["grants".into(), "loans".into()],
            agencies: vec![
                "Department of Energy".into(),
                "awarding:Office of Science|Department of Energy".into(),
            ],
            agency_type: AgencyRole::Funding,
            output: None,
        };
        assert_eq!(args.groups().unwrap(), vec![AwardGroup::Grants, AwardGroup::Loans]);
        let agencies = args.agencies().unwrap();
        assert_eq!(agencies[0].role, AgencyRole::Funding);
        assert_eq!(agencies[1].role, AgencyRole::Awarding);
        assert_eq!(agencies[1].tier, AgencyTier::Subtier);
    }

    #[test]
    fn unknown_group_is_config_error() {
        let args = FilterArgs {
            groups: vec!["widgets".into()],
            ..Default::default()
        };
        let err = format!("{:#}", args.groups().unwrap_err());
        assert!(err.contains("widgets"));
        assert!(err.contains("contracts"));
    }
}
