//! Request payloads for the bulk-download and search endpoints

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::agency::AgencyFilter;
use crate::award_group::AwardGroup;
use crate::date_range::DateRange;

/// Rows per search page
pub const SEARCH_PAGE_SIZE: u32 = 500;

/// Sort column for search pages (descending), for stable ordering across runs
pub const SEARCH_SORT_FIELD: &str = "Award Amount";

/// Fields requested from the search endpoint
pub const SEARCH_FIELDS: &[&str] = &[
    "Award ID",
    "Recipient Name",
    "Recipient UEI",
    "Awarding Agency",
    "Funding Agency",
    "Award Amount",
    "Start Date",
    "End Date",
    "Primary Place of Performance",
    "Description",
    "Last Modified Date",
];

/// Date dimension the bulk export filters on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DateType {
    #[default]
    ActionDate,
    LastModifiedDate,
}

impl DateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActionDate => "action_date",
            Self::LastModifiedDate => "last_modified_date",
        }
    }
}

impl fmt::Display for DateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "action_date" => Ok(Self::ActionDate),
            "last_modified_date" => Ok(Self::LastModifiedDate),
            other => Err(format!(
                "unknown date type '{other}' (expected action_date|last_modified_date)"
            )),
        }
    }
}

/// Export file format produced by the bulk job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Csv,
    Tsv,
    Pstxt,
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Tsv => "tsv",
            Self::Pstxt => "pstxt",
        }
    }

    /// Field delimiter of the extracted text files
    pub fn delimiter(&self) -> u8 {
        match self {
            Self::Csv => b',',
            Self::Tsv => b'\t',
            Self::Pstxt => b'|',
        }
    }

    /// Extension of the extracted text files
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Tsv => "tsv",
            Self::Pstxt => "txt",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "tsv" => Ok(Self::Tsv),
            "pstxt" => Ok(Self::Pstxt),
            other => Err(format!("unknown file format '{other}' (expected csv|tsv|pstxt)")),
        }
    }
}

/// One bulk export job. Immutable once built; splitting produces new
/// requests through [`BulkJobRequest::with_range`].
#[derive(Debug, Clone, PartialEq)]
pub struct BulkJobRequest {
    pub group: AwardGroup,
    pub date_type: DateType,
    pub range: DateRange,
    pub file_format: FileFormat,
    /// Explicit column list; empty asks for the server's default columns
    pub columns: Vec<String>,
    pub agencies: Vec<AgencyFilter>,
}

/// Wire body for a bulk download job
#[derive(Serialize)]
pub struct BulkPayload<'a> {
    filters: BulkFilters<'a>,
    file_format: FileFormat,
    columns: &'a [String],
}

#[derive(Serialize)]
struct BulkFilters<'a> {
    prime_award_types: &'static [&'static str],
    date_type: DateType,
    date_range: DateWindow,
    #[serde(skip_serializing_if = "Option::is_none")]
    agencies: Option<&'a [AgencyFilter]>,
}

#[derive(Serialize)]
struct DateWindow {
    start_date: String,
    end_date: String,
}

impl From<&DateRange> for DateWindow {
    fn from(range: &DateRange) -> Self {
        Self {
            start_date: range.start_str(),
            end_date: range.end_str(),
        }
    }
}

impl BulkJobRequest {
    pub fn new(group: AwardGroup, range: DateRange) -> Self {
        Self {
            group,
            date_type: DateType::default(),
            range,
            file_format: FileFormat::default(),
            columns: Vec::new(),
            agencies: Vec::new(),
        }
    }

    /// Same request over a different date range
    pub fn with_range(&self, range: DateRange) -> Self {
        Self {
            range,
            ..self.clone()
        }
    }

    pub fn payload(&self) -> BulkPayload<'_> {
        BulkPayload {
            filters: BulkFilters {
                prime_award_types: self.group.type_codes(),
                date_type: self.date_type,
                date_range: DateWindow::from(&self.range),
                agencies: (!self.agencies.is_empty()).then_some(self.agencies.as_slice()),
            },
            file_format: self.file_format,
            columns: &self.columns,
        }
    }
}

/// One page request against the paginated search endpoint
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub group: AwardGroup,
    pub range: DateRange,
    pub agency: Option<&'a AgencyFilter>,
    pub fields: &'a [String],
    pub page: u32,
}

/// Wire body for one search page
#[derive(Serialize)]
pub struct SearchPayload<'a> {
    filters: SearchFilters<'a>,
    fields: &'a [String],
    limit: u32,
    page: u32,
    sort: &'static str,
    order: &'static str,
}

#[derive(Serialize)]
struct SearchFilters<'a> {
    award_type_codes: &'static [&'static str],
    time_period: [DateWindow; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    agencies: Option<[&'a AgencyFilter; 1]>,
}

impl SearchRequest<'_> {
    pub fn payload(&self) -> SearchPayload<'_> {
        SearchPayload {
            filters: SearchFilters {
                award_type_codes: self.group.type_codes(),
                time_period: [DateWindow::from(&self.range)],
                agencies: self.agency.map(|a| [a]),
            },
            fields: self.fields,
            limit: SEARCH_PAGE_SIZE,
            page: self.page,
            sort: SEARCH_SORT_FIELD,
            order: "desc",
        }
    }
}

/// Default search field list as owned strings
pub fn default_search_fields() -> Vec<String> {
    SEARCH_FIELDS.iter().map(|f| f.to_string()).collect()
}
