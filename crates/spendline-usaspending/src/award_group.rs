//! Award groups and their upstream award-type codes

use std::fmt;
use std::str::FromStr;

/// Named set of award-type codes. The API rejects requests that mix groups,
/// so every job and shard targets exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AwardGroup {
    Contracts,
    Loans,
    Idvs,
    Grants,
    OtherFinancialAssistance,
    DirectPayments,
}

impl AwardGroup {
    /// Parse group from its short name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "contracts" => Some(Self::Contracts),
            "loans" => Some(Self::Loans),
            "idvs" => Some(Self::Idvs),
            "grants" => Some(Self::Grants),
            "other_fin_ast" => Some(Self::OtherFinancialAssistance),
            "direct_payments" => Some(Self::DirectPayments),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Contracts => "contracts",
            Self::Loans => "loans",
            Self::Idvs => "idvs",
            Self::Grants => "grants",
            Self::OtherFinancialAssistance => "other_fin_ast",
            Self::DirectPayments => "direct_payments",
        }
    }

    /// Award-type codes sent as `prime_award_types` / `award_type_codes`
    pub fn type_codes(&self) -> &'static [&'static str] {
        match self {
            Self::Contracts => &["A", "B", "C", "D"],
            Self::Loans => &["07", "08"],
            Self::Idvs => &[
                "IDV_A", "IDV_B", "IDV_B_A", "IDV_B_B", "IDV_B_C", "IDV_C", "IDV_D", "IDV_E",
            ],
            Self::Grants => &["02", "03", "04", "05"],
            Self::OtherFinancialAssistance => &["06", "10"],
            Self::DirectPayments => &["09", "11", "-1"],
        }
    }

    pub fn all() -> &'static [AwardGroup] {
        &[
            Self::Contracts,
            Self::Loans,
            Self::Idvs,
            Self::Grants,
            Self::OtherFinancialAssistance,
            Self::DirectPayments,
        ]
    }
}

impl fmt::Display for AwardGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Group name not in the known vocabulary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownGroup(pub String);

impl fmt::Display for UnknownGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let known: Vec<&str> = AwardGroup::all().iter().map(|g| g.name()).collect();
        write!(
            f,
            "unknown award group '{}' (known: {})",
            self.0,
            known.join(", ")
        )
    }
}

impl std::error::Error for UnknownGroup {}

impl FromStr for AwardGroup {
    type Err = UnknownGroup;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| UnknownGroup(s.to_string()))
    }
}

/// Parse a list of group names, dropping repeats. Empty input means contracts.
pub fn parse_groups<S: AsRef<str>>(names: &[S]) -> Result<Vec<AwardGroup>, UnknownGroup> {
    if names.is_empty() {
        return Ok(vec![AwardGroup::Contracts]);
    }
    let mut groups = Vec::with_capacity(names.len());
    for name in names {
        let group: AwardGroup = name.as_ref().parse()?;
        if !groups.contains(&group) {
            groups.push(group);
        }
    }
    Ok(groups)
}
