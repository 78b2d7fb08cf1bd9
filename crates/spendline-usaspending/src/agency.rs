//! Agency filters and the free-text agency grammar
//!
//! ```text
//! [funding:|awarding:]Name              toptier agency
//! [funding:|awarding:]Subtier|Toptier   subtier agency with its parent
//! ```

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgencyRole {
    #[default]
    Awarding,
    Funding,
}

impl AgencyRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Awarding => "awarding",
            Self::Funding => "funding",
        }
    }
}

impl fmt::Display for AgencyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgencyRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "awarding" => Ok(Self::Awarding),
            "funding" => Ok(Self::Funding),
            other => Err(format!("unknown agency type '{other}' (expected awarding|funding)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgencyTier {
    Toptier,
    Subtier,
}

/// One entry of `filters.agencies`, serialized in the API's shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AgencyFilter {
    #[serde(rename = "type")]
    pub role: AgencyRole,
    pub tier: AgencyTier,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toptier_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgencyParseError {
    pub input: String,
}

impl fmt::Display for AgencyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid agency specifier '{}': empty agency name", self.input)
    }
}

impl std::error::Error for AgencyParseError {}

impl AgencyFilter {
    pub fn toptier(role: AgencyRole, name: impl Into<String>) -> Self {
        Self {
            role,
            tier: AgencyTier::Toptier,
            name: name.into(),
            toptier_name: None,
        }
    }

    /// Parse one agency specifier. A `funding:`/`awarding:` prefix
    /// (case-insensitive) overrides `default_role`.
    pub fn parse(input: &str, default_role: AgencyRole) -> Result<Self, AgencyParseError> {
        let err = || AgencyParseError {
            input: input.to_string(),
        };
        let mut rest = input.trim();
        let mut role = default_role;
        for (prefix, r) in [
            ("funding:", AgencyRole::Funding),
            ("awarding:", AgencyRole::Awarding),
        ] {
            if rest.len() >= prefix.len()
                && rest.is_char_boundary(prefix.len())
                && rest[..prefix.len()].eq_ignore_ascii_case(prefix)
            {
                role = r;
                rest = rest[prefix.len()..].trim();
                break;
            }
        }

        match rest.split_once('|') {
            Some((sub, top)) => {
                let (sub, top) = (sub.trim(), top.trim());
                if sub.is_empty() || top.is_empty() {
                    return Err(err());
                }
                Ok(Self {
                    role,
                    tier: AgencyTier::Subtier,
                    name: sub.to_string(),
                    toptier_name: Some(top.to_string()),
                })
            }
            None if rest.is_empty() => Err(err()),
            None => Ok(Self::toptier(role, rest)),
        }
    }

    /// Parse a list of specifiers; blank entries are ignored.
    pub fn parse_list<S: AsRef<str>>(
        inputs: &[S],
        default_role: AgencyRole,
    ) -> Result<Vec<Self>, AgencyParseError> {
        inputs
            .iter()
            .map(|s| s.as_ref())
            .filter(|s| !s.trim().is_empty())
            .map(|s| Self::parse(s, default_role))
            .collect()
    }

    /// Human-readable label, also used for output file names
    pub fn label(&self) -> String {
        match &self.toptier_name {
            Some(top) => format!("{}|{top}", self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for AgencyFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.role, self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn funding_prefix_toptier() {
        let a = AgencyFilter::parse("funding:Department of Defense", AgencyRole::Awarding).unwrap();
        assert_eq!(
            a,
            AgencyFilter {
                role: AgencyRole::Funding,
                tier: AgencyTier::Toptier,
                name: "Department of Defense".into(),
                toptier_name: None,
            }
        );
    }

    #[test]
    fn subtier_with_parent() {
        let a = AgencyFilter::parse(
            "Animal and Plant Health Inspection Service|Department of Agriculture",
            AgencyRole::Awarding,
        )
        .unwrap();
        assert_eq!(a.role, AgencyRole::Awarding);
        assert_eq!(a.tier, AgencyTier::Subtier);
        assert_eq!(a.name, "Animal and Plant Health Inspection Service");
        assert_eq!(a.toptier_name.as_deref(), Some("Department of Agriculture"));
    }

    #[test]
    fn default_role_applies_without_prefix() {
        let a = AgencyFilter::parse("Department of Energy", AgencyRole::Funding).unwrap();
        assert_eq!(a.role, AgencyRole::Funding);
        let b = AgencyFilter::parse("AWARDING: Department of Energy", AgencyRole::Funding).unwrap();
        assert_eq!(b.role, AgencyRole::Awarding);
        assert_eq!(b.name, "Department of Energy");
    }

    #[test]
    fn prefixed_subtier() {
        let a = AgencyFilter::parse(
            "funding: Forest Service | Department of Agriculture",
            AgencyRole::Awarding,
        )
        .unwrap();
        assert_eq!(a.role, AgencyRole::Funding);
        assert_eq!(a.name, "Forest Service");
        assert_eq!(a.toptier_name.as_deref(), Some("Department of Agriculture"));
    }

    #[test]
    fn empty_names_are_rejected() {
        assert!(AgencyFilter::parse("funding:", AgencyRole::Awarding).is_err());
        assert!(AgencyFilter::parse("|Department of Agriculture", AgencyRole::Awarding).is_err());
        assert!(AgencyFilter::parse("   ", AgencyRole::Awarding).is_err());
    }

    #[test]
    fn parse_list_skips_blanks() {
        let list = AgencyFilter::parse_list(&["", "NASA", "  "], AgencyRole::Awarding).unwrap();
        assert_eq!(list, vec![AgencyFilter::toptier(AgencyRole::Awarding, "NASA")]);
    }

    #[test]
    fn serializes_in_api_shape() {
        let top = AgencyFilter::toptier(AgencyRole::Funding, "Department of Defense");
        assert_eq!(
            serde_json::to_value(&top).unwrap(),
            json!({"type": "funding", "tier": "toptier", "name": "Department of Defense"})
        );
        let sub = AgencyFilter::parse("Forest Service|Department of Agriculture", AgencyRole::Awarding)
            .unwrap();
        assert_eq!(
            serde_json::to_value(&sub).unwrap(),
            json!({
                "type": "awarding",
                "tier": "subtier",
                "name": "Forest Service",
                "toptier_name": "Department of Agriculture"
            })
        );
    }
}
