// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Records stored in the STIGQter database and the naming rules that
//! connect them (control names, CCI numbers, display forms).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Result, StigqterError};

/// CCI that broken STIG mappings are remapped to ("The organization
/// implements the security configuration settings").
pub const FALLBACK_CCI: i64 = 366;

/// A NIST 800-53 control family (AC, AU, ...)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Family {
    pub id: i64,
    pub acronym: String,
    pub description: String,
}

/// A NIST 800-53 control or control enhancement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    pub id: i64,
    pub family_id: i64,
    pub number: i64,
    pub enhancement: Option<i64>,
    pub title: String,
    pub description: String,
}

/// A Control Correlation Identifier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cci {
    pub id: i64,
    pub control_id: Option<i64>,
    pub cci: i64,
    pub definition: String,
    /// Set when the last eMASS Test Result Import carried this CCI
    pub is_import: bool,
    pub import_compliance: String,
    pub import_date_tested: String,
    pub import_tested_by: String,
    pub import_test_results: String,
}

/// A STIG benchmark
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stig {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub release: String,
    pub version: i64,
    pub benchmark_id: String,
    pub file_name: String,
}

/// A single rule of a STIG
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StigCheck {
    pub id: i64,
    pub stig_id: i64,
    pub cci_id: i64,
    pub rule: String,
    pub vuln_num: String,
    pub group_title: String,
    pub rule_version: String,
    pub severity: Severity,
    pub weight: f64,
    pub title: String,
    pub vuln_discussion: String,
    pub false_positives: String,
    pub false_negatives: String,
    pub fix: String,
    pub check: String,
    pub documentable: bool,
    pub mitigations: String,
    pub severity_override_guidance: String,
    pub check_content_ref: String,
    pub potential_impact: String,
    pub third_party_tools: String,
    pub mitigation_control: String,
    pub responsibility: String,
    pub ia_controls: String,
    pub target_key: String,
    /// CCI number the benchmark named when it was missing from the
    /// catalog and the check was parked on [`FALLBACK_CCI`]
    pub intended_cci: Option<i64>,
}

/// A computing asset that STIGs are evaluated against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: i64,
    pub asset_type: String,
    pub host_name: String,
    pub host_ip: String,
    pub host_mac: String,
    pub host_fqdn: String,
    pub tech_area: String,
    pub target_key: String,
    pub web_or_database: bool,
    pub web_db_site: String,
    pub web_db_instance: String,
}

impl Default for Asset {
    fn default() -> Self {
        Self {
            id: 0,
            asset_type: "Computing".to_string(),
            host_name: String::new(),
            host_ip: String::new(),
            host_mac: String::new(),
            host_fqdn: String::new(),
            tech_area: String::new(),
            target_key: String::new(),
            web_or_database: false,
            web_db_site: String::new(),
            web_db_instance: String::new(),
        }
    }
}

impl Asset {
    /// New, unsaved asset with the given host name
    pub fn named(host_name: &str) -> Self {
        Self {
            host_name: host_name.trim().to_string(),
            ..Self::default()
        }
    }
}

/// The evaluation of one STIG check on one asset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CklCheck {
    pub id: i64,
    pub asset_id: i64,
    pub stig_check_id: i64,
    pub status: Status,
    pub finding_details: String,
    pub comments: String,
    pub severity_override: Severity,
    pub severity_justification: String,
}

/// Checklist status of a CKL check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    #[default]
    NotReviewed,
    Open,
    NotAFinding,
    NotApplicable,
}

impl Status {
    pub fn as_i64(self) -> i64 {
        match self {
            Status::NotReviewed => 0,
            Status::Open => 1,
            Status::NotAFinding => 2,
            Status::NotApplicable => 3,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => Status::Open,
            2 => Status::NotAFinding,
            3 => Status::NotApplicable,
            _ => Status::NotReviewed,
        }
    }

    /// The STATUS value written into CKL files
    pub fn ckl_str(self) -> &'static str {
        match self {
            Status::NotReviewed => "Not_Reviewed",
            Status::Open => "Open",
            Status::NotAFinding => "NotAFinding",
            Status::NotApplicable => "Not_Applicable",
        }
    }

    /// Lenient parse of CKL and human-entered status strings.
    /// Anything unrecognised is treated as not reviewed.
    pub fn parse(value: &str) -> Self {
        let normalized: String = value
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "open" | "finding" => Status::Open,
            "notafinding" | "naf" | "closed" => Status::NotAFinding,
            "notapplicable" | "na" => Status::NotApplicable,
            _ => Status::NotReviewed,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::NotReviewed => "Not Reviewed",
            Status::Open => "Open",
            Status::NotAFinding => "Not a Finding",
            Status::NotApplicable => "Not Applicable",
        };
        f.write_str(s)
    }
}

/// Severity of a STIG check (or of a checklist override)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_i64(self) -> i64 {
        match self {
            Severity::None => 0,
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => Severity::Low,
            2 => Severity::Medium,
            3 => Severity::High,
            _ => Severity::None,
        }
    }

    /// XCCDF / CKL severity string; empty for no severity
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::None => "",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    /// DoD category form (CAT I is high)
    pub fn category(self) -> &'static str {
        match self {
            Severity::None => "",
            Severity::Low => "CAT III",
            Severity::Medium => "CAT II",
            Severity::High => "CAT I",
        }
    }

    /// Parses `low|medium|high` as well as `CAT I|II|III`
    pub fn parse(value: &str) -> Self {
        let v = value.trim().to_lowercase();
        match v.as_str() {
            "high" | "cat i" | "cat 1" | "i" => Severity::High,
            "medium" | "cat ii" | "cat 2" | "ii" => Severity::Medium,
            "low" | "cat iii" | "cat 3" | "iii" => Severity::Low,
            _ => Severity::None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.category())
    }
}

/// Parsed form of a human-readable control name such as `AC-2 (1)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRef {
    pub family: String,
    pub number: i64,
    pub enhancement: Option<i64>,
}

impl ControlRef {
    /// Parse `FAMILY-NUMBER (ENHANCEMENT)`.
    ///
    /// Anything after a second space is discarded, so `AC-2 (1) (a)`
    /// resolves to `AC-2 (1)`. A parenthesised suffix that is not a
    /// positive integer is dropped rather than rejected.
    pub fn parse(name: &str) -> Result<Self> {
        let mut control = name.trim();
        if control.chars().count() < 4 {
            return Err(StigqterError::InvalidControl(format!("\"{}\"", name)));
        }

        if let Some(first) = control.find(' ') {
            if let Some(second) = control[first + 1..].find(' ') {
                control = control[..first + 1 + second].trim();
            }
        }

        let family: String = control.chars().take(2).collect();
        let rest: String = control.chars().skip(3).collect();

        let (number_part, enhancement) = match rest.find('(') {
            Some(open) => {
                let inner = rest[open + 1..].trim_end_matches(')').trim();
                let enhancement = inner.parse::<i64>().ok().filter(|e| *e > 0);
                (rest[..open].trim().to_string(), enhancement)
            }
            None => (rest.trim().to_string(), None),
        };

        let number = number_part
            .parse::<i64>()
            .map_err(|_| StigqterError::InvalidControl(format!("\"{}\"", name)))?;

        Ok(Self {
            family: family.to_uppercase(),
            number,
            enhancement,
        })
    }
}

impl fmt::Display for ControlRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.enhancement {
            Some(e) => write!(f, "{}-{} ({})", self.family, self.number, e),
            None => write!(f, "{}-{}", self.family, self.number),
        }
    }
}

/// Derive the control name from an 800-53 reference index in the DISA
/// CCI list.
///
/// `AC-2 (1)` keeps its enhancement, `AC-17.2` and `AC-2 a` are cut back
/// to the base control, and a parenthesis that only appears after a
/// second space (`AC-2 a 1 (b)`) is a sub-item, not an enhancement.
pub fn control_from_cci_index(index: &str) -> String {
    let index = index.trim();
    let mut control = index.to_string();
    if let Some(space) = control.find(' ') {
        control.truncate(space);
    }
    if let Some(dot) = control.find('.') {
        control.truncate(dot);
    }

    if let Some(open) = index.find('(') {
        let second_space = index
            .find(' ')
            .and_then(|first| index[first + 1..].find(' ').map(|s| first + 1 + s));
        if second_space.map_or(true, |s| open < s) {
            if let Some(close) = index[open..].find(')') {
                control.push_str(&index[open..open + close + 1]);
            }
        }
    }

    control
}

/// `CCI-000366` → 366. Only the trailing six digits are significant.
pub fn cci_number(value: &str) -> Option<i64> {
    let digits: String = value.trim().chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let start = digits.len().saturating_sub(6);
    digits[start..].parse().ok()
}

/// `366` → `CCI-000366`
pub fn format_cci(number: i64) -> String {
    format!("CCI-{:06}", number)
}

/// Collapse runs of whitespace into single spaces
pub fn sanitize(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl fmt::Display for Cci {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_cci(self.cci))
    }
}

impl fmt::Display for Stig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Version: {} {}", self.title, self.version, self.release)
    }
}

impl fmt::Display for StigCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rule)
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.host_name)
    }
}
