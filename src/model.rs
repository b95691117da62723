//! Value types shared by the whole assessment engine: severities, run
//! statuses, metric values, platform versions and tag handling.

use anyhow::{Context, Result};
use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Group label used when a check carries no category tags.
pub const NO_TAGS_GROUP: &str = "NO TAGS";

/// Structured result payload accumulated by a run closure. Fields written
/// before a failure are preserved in the record.
pub type Details = serde_json::Map<String, Value>;

/// Ordered check severity. `NoSeverity` is the pre-run sentinel and sorts
/// below `Ok` so it can never mask a real result in a rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    NoSeverity,
    Ok,
    Lowest,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn level(self) -> i64 {
        match self {
            Self::NoSeverity => -1,
            Self::Ok => 0,
            Self::Lowest => 1,
            Self::Low => 2,
            Self::Medium => 3,
            Self::High => 4,
            Self::Critical => 5,
        }
    }

    pub fn from_level(level: i64) -> Option<Self> {
        match level {
            -1 => Some(Self::NoSeverity),
            0 => Some(Self::Ok),
            1 => Some(Self::Lowest),
            2 => Some(Self::Low),
            3 => Some(Self::Medium),
            4 => Some(Self::High),
            5 => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::NoSeverity => "NO_SEVERITY",
            Self::Ok => "OK",
            Self::Lowest => "LOWEST",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Run status of a single assessment. Within one run the status only moves
/// forward from `NotRun`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssessmentStatus {
    NotRun,
    RunSuccess,
    RunError,
    NotApplicable,
}

impl AssessmentStatus {
    pub fn name(self) -> &'static str {
        match self {
            Self::NotRun => "NOT_RUN",
            Self::RunSuccess => "RUN_SUCCESS",
            Self::RunError => "RUN_ERROR",
            Self::NotApplicable => "NOT_APPLICABLE",
        }
    }
}

impl std::fmt::Display for AssessmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricType {
    Int,
    Float,
    Boolean,
    List,
}

impl MetricType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Int => "INT",
            Self::Float => "FLOAT",
            Self::Boolean => "BOOLEAN",
            Self::List => "LIST",
        }
    }
}

/// Typed metric payload with a flat rendering for tabular records.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<String>),
}

impl MetricValue {
    pub fn metric_type(&self) -> MetricType {
        match self {
            Self::Int(_) => MetricType::Int,
            Self::Float(_) => MetricType::Float,
            Self::Bool(_) => MetricType::Boolean,
            Self::List(_) => MetricType::List,
        }
    }

    pub fn render(&self) -> String {
        match self {
            Self::Int(value) => value.to_string(),
            Self::Float(value) => value.to_string(),
            Self::Bool(value) => value.to_string(),
            Self::List(values) => values.join("|"),
        }
    }
}

/// Tagged error representation recorded by safe-run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: String,
    pub message: String,
}

/// Scope tag that parameterizes metric and check records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Project,
    Instance,
}

impl ScopeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Instance => "instance",
        }
    }
}

/// Version every unparsable platform version string is mapped to: treat
/// unknown builds as the newest supported release rather than refusing to
/// run anything.
pub fn fallback_platform_version() -> Version {
    Version::new(20, 0, 0)
}

/// Extract a leading `X.Y.Z` from a possibly-irregular platform version
/// string. Trailing qualifiers are ignored, and the `0.0.0` placeholder some
/// packaged environments report is mapped to the fallback as well.
pub fn parse_platform_version(raw: &str) -> Result<Version> {
    let pattern = Regex::new(r"^(\d+)\.(\d+)\.(\d+)")
        .context("failed to compile platform version regex")?;

    let version = match pattern.captures(raw.trim()) {
        Some(caps) => {
            let major = caps[1].parse::<u64>().unwrap_or(0);
            let minor = caps[2].parse::<u64>().unwrap_or(0);
            let patch = caps[3].parse::<u64>().unwrap_or(0);
            let parsed = Version::new(major, minor, patch);
            if parsed == Version::new(0, 0, 0) {
                fallback_platform_version()
            } else {
                parsed
            }
        }
        None => fallback_platform_version(),
    };
    Ok(version)
}

/// Inclusive platform version compatibility range; an absent bound is
/// open-ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionRange {
    pub min: Option<Version>,
    pub max: Option<Version>,
}

impl VersionRange {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn contains(&self, version: &Version) -> bool {
        let above_min = self.min.as_ref().is_none_or(|min| version >= min);
        let below_max = self.max.as_ref().is_none_or(|max| version <= max);
        above_min && below_max
    }
}

/// One metric instantiated for a scope, carrying its run state. Construction
/// happens through the registry; execution through the engine.
#[derive(Debug, Clone, Serialize)]
pub struct Metric {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub scope: ScopeKind,
    pub uses_llm: bool,
    pub uses_plugin_usage: bool,
    pub uses_filesystem: bool,
    pub unit: Option<String>,
    pub status: AssessmentStatus,
    pub runtime_secs: f64,
    pub value: Option<MetricValue>,
    pub details: Details,
    pub failure: Option<RunFailure>,
}

/// One check instantiated for a scope. `parameters` is the per-check config
/// object captured at construction; `severity` stays `NoSeverity` until a
/// successful evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct Check {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub scope: ScopeKind,
    pub uses_llm: bool,
    pub uses_plugin_usage: bool,
    pub uses_filesystem: bool,
    pub parameters: Value,
    pub status: AssessmentStatus,
    pub runtime_secs: f64,
    pub severity: Severity,
    pub message: String,
    pub details: Details,
    pub failure: Option<RunFailure>,
}

/// Join category tags for persistence in a single tabular cell.
pub fn join_tags(tags: &[String]) -> String {
    tags.join("|")
}

/// Split a persisted tag cell back into the tag list, bucketing untagged
/// records under the `NO TAGS` sentinel group.
pub fn split_tags(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return vec![NO_TAGS_GROUP.to_string()];
    }
    raw.split('|').map(|tag| tag.to_string()).collect()
}
