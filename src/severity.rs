//! Severity aggregation: rollups over live check collections and over
//! reloaded report snapshots.
//!
//! Aggregation is order-independent, so parallel and sequential runs roll
//! up identically.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use crate::model::{Check, NO_TAGS_GROUP, Severity};
use crate::report::CheckRecord;

/// Maximum severity of a collection; `Ok` when the collection is empty.
pub fn max_severity<I>(severities: I) -> Severity
where
    I: IntoIterator<Item = Severity>,
{
    severities.into_iter().max().unwrap_or(Severity::Ok)
}

pub fn checks_severity(checks: &[Check]) -> Severity {
    max_severity(checks.iter().map(|check| check.severity))
}

/// Per-tag rollup: maximum severity plus a full per-level histogram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSeverity {
    pub max: Severity,
    pub counts: BTreeMap<Severity, usize>,
}

impl TagSeverity {
    fn observe(&mut self, severity: Severity) {
        self.max = self.max.max(severity);
        *self.counts.entry(severity).or_insert(0) += 1;
    }
}

impl Default for TagSeverity {
    fn default() -> Self {
        Self {
            max: Severity::NoSeverity,
            counts: BTreeMap::new(),
        }
    }
}

/// A check with N tags feeds N groups; untagged checks feed the `NO TAGS`
/// group. `NoSeverity` is counted in the histogram but sorts below `Ok`,
/// so an unrun check never masks a real result.
pub fn tag_breakdown<'a, I>(checks: I) -> BTreeMap<String, TagSeverity>
where
    I: IntoIterator<Item = (&'a [String], Severity)>,
{
    let mut groups: BTreeMap<String, TagSeverity> = BTreeMap::new();
    for (tags, severity) in checks {
        if tags.is_empty() {
            groups
                .entry(NO_TAGS_GROUP.to_string())
                .or_default()
                .observe(severity);
        } else {
            for tag in tags {
                groups.entry(tag.clone()).or_default().observe(severity);
            }
        }
    }
    groups
}

pub fn tag_breakdown_of_checks(checks: &[Check]) -> BTreeMap<String, TagSeverity> {
    tag_breakdown(
        checks
            .iter()
            .map(|check| (check.tags.as_slice(), check.severity)),
    )
}

/// Maximum severity per snapshot timestamp, in chronological order.
/// Consumed by the history command for trend analysis.
pub fn severity_series(records: &[CheckRecord]) -> Vec<(NaiveDateTime, Severity)> {
    let mut by_timestamp: BTreeMap<NaiveDateTime, Severity> = BTreeMap::new();
    for record in records {
        let entry = by_timestamp
            .entry(record.timestamp)
            .or_insert(Severity::Ok);
        *entry = (*entry).max(record.severity);
    }
    by_timestamp.into_iter().collect()
}

/// Per-project severity series, keyed by record identifier.
pub fn project_severity_series(
    records: &[CheckRecord],
) -> BTreeMap<String, Vec<(NaiveDateTime, Severity)>> {
    let mut by_project: BTreeMap<String, BTreeMap<NaiveDateTime, Severity>> = BTreeMap::new();
    for record in records {
        let series = by_project.entry(record.project_id.clone()).or_default();
        let entry = series.entry(record.timestamp).or_insert(Severity::Ok);
        *entry = (*entry).max(record.severity);
    }
    by_project
        .into_iter()
        .map(|(project, series)| (project, series.into_iter().collect()))
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::Value;

    use super::*;
    use crate::model::AssessmentStatus;

    fn record(ts_day: u32, project: &str, severity: Severity) -> CheckRecord {
        CheckRecord {
            timestamp: NaiveDate::from_ymd_opt(2024, 1, ts_day)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            project_id: project.to_string(),
            tags: Vec::new(),
            name: "check".to_string(),
            severity,
            message: String::new(),
            check_params: Value::Null,
            status: AssessmentStatus::RunSuccess,
            result_data: Value::Null,
        }
    }

    #[test]
    fn empty_rollup_is_ok() {
        assert_eq!(max_severity(Vec::new()), Severity::Ok);
    }

    #[test]
    fn rollup_is_monotone_in_members() {
        let base = vec![Severity::Ok, Severity::Low];
        let with_high = vec![Severity::Ok, Severity::Low, Severity::High];
        assert!(max_severity(with_high) >= max_severity(base));
        assert_eq!(
            max_severity(vec![Severity::NoSeverity, Severity::Ok]),
            Severity::Ok
        );
    }

    #[test]
    fn tag_breakdown_buckets_untagged_and_counts_levels() {
        let docs = vec!["DOCUMENTATION".to_string(), "FLOW".to_string()];
        let empty: Vec<String> = Vec::new();
        let rows: Vec<(&[String], Severity)> = vec![
            (docs.as_slice(), Severity::High),
            (docs.as_slice(), Severity::Ok),
            (empty.as_slice(), Severity::NoSeverity),
        ];
        let groups = tag_breakdown(rows);

        assert_eq!(groups["DOCUMENTATION"].max, Severity::High);
        assert_eq!(groups["FLOW"].max, Severity::High);
        assert_eq!(groups["DOCUMENTATION"].counts[&Severity::Ok], 1);
        assert_eq!(groups[NO_TAGS_GROUP].max, Severity::NoSeverity);
        assert_eq!(groups[NO_TAGS_GROUP].counts[&Severity::NoSeverity], 1);
    }

    #[test]
    fn series_takes_the_max_per_snapshot() {
        let records = vec![
            record(1, "A", Severity::Low),
            record(1, "B", Severity::Critical),
            record(2, "A", Severity::Ok),
        ];
        let series = severity_series(&records);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].1, Severity::Critical);
        assert_eq!(series[1].1, Severity::Ok);

        let per_project = project_severity_series(&records);
        assert_eq!(per_project["A"].len(), 2);
        assert_eq!(per_project["A"][0].1, Severity::Low);
        assert_eq!(per_project["B"][0].1, Severity::Critical);
    }
}
