//! Report store: flattened check and metric records persisted as timestamped
//! CSV snapshots, and best-effort reload of recent snapshots for trend
//! analysis.
//!
//! Snapshot layout: `{checks|metrics}/{project|instance}/<timestamp>.csv`.
//! Snapshots are immutable; "most recent" is lexicographic filename order.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::model::{
    AssessmentStatus, Check, Details, Metric, RunFailure, ScopeKind, Severity, join_tags,
    split_tags,
};
use crate::store::{DataTable, FolderStore};
use crate::util::format_run_timestamp;

const CHECK_COLUMNS: [&str; 9] = [
    "timestamp",
    "project_id",
    "tags",
    "name",
    "severity",
    "message",
    "check_params",
    "status",
    "result_data",
];

const METRIC_COLUMNS: [&str; 8] = [
    "timestamp",
    "project_id",
    "tags",
    "name",
    "value",
    "metric_type",
    "status",
    "result_data",
];

/// One reloaded check row, restricted on load to successful runs.
#[derive(Debug, Clone)]
pub struct CheckRecord {
    pub timestamp: NaiveDateTime,
    pub project_id: String,
    pub tags: Vec<String>,
    pub name: String,
    pub severity: Severity,
    pub message: String,
    pub check_params: Value,
    pub status: AssessmentStatus,
    pub result_data: Value,
}

#[derive(Debug, Clone)]
pub struct MetricRecord {
    pub timestamp: NaiveDateTime,
    pub project_id: String,
    pub tags: Vec<String>,
    pub name: String,
    pub value: String,
    pub metric_type: String,
    pub result_data: Value,
}

pub struct ReportStore {
    store: FolderStore,
}

impl ReportStore {
    pub fn new(store: FolderStore) -> Self {
        Self { store }
    }

    /// Persist one check snapshot; returns the relative blob path.
    pub fn persist_checks(
        &self,
        scope: ScopeKind,
        timestamp: DateTime<Utc>,
        checks: &[(&str, &Check)],
    ) -> Result<String> {
        let version = format_run_timestamp(timestamp);
        let mut table = DataTable::new(CHECK_COLUMNS.to_vec());
        for (project_id, check) in checks {
            table.push_row(vec![
                version.clone(),
                (*project_id).to_string(),
                join_tags(&check.tags),
                check.name.clone(),
                check.severity.level().to_string(),
                check.message.clone(),
                check.parameters.to_string(),
                check.status.name().to_string(),
                result_data(&check.details, check.runtime_secs, check.failure.as_ref()),
            ]);
        }
        let path = format!("checks/{}/{version}.csv", scope.as_str());
        self.store.write(&path, table.to_csv().as_bytes())?;
        debug!(path = %path, rows = table.len(), "check snapshot persisted");
        Ok(path)
    }

    pub fn persist_metrics(
        &self,
        scope: ScopeKind,
        timestamp: DateTime<Utc>,
        metrics: &[(&str, &Metric)],
    ) -> Result<String> {
        let version = format_run_timestamp(timestamp);
        let mut table = DataTable::new(METRIC_COLUMNS.to_vec());
        for (project_id, metric) in metrics {
            let (value, metric_type) = match &metric.value {
                Some(value) => (value.render(), value.metric_type().name().to_string()),
                None => (String::new(), String::new()),
            };
            table.push_row(vec![
                version.clone(),
                (*project_id).to_string(),
                join_tags(&metric.tags),
                metric.name.clone(),
                value,
                metric_type,
                metric.status.name().to_string(),
                result_data(&metric.details, metric.runtime_secs, metric.failure.as_ref()),
            ]);
        }
        let path = format!("metrics/{}/{version}.csv", scope.as_str());
        self.store.write(&path, table.to_csv().as_bytes())?;
        debug!(path = %path, rows = table.len(), "metric snapshot persisted");
        Ok(path)
    }

    /// Write the JSON run summary next to the snapshots it describes.
    pub fn persist_summary<T: serde::Serialize>(
        &self,
        scope: ScopeKind,
        timestamp: DateTime<Utc>,
        summary: &T,
    ) -> Result<String> {
        let version = format_run_timestamp(timestamp);
        let path = format!("summaries/{}/{version}.json", scope.as_str());
        let data =
            serde_json::to_vec_pretty(summary).context("failed to serialize run summary")?;
        self.store.write(&path, &data)?;
        debug!(path = %path, "run summary persisted");
        Ok(path)
    }

    /// Union of the `n` most recent check snapshots for the scope, filtered
    /// to successful runs. Empty or unreadable snapshots are skipped with a
    /// warning.
    pub fn load_recent_checks(&self, scope: ScopeKind, n: usize) -> Result<Vec<CheckRecord>> {
        let mut records = Vec::new();
        for (path, table) in self.recent_tables("checks", scope, n)? {
            for row in 0..table.len() {
                match parse_check_row(&table, row) {
                    Ok(Some(record)) => records.push(record),
                    Ok(None) => {}
                    Err(err) => {
                        warn!(path = %path, row, error = %err, "skipping unreadable check record");
                    }
                }
            }
        }
        Ok(records)
    }

    pub fn load_recent_metrics(&self, scope: ScopeKind, n: usize) -> Result<Vec<MetricRecord>> {
        let mut records = Vec::new();
        for (path, table) in self.recent_tables("metrics", scope, n)? {
            for row in 0..table.len() {
                match parse_metric_row(&table, row) {
                    Ok(Some(record)) => records.push(record),
                    Ok(None) => {}
                    Err(err) => {
                        warn!(path = %path, row, error = %err, "skipping unreadable metric record");
                    }
                }
            }
        }
        Ok(records)
    }

    /// The `n` newest loadable snapshots under the prefix, in chronological
    /// order. A skipped snapshot does not count against `n`.
    fn recent_tables(
        &self,
        kind: &str,
        scope: ScopeKind,
        n: usize,
    ) -> Result<Vec<(String, DataTable)>> {
        let prefix = format!("{kind}/{}/", scope.as_str());
        let paths = self.store.list_paths(&prefix)?;

        let mut tables = Vec::new();
        for path in paths.iter().rev() {
            if tables.len() == n {
                break;
            }
            let loaded = self
                .store
                .read_to_string(path)
                .and_then(|raw| DataTable::from_csv(&raw));
            match loaded {
                Ok(table) if table.is_empty() => {
                    warn!(path = %path, "skipping empty report snapshot");
                }
                Ok(table) => tables.push((path.clone(), table)),
                Err(err) => {
                    warn!(path = %path, error = %format!("{err:#}"), "skipping unreadable report snapshot");
                }
            }
        }
        tables.reverse();
        Ok(tables)
    }
}

/// Detail fields plus the run metadata the flat row would otherwise lose:
/// the wall-clock runtime and, on errors, the tagged failure.
fn result_data(details: &Details, runtime_secs: f64, failure: Option<&RunFailure>) -> String {
    let mut data = details.clone();
    data.insert("runtime_secs".to_string(), Value::from(runtime_secs));
    if let Some(failure) = failure {
        data.insert(
            "failure".to_string(),
            serde_json::json!({"kind": failure.kind, "message": failure.message}),
        );
    }
    Value::Object(data).to_string()
}

fn cell<'a>(table: &'a DataTable, row: usize, column: &str) -> Result<&'a str> {
    table
        .value(row, column)
        .with_context(|| format!("missing column {column}"))
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .with_context(|| format!("invalid snapshot timestamp: {raw}"))
}

fn parse_json_cell(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or(Value::Null)
}

/// `Ok(None)` means a well-formed row that load filters out (not a
/// successful run).
fn parse_check_row(table: &DataTable, row: usize) -> Result<Option<CheckRecord>> {
    let status = cell(table, row, "status")?;
    if status != AssessmentStatus::RunSuccess.name() {
        return Ok(None);
    }
    let level = cell(table, row, "severity")?
        .parse::<i64>()
        .context("severity level is not an integer")?;
    let severity =
        Severity::from_level(level).with_context(|| format!("unknown severity level: {level}"))?;
    Ok(Some(CheckRecord {
        timestamp: parse_timestamp(cell(table, row, "timestamp")?)?,
        project_id: cell(table, row, "project_id")?.to_string(),
        tags: split_tags(cell(table, row, "tags")?),
        name: cell(table, row, "name")?.to_string(),
        severity,
        message: cell(table, row, "message")?.to_string(),
        check_params: parse_json_cell(cell(table, row, "check_params")?),
        status: AssessmentStatus::RunSuccess,
        result_data: parse_json_cell(cell(table, row, "result_data")?),
    }))
}

fn parse_metric_row(table: &DataTable, row: usize) -> Result<Option<MetricRecord>> {
    let status = cell(table, row, "status")?;
    if status != AssessmentStatus::RunSuccess.name() {
        return Ok(None);
    }
    Ok(Some(MetricRecord {
        timestamp: parse_timestamp(cell(table, row, "timestamp")?)?,
        project_id: cell(table, row, "project_id")?.to_string(),
        tags: split_tags(cell(table, row, "tags")?),
        name: cell(table, row, "name")?.to_string(),
        value: cell(table, row, "value")?.to_string(),
        metric_type: cell(table, row, "metric_type")?.to_string(),
        result_data: parse_json_cell(cell(table, row, "result_data")?),
    }))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::model::{NO_TAGS_GROUP, VersionRange};

    fn check(name: &str, tags: Vec<String>, severity: Severity, status: AssessmentStatus) -> Check {
        Check {
            name: name.to_string(),
            description: String::new(),
            tags,
            scope: ScopeKind::Project,
            uses_llm: false,
            uses_plugin_usage: false,
            uses_filesystem: false,
            parameters: json!({"threshold": 3}),
            status,
            runtime_secs: 0.1,
            severity,
            message: "checked".to_string(),
            details: Details::new(),
            failure: None,
        }
    }

    #[test]
    fn persisted_checks_reload_filtered_to_successes() {
        let dir = tempfile::tempdir().unwrap();
        let report = ReportStore::new(FolderStore::new(dir.path()));
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        let ok = check(
            "description_check",
            vec!["DOCUMENTATION".to_string()],
            Severity::High,
            AssessmentStatus::RunSuccess,
        );
        let failed = check(
            "broken_check",
            Vec::new(),
            Severity::NoSeverity,
            AssessmentStatus::RunError,
        );
        report
            .persist_checks(
                ScopeKind::Project,
                ts,
                &[("SALES", &ok), ("SALES", &failed)],
            )
            .unwrap();

        let records = report.load_recent_checks(ScopeKind::Project, 5).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "description_check");
        assert_eq!(records[0].severity, Severity::High);
        assert_eq!(records[0].tags, vec!["DOCUMENTATION"]);
        assert_eq!(records[0].check_params["threshold"], 3);
        assert_eq!(
            records[0].timestamp,
            NaiveDateTime::parse_from_str("2024-03-01T12:00:00", "%Y-%m-%dT%H:%M:%S").unwrap()
        );
    }

    #[test]
    fn untagged_records_reload_into_the_sentinel_group() {
        let dir = tempfile::tempdir().unwrap();
        let report = ReportStore::new(FolderStore::new(dir.path()));
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let untagged = check(
            "untagged_check",
            Vec::new(),
            Severity::Ok,
            AssessmentStatus::RunSuccess,
        );
        report
            .persist_checks(ScopeKind::Instance, ts, &[("INSTANCE", &untagged)])
            .unwrap();

        let records = report.load_recent_checks(ScopeKind::Instance, 1).unwrap();
        assert_eq!(records[0].tags, vec![NO_TAGS_GROUP.to_string()]);
    }

    #[test]
    fn load_recent_takes_only_the_newest_snapshots_and_skips_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = FolderStore::new(dir.path());
        let report = ReportStore::new(FolderStore::new(dir.path()));

        for day in 1..=3 {
            let ts = Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap();
            let row = check(
                &format!("check_day_{day}"),
                Vec::new(),
                Severity::Low,
                AssessmentStatus::RunSuccess,
            );
            report
                .persist_checks(ScopeKind::Project, ts, &[("SALES", &row)])
                .unwrap();
        }
        store
            .write("checks/project/2024-03-04T00:00:00.csv", b"")
            .unwrap();

        let records = report.load_recent_checks(ScopeKind::Project, 2).unwrap();
        let names: Vec<&str> = records.iter().map(|record| record.name.as_str()).collect();
        assert_eq!(names, vec!["check_day_2", "check_day_3"]);
    }

    #[test]
    fn error_records_keep_their_failure_payload() {
        let dir = tempfile::tempdir().unwrap();
        let report = ReportStore::new(FolderStore::new(dir.path()));
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        let mut failed = check(
            "broken_check",
            Vec::new(),
            Severity::NoSeverity,
            AssessmentStatus::RunError,
        );
        failed.runtime_secs = 1.25;
        failed.failure = Some(RunFailure {
            kind: "IoError".to_string(),
            message: "backend exploded".to_string(),
        });
        let path = report
            .persist_checks(ScopeKind::Project, ts, &[("SALES", &failed)])
            .unwrap();

        let raw = FolderStore::new(dir.path()).read_to_string(&path).unwrap();
        let table = DataTable::from_csv(&raw).unwrap();
        let data: Value = serde_json::from_str(table.value(0, "result_data").unwrap()).unwrap();
        assert_eq!(data["failure"]["kind"], "IoError");
        assert_eq!(data["failure"]["message"], "backend exploded");
        assert_eq!(data["runtime_secs"], 1.25);
    }

    #[test]
    fn metric_snapshots_round_trip_values() {
        let dir = tempfile::tempdir().unwrap();
        let report = ReportStore::new(FolderStore::new(dir.path()));
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        let mut metric = crate::registry::MetricDef {
            name: "nbr_of_datasets".to_string(),
            description: String::new(),
            tags: vec!["FLOW".to_string()],
            scope: ScopeKind::Project,
            version_range: VersionRange::any(),
            uses_llm: false,
            uses_plugin_usage: false,
            uses_filesystem: false,
            unit: None,
            run: std::sync::Arc::new(|_, _, _| {
                Ok(crate::registry::MetricVerdict::NotApplicable {
                    reason: "unused".to_string(),
                })
            }),
        }
        .instantiate();
        metric.status = AssessmentStatus::RunSuccess;
        metric.value = Some(crate::model::MetricValue::Int(12));

        report
            .persist_metrics(ScopeKind::Project, ts, &[("SALES", &metric)])
            .unwrap();
        let records = report.load_recent_metrics(ScopeKind::Project, 1).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, "12");
        assert_eq!(records[0].metric_type, "INT");
    }
}
