use anyhow::Result;
use serde_json::json;

use crate::cli::HistoryArgs;
use crate::report::ReportStore;
use crate::severity::{severity_series, tag_breakdown};
use crate::store::FolderStore;

pub fn run(args: HistoryArgs) -> Result<()> {
    let report = ReportStore::new(FolderStore::new(args.report_root.clone()));
    let scope = args.scope.to_scope();
    let records = report.load_recent_checks(scope, args.last)?;

    let series = severity_series(&records);
    let tags = tag_breakdown(
        records
            .iter()
            .map(|record| (record.tags.as_slice(), record.severity)),
    );

    if args.json {
        let payload = json!({
            "scope": scope.as_str(),
            "snapshots": series
                .iter()
                .map(|(timestamp, severity)| json!({
                    "timestamp": timestamp.format("%Y-%m-%dT%H:%M:%S").to_string(),
                    "severity": severity.name(),
                }))
                .collect::<Vec<_>>(),
            "tags": tags
                .iter()
                .map(|(tag, rollup)| {
                    let counts: serde_json::Map<String, serde_json::Value> = rollup
                        .counts
                        .iter()
                        .map(|(severity, count)| (severity.name().to_string(), json!(count)))
                        .collect();
                    (tag.clone(), json!({"max": rollup.max.name(), "counts": counts}))
                })
                .collect::<serde_json::Map<String, serde_json::Value>>(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    if series.is_empty() {
        println!("no report snapshots under the {} scope", scope.as_str());
        return Ok(());
    }

    println!("severity over the last {} snapshot(s):", series.len());
    for (timestamp, severity) in &series {
        println!("  {timestamp}  {severity}");
    }
    println!("per-tag severity:");
    for (tag, rollup) in &tags {
        let total: usize = rollup.counts.values().sum();
        println!("  {:<24} {:<11} ({} check(s))", tag, rollup.max.name(), total);
    }
    Ok(())
}
