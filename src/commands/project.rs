use anyhow::Result;

use crate::advisor::Advisor;
use crate::cli::ProjectArgs;
use crate::commands::{CommandSummary, open_session, write_summary_out};

pub fn run(args: ProjectArgs) -> Result<()> {
    let session = open_session(&args.run, true)?;
    let advisor = Advisor {
        platform: &session.platform,
        config: &session.config,
        backend: &session.backend,
        report: &session.report,
        addon_dir: args.run.addon_dir.as_deref(),
    };

    let outcome = advisor.run_project(&args.project_key)?;

    println!(
        "project {}: severity {}",
        outcome.project_key, outcome.severity
    );
    for check in &outcome.checks {
        println!(
            "  [{:<11}] {:<32} {} ({})",
            check.severity.name(),
            check.name,
            check.message,
            check.status
        );
    }

    write_summary_out(
        args.run.summary_out.as_deref(),
        &CommandSummary {
            severity: outcome.severity,
            projects: 1,
            metrics: outcome.metrics.len(),
            checks: outcome.checks.len(),
        },
    )
}
