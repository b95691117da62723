use anyhow::Result;
use chrono::Utc;

use crate::advisor::Advisor;
use crate::backend::TableSelection;
use crate::cli::InstanceArgs;
use crate::commands::{CommandSummary, open_session, write_summary_out};
use crate::severity::tag_breakdown_of_checks;

pub fn run(args: InstanceArgs) -> Result<()> {
    let mut session = open_session(&args.run, !args.rebuild_backend)?;
    if args.rebuild_backend {
        session.backend.build(&session.platform, &TableSelection::All);
        session.backend.save(Utc::now(), &TableSelection::All);
    }

    let advisor = Advisor {
        platform: &session.platform,
        config: &session.config,
        backend: &session.backend,
        report: &session.report,
        addon_dir: args.run.addon_dir.as_deref(),
    };

    let outcome = advisor.run_instance()?;

    println!(
        "instance severity {} (batch of {} project(s): {})",
        outcome.severity,
        outcome.batch.projects.len(),
        outcome.batch.severity
    );
    for (tag, rollup) in tag_breakdown_of_checks(&outcome.checks) {
        println!("  {:<24} {}", tag, rollup.max);
    }

    let metrics = outcome.metrics.len()
        + outcome
            .batch
            .projects
            .iter()
            .map(|run| run.metrics.len())
            .sum::<usize>();
    let checks = outcome.checks.len()
        + outcome
            .batch
            .projects
            .iter()
            .map(|run| run.checks.len())
            .sum::<usize>();
    write_summary_out(
        args.run.summary_out.as_deref(),
        &CommandSummary {
            severity: outcome.severity,
            projects: outcome.batch.projects.len(),
            metrics,
            checks,
        },
    )
}
