use anyhow::Result;
use chrono::Utc;

use crate::advisor::{Advisor, ProjectFilters};
use crate::backend::TableSelection;
use crate::cli::BatchArgs;
use crate::commands::{CommandSummary, open_session, write_summary_out};

pub fn run(args: BatchArgs) -> Result<()> {
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
    let filters = ProjectFilters {
        project_keys: args.project_keys,
        project_statuses: args.project_statuses,
        tags: args.tags,
        folder_path: args.folder_path,
    };

    let batch = advisor.run_batch(&filters)?;

    println!(
        "batch of {} project(s): severity {}",
        batch.projects.len(),
        batch.severity
    );
    for member in &batch.projects {
        println!("  {:<24} {}", member.project_key, member.severity);
    }

    let metrics = batch.projects.iter().map(|run| run.metrics.len()).sum();
    let checks = batch.projects.iter().map(|run| run.checks.len()).sum();
    write_summary_out(
        args.run.summary_out.as_deref(),
        &CommandSummary {
            severity: batch.severity,
            projects: batch.projects.len(),
            metrics,
            checks,
        },
    )
}
