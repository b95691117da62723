pub mod backend;
pub mod batch;
pub mod history;
pub mod instance;
pub mod project;

use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use crate::backend::{BackendClient, TableSelection};
use crate::cli::RunArgs;
use crate::config::{AdvisorConfig, build_config};
use crate::model::Severity;
use crate::platform::SnapshotPlatform;
use crate::report::ReportStore;
use crate::store::FolderStore;
use crate::util::write_json_pretty;

/// Collaborators shared by every assessment-running command.
pub(crate) struct Session {
    pub platform: SnapshotPlatform,
    pub config: AdvisorConfig,
    pub backend: BackendClient,
    pub report: ReportStore,
}

pub(crate) fn open_session(run: &RunArgs, load_backend: bool) -> Result<Session> {
    let config = build_config(run)?;
    let platform = SnapshotPlatform::load(&run.snapshot)?;
    let mut backend = BackendClient::new(FolderStore::new(run.backend_root.clone()));
    if load_backend {
        backend.load_latest(&TableSelection::All);
    }
    let report = ReportStore::new(FolderStore::new(run.report_root.clone()));
    Ok(Session {
        platform,
        config,
        backend,
        report,
    })
}

#[derive(Serialize)]
pub(crate) struct CommandSummary {
    pub severity: Severity,
    pub projects: usize,
    pub metrics: usize,
    pub checks: usize,
}

pub(crate) fn write_summary_out(path: Option<&Path>, summary: &CommandSummary) -> Result<()> {
    if let Some(path) = path {
        write_json_pretty(path, summary)?;
        info!(path = %path.display(), "command summary written");
    }
    Ok(())
}
