//! Orchestrators: one project, a filtered batch of projects, or the whole
//! instance. Each entry point discovers and filters the registry once,
//! runs metrics before checks, rolls severities up and persists a report
//! snapshot plus a JSON run summary.
//!
//! Persistence is best effort (a failing snapshot write is logged and the
//! run still returns its in-memory result); only configuration errors abort
//! a run before it starts.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::backend::BackendClient;
use crate::config::{AdvisorConfig, RunConfig};
use crate::engine::{for_each_parallel, run_checks, run_metrics};
use crate::filter::{FilterContext, filter_check_defs, filter_metric_defs};
use crate::model::{Check, Metric, ScopeKind, Severity};
use crate::platform::{Platform, ProjectSummary};
use crate::registry::{CheckDef, MetricDef, Registry, RunContext, ScopeTarget};
use crate::report::ReportStore;
use crate::severity::{checks_severity, max_severity, tag_breakdown_of_checks};

/// Member selection for a batch run. Empty lists select everything; the
/// folder path selects a subtree.
#[derive(Debug, Clone, Default)]
pub struct ProjectFilters {
    pub project_keys: Vec<String>,
    pub project_statuses: Vec<String>,
    pub tags: Vec<String>,
    pub folder_path: Option<String>,
}

impl ProjectFilters {
    pub fn matches(&self, project: &ProjectSummary) -> bool {
        if !self.project_keys.is_empty() && !self.project_keys.contains(&project.project_key) {
            return false;
        }
        if !self.project_statuses.is_empty()
            && !self
                .project_statuses
                .iter()
                .any(|status| status == project.status_or_default())
        {
            return false;
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|tag| project.tags.contains(tag)) {
            return false;
        }
        if let Some(folder) = &self.folder_path {
            if !folder_matches(folder, &project.folder_path) {
                return false;
            }
        }
        true
    }
}

/// Subtree match: `/marketing` selects `/marketing` and everything below
/// it, never `/marketing-emea`.
fn folder_matches(selected: &str, folder_path: &str) -> bool {
    let selected = selected.trim_end_matches('/');
    if selected.is_empty() {
        return true;
    }
    let folder = folder_path.trim_end_matches('/');
    folder == selected || folder.starts_with(&format!("{selected}/"))
}

/// Outcome of one project scope.
pub struct ProjectRun {
    pub project_key: String,
    pub metrics: Vec<Metric>,
    pub checks: Vec<Check>,
    pub severity: Severity,
}

pub struct BatchRun {
    pub projects: Vec<ProjectRun>,
    pub severity: Severity,
}

pub struct InstanceRun {
    pub metrics: Vec<Metric>,
    pub checks: Vec<Check>,
    pub batch: BatchRun,
    pub severity: Severity,
}

#[derive(Serialize)]
struct RunSummary {
    timestamp: String,
    scope: ScopeKind,
    severity: Severity,
    projects: usize,
    metrics: usize,
    checks: usize,
    tag_severities: BTreeMap<String, Severity>,
}

/// Shared collaborators for every orchestrator.
pub struct Advisor<'a> {
    pub platform: &'a dyn Platform,
    pub config: &'a AdvisorConfig,
    pub backend: &'a BackendClient,
    pub report: &'a ReportStore,
    pub addon_dir: Option<&'a Path>,
}

impl<'a> Advisor<'a> {
    fn run_context(&self) -> RunContext<'a> {
        RunContext {
            platform: self.platform,
            config: self.config,
            backend: self.backend,
        }
    }

    /// Discover, filter and instantiate the definitions for one scope.
    fn prepare(&self, scope: ScopeKind) -> Result<(Vec<MetricDef>, Vec<CheckDef>)> {
        let reported = self
            .platform
            .version_string()
            .context("failed to read the platform version")?;
        let platform_version = self.config.platform_version(&reported)?;
        let registry = Registry::discover(scope, self.addon_dir)?;
        let filter_ctx = FilterContext {
            config: self.config,
            platform_version: &platform_version,
        };
        Ok((
            filter_metric_defs(registry.metrics, &filter_ctx),
            filter_check_defs(registry.checks, &filter_ctx),
        ))
    }

    fn run_one_project(
        &self,
        project: &ProjectSummary,
        metric_defs: &[MetricDef],
        check_defs: &[CheckDef],
        run_cfg: &RunConfig,
    ) -> ProjectRun {
        let ctx = self.run_context();
        let target = ScopeTarget::Project(project);
        let mut metrics: Vec<Metric> = metric_defs.iter().map(MetricDef::instantiate).collect();
        run_metrics(metric_defs, &mut metrics, &target, &ctx, run_cfg);
        let mut checks: Vec<Check> = check_defs
            .iter()
            .map(|def| def.instantiate(self.config))
            .collect();
        run_checks(check_defs, &mut checks, &metrics, &target, &ctx, run_cfg);
        let severity = checks_severity(&checks);
        ProjectRun {
            project_key: project.project_key.clone(),
            metrics,
            checks,
            severity,
        }
    }

    /// Run a single project and persist its snapshot.
    pub fn run_project(&self, project_key: &str) -> Result<ProjectRun> {
        let project = self.platform.project(project_key)?;
        let (metric_defs, check_defs) = self.prepare(ScopeKind::Project)?;
        let run = self.run_one_project(&project, &metric_defs, &check_defs, &self.config.run);

        info!(
            project = %run.project_key,
            severity = %run.severity,
            metrics = run.metrics.len(),
            checks = run.checks.len(),
            "project run complete"
        );
        self.persist_project_runs(std::slice::from_ref(&run), 1);
        Ok(run)
    }

    /// Run every project matched by the filters. Members run sequentially
    /// or on the bounded pool; inside a member, assessments stay
    /// sequential.
    pub fn run_batch(&self, filters: &ProjectFilters) -> Result<BatchRun> {
        let projects = self.select_projects(filters)?;
        let (metric_defs, check_defs) = self.prepare(ScopeKind::Project)?;
        let member_cfg = RunConfig {
            parallel: false,
            workers: 1,
        };

        let mut slots: Vec<(ProjectSummary, Option<ProjectRun>)> =
            projects.into_iter().map(|project| (project, None)).collect();
        let workers = if self.config.run.parallel {
            self.config.run.workers
        } else {
            1
        };
        for_each_parallel(&mut slots, workers, |slot| {
            let (project, result) = slot;
            *result = Some(self.run_one_project(project, &metric_defs, &check_defs, &member_cfg));
        });

        let projects: Vec<ProjectRun> = slots
            .into_iter()
            .filter_map(|(_, result)| result)
            .collect();
        let severity = max_severity(projects.iter().map(|run| run.severity));
        info!(
            projects = projects.len(),
            severity = %severity,
            "batch run complete"
        );
        let members = projects.len();
        self.persist_project_runs(&projects, members);
        Ok(BatchRun { projects, severity })
    }

    /// Run the instance scope: an unfiltered batch plus the instance's own
    /// assessments. Instance severity is the max of both.
    pub fn run_instance(&self) -> Result<InstanceRun> {
        let batch = self.run_batch(&ProjectFilters::default())?;

        let (metric_defs, check_defs) = self.prepare(ScopeKind::Instance)?;
        let ctx = self.run_context();
        let target = ScopeTarget::Instance;
        let mut metrics: Vec<Metric> = metric_defs.iter().map(MetricDef::instantiate).collect();
        run_metrics(&metric_defs, &mut metrics, &target, &ctx, &self.config.run);
        let mut checks: Vec<Check> = check_defs
            .iter()
            .map(|def| def.instantiate(self.config))
            .collect();
        run_checks(
            &check_defs,
            &mut checks,
            &metrics,
            &target,
            &ctx,
            &self.config.run,
        );

        let severity = checks_severity(&checks).max(batch.severity);
        info!(
            severity = %severity,
            batch_severity = %batch.severity,
            checks = checks.len(),
            "instance run complete"
        );
        self.persist_instance_run(&metrics, &checks, severity, batch.projects.len());
        Ok(InstanceRun {
            metrics,
            checks,
            batch,
            severity,
        })
    }

    fn select_projects(&self, filters: &ProjectFilters) -> Result<Vec<ProjectSummary>> {
        let mut selected = Vec::new();
        for key in self.platform.list_project_keys()? {
            let project = self.platform.project(&key)?;
            if filters.matches(&project) {
                selected.push(project);
            }
        }
        info!(selected = selected.len(), "batch member selection done");
        Ok(selected)
    }

    /// Best-effort persistence of the union of member records plus the run
    /// summary. A failing write is logged, never fatal.
    fn persist_project_runs(&self, runs: &[ProjectRun], members: usize) {
        let timestamp = Utc::now();
        let metric_rows: Vec<(&str, &Metric)> = runs
            .iter()
            .flat_map(|run| {
                run.metrics
                    .iter()
                    .map(move |metric| (run.project_key.as_str(), metric))
            })
            .collect();
        let check_rows: Vec<(&str, &Check)> = runs
            .iter()
            .flat_map(|run| {
                run.checks
                    .iter()
                    .map(move |check| (run.project_key.as_str(), check))
            })
            .collect();

        if let Err(err) = self
            .report
            .persist_metrics(ScopeKind::Project, timestamp, &metric_rows)
        {
            warn!(error = %format!("{err:#}"), "failed to persist metric snapshot");
        }
        if let Err(err) = self
            .report
            .persist_checks(ScopeKind::Project, timestamp, &check_rows)
        {
            warn!(error = %format!("{err:#}"), "failed to persist check snapshot");
        }

        let mut tag_severities = BTreeMap::new();
        for run in runs {
            for (tag, rollup) in tag_breakdown_of_checks(&run.checks) {
                let entry = tag_severities.entry(tag).or_insert(Severity::NoSeverity);
                *entry = (*entry).max(rollup.max);
            }
        }
        let summary = RunSummary {
            timestamp: crate::util::now_utc_string(),
            scope: ScopeKind::Project,
            severity: max_severity(runs.iter().map(|run| run.severity)),
            projects: members,
            metrics: metric_rows.len(),
            checks: check_rows.len(),
            tag_severities,
        };
        if let Err(err) = self
            .report
            .persist_summary(ScopeKind::Project, timestamp, &summary)
        {
            warn!(error = %format!("{err:#}"), "failed to persist run summary");
        }
    }

    fn persist_instance_run(
        &self,
        metrics: &[Metric],
        checks: &[Check],
        severity: Severity,
        members: usize,
    ) {
        let timestamp = Utc::now();
        let metric_rows: Vec<(&str, &Metric)> =
            metrics.iter().map(|metric| ("INSTANCE", metric)).collect();
        let check_rows: Vec<(&str, &Check)> =
            checks.iter().map(|check| ("INSTANCE", check)).collect();

        if let Err(err) = self
            .report
            .persist_metrics(ScopeKind::Instance, timestamp, &metric_rows)
        {
            warn!(error = %format!("{err:#}"), "failed to persist instance metric snapshot");
        }
        if let Err(err) = self
            .report
            .persist_checks(ScopeKind::Instance, timestamp, &check_rows)
        {
            warn!(error = %format!("{err:#}"), "failed to persist instance check snapshot");
        }
        let summary = RunSummary {
            timestamp: crate::util::now_utc_string(),
            scope: ScopeKind::Instance,
            severity,
            projects: members,
            metrics: metrics.len(),
            checks: checks.len(),
            tag_severities: tag_breakdown_of_checks(checks)
                .into_iter()
                .map(|(tag, rollup)| (tag, rollup.max))
                .collect(),
        };
        if let Err(err) = self
            .report
            .persist_summary(ScopeKind::Instance, timestamp, &summary)
        {
            warn!(error = %format!("{err:#}"), "failed to persist instance run summary");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::backend::TableSelection;
    use crate::model::AssessmentStatus;
    use crate::platform::{EnvironmentSnapshot, SnapshotPlatform};
    use crate::store::FolderStore;

    fn ten_project_platform() -> SnapshotPlatform {
        let mut projects = Vec::new();
        for index in 0..10 {
            let status = if index < 3 { "PRODUCTION" } else { "SANDBOX" };
            projects.push(json!({
                "project_key": format!("PROJ_{index}"),
                "description": "A documented project used in tests",
                "status": status,
                "folder_path": if index % 2 == 0 { "/marketing" } else { "/finance" },
                "tags": if index == 0 { json!(["critical"]) } else { json!([]) },
                "datasets": [{"name": "clean_orders"}],
                "wiki_articles": ["home"],
                "scenarios": [{"id": "rebuild", "active": true, "auto_trigger": true}]
            }));
        }
        let snapshot: EnvironmentSnapshot = serde_json::from_value(json!({
            "platform_version": "13.0.0",
            "projects": projects,
            "users": [{"login": "alice"}],
            "plugins": []
        }))
        .unwrap();
        SnapshotPlatform::new(snapshot)
    }

    fn advisor_over<'a>(
        platform: &'a SnapshotPlatform,
        config: &'a AdvisorConfig,
        backend: &'a BackendClient,
        report: &'a ReportStore,
    ) -> Advisor<'a> {
        Advisor {
            platform,
            config,
            backend,
            report,
            addon_dir: None,
        }
    }

    #[test]
    fn status_filter_selects_the_production_members() {
        let platform = ten_project_platform();
        let config = AdvisorConfig::default();
        let mut backend = BackendClient::in_memory();
        backend.build(&platform, &TableSelection::All);
        let dir = tempfile::tempdir().unwrap();
        let report = ReportStore::new(FolderStore::new(dir.path()));
        let advisor = advisor_over(&platform, &config, &backend, &report);

        let filters = ProjectFilters {
            project_statuses: vec!["PRODUCTION".to_string()],
            ..Default::default()
        };
        let batch = advisor.run_batch(&filters).unwrap();
        assert_eq!(batch.projects.len(), 3);
        assert!(batch
            .projects
            .iter()
            .all(|run| run.project_key.starts_with("PROJ_")));
        // Every member ran something and the rollup is a real severity.
        assert!(batch.severity >= Severity::Ok);
    }

    #[test]
    fn folder_filter_selects_the_subtree_only() {
        let platform = ten_project_platform();
        let config = AdvisorConfig::default();
        let backend = BackendClient::in_memory();
        let dir = tempfile::tempdir().unwrap();
        let report = ReportStore::new(FolderStore::new(dir.path()));
        let advisor = advisor_over(&platform, &config, &backend, &report);

        let filters = ProjectFilters {
            folder_path: Some("/marketing".to_string()),
            ..Default::default()
        };
        let selected = advisor.select_projects(&filters).unwrap();
        assert_eq!(selected.len(), 5);

        assert!(folder_matches("/marketing", "/marketing/emea"));
        assert!(!folder_matches("/marketing", "/marketing-emea"));
    }

    #[test]
    fn single_project_run_persists_snapshots() {
        let platform = ten_project_platform();
        let config = AdvisorConfig::default();
        let mut backend = BackendClient::in_memory();
        backend.build(&platform, &TableSelection::All);
        let dir = tempfile::tempdir().unwrap();
        let report = ReportStore::new(FolderStore::new(dir.path()));
        let advisor = advisor_over(&platform, &config, &backend, &report);

        let run = advisor.run_project("PROJ_0").unwrap();
        assert!(!run.metrics.is_empty());
        assert!(!run.checks.is_empty());
        assert!(run
            .checks
            .iter()
            .all(|check| check.status != AssessmentStatus::NotRun));

        let reloaded = report
            .load_recent_checks(ScopeKind::Project, 1)
            .unwrap();
        assert!(!reloaded.is_empty());
        assert!(reloaded.iter().all(|record| record.project_id == "PROJ_0"));
    }

    #[test]
    fn instance_severity_covers_the_batch() {
        let platform = ten_project_platform();
        let config = AdvisorConfig::default();
        let mut backend = BackendClient::in_memory();
        backend.build(&platform, &TableSelection::All);
        let dir = tempfile::tempdir().unwrap();
        let report = ReportStore::new(FolderStore::new(dir.path()));
        let advisor = advisor_over(&platform, &config, &backend, &report);

        let run = advisor.run_instance().unwrap();
        assert_eq!(run.batch.projects.len(), 10);
        assert!(run.severity >= run.batch.severity);
        assert!(!run.metrics.is_empty());
    }

    #[test]
    fn parallel_batch_matches_sequential_batch() {
        let platform = ten_project_platform();
        let mut parallel_config = AdvisorConfig::default();
        parallel_config.run = RunConfig {
            parallel: true,
            workers: 4,
        };
        let sequential_config = AdvisorConfig::default();
        let backend = BackendClient::in_memory();
        let dir = tempfile::tempdir().unwrap();
        let report = ReportStore::new(FolderStore::new(dir.path()));

        let sequential = advisor_over(&platform, &sequential_config, &backend, &report)
            .run_batch(&ProjectFilters::default())
            .unwrap();
        let parallel = advisor_over(&platform, &parallel_config, &backend, &report)
            .run_batch(&ProjectFilters::default())
            .unwrap();

        let severities = |batch: &BatchRun| -> Vec<(String, Severity)> {
            let mut out: Vec<_> = batch
                .projects
                .iter()
                .map(|run| (run.project_key.clone(), run.severity))
                .collect();
            out.sort();
            out
        };
        assert_eq!(severities(&sequential), severities(&parallel));
        assert_eq!(sequential.severity, parallel.severity);
    }
}
