//! Assessment registry: typed registration contracts for metrics and checks,
//! built-in discovery per scope, and declarative add-on check specs loaded
//! from an optional directory.
//!
//! Only concrete definitions exist; there is no abstract base to exclude.
//! Membership is deterministic for fixed add-on directory contents because
//! spec files are loaded in sorted order.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::assessments;
use crate::backend::BackendClient;
use crate::config::AdvisorConfig;
use crate::model::{
    AssessmentStatus, Check, Details, Metric, MetricValue, ScopeKind, Severity, VersionRange,
    parse_platform_version,
};
use crate::platform::{Platform, ProjectSummary};

/// Everything a run closure may reach: the entity accessor, the immutable
/// run configuration and the precomputation cache.
pub struct RunContext<'a> {
    pub platform: &'a dyn Platform,
    pub config: &'a AdvisorConfig,
    pub backend: &'a BackendClient,
}

/// The entity a metric or check is being run against.
pub enum ScopeTarget<'a> {
    Project(&'a ProjectSummary),
    Instance,
}

impl ScopeTarget<'_> {
    /// Record identifier: the project key, or the instance sentinel.
    pub fn id(&self) -> &str {
        match self {
            Self::Project(project) => &project.project_key,
            Self::Instance => "INSTANCE",
        }
    }

    pub fn project(&self) -> Result<&ProjectSummary> {
        match self {
            Self::Project(project) => Ok(project),
            Self::Instance => bail!("assessment requires a project scope"),
        }
    }
}

/// Read-only view over already-run metrics, handed to check closures.
/// Checks never own metrics; they look values up by name.
pub struct MetricLookup<'a> {
    metrics: &'a [Metric],
}

impl<'a> MetricLookup<'a> {
    pub fn new(metrics: &'a [Metric]) -> Self {
        Self { metrics }
    }

    /// Value of a successfully-run metric; anything else is `None`.
    pub fn value(&self, name: &str) -> Option<&'a MetricValue> {
        self.metrics
            .iter()
            .find(|metric| metric.name == name && metric.status == AssessmentStatus::RunSuccess)
            .and_then(|metric| metric.value.as_ref())
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.value(name)? {
            MetricValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Numeric view used by threshold comparisons; lists compare by length.
    pub fn number(&self, name: &str) -> Option<f64> {
        match self.value(name)? {
            MetricValue::Int(value) => Some(*value as f64),
            MetricValue::Float(value) => Some(*value),
            MetricValue::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
            MetricValue::List(values) => Some(values.len() as f64),
        }
    }
}

pub enum MetricVerdict {
    Computed(MetricValue),
    NotApplicable { reason: String },
}

pub enum CheckVerdict {
    Evaluated { severity: Severity, message: String },
    NotApplicable { reason: String },
}

pub type MetricRun =
    Arc<dyn Fn(&ScopeTarget, &RunContext, &mut Details) -> Result<MetricVerdict> + Send + Sync>;

pub type CheckRun = Arc<
    dyn Fn(&ScopeTarget, &RunContext, &MetricLookup, &Value, &mut Details) -> Result<CheckVerdict>
        + Send
        + Sync,
>;

/// Filter-relevant slice of a definition, shared by metrics and checks.
pub struct AssessmentProfile<'a> {
    pub name: &'a str,
    pub tags: &'a [String],
    pub version_range: &'a VersionRange,
    pub uses_llm: bool,
    pub uses_plugin_usage: bool,
    pub uses_filesystem: bool,
}

/// Extra removal rule attached to a definition, composed with the base
/// rules by the filter engine.
pub type FilterRule =
    Arc<dyn Fn(&AssessmentProfile, &AdvisorConfig) -> Option<String> + Send + Sync>;

#[derive(Clone)]
pub struct MetricDef {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub scope: ScopeKind,
    pub version_range: VersionRange,
    pub uses_llm: bool,
    pub uses_plugin_usage: bool,
    pub uses_filesystem: bool,
    pub unit: Option<String>,
    pub run: MetricRun,
}

impl MetricDef {
    pub fn profile(&self) -> AssessmentProfile<'_> {
        AssessmentProfile {
            name: &self.name,
            tags: &self.tags,
            version_range: &self.version_range,
            uses_llm: self.uses_llm,
            uses_plugin_usage: self.uses_plugin_usage,
            uses_filesystem: self.uses_filesystem,
        }
    }

    pub fn instantiate(&self) -> Metric {
        Metric {
            name: self.name.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
            scope: self.scope,
            uses_llm: self.uses_llm,
            uses_plugin_usage: self.uses_plugin_usage,
            uses_filesystem: self.uses_filesystem,
            unit: self.unit.clone(),
            status: AssessmentStatus::NotRun,
            runtime_secs: 0.0,
            value: None,
            details: Details::new(),
            failure: None,
        }
    }
}

#[derive(Clone)]
pub struct CheckDef {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub scope: ScopeKind,
    pub version_range: VersionRange,
    pub uses_llm: bool,
    pub uses_plugin_usage: bool,
    pub uses_filesystem: bool,
    pub extra_rules: Vec<FilterRule>,
    pub run: CheckRun,
}

impl CheckDef {
    pub fn profile(&self) -> AssessmentProfile<'_> {
        AssessmentProfile {
            name: &self.name,
            tags: &self.tags,
            version_range: &self.version_range,
            uses_llm: self.uses_llm,
            uses_plugin_usage: self.uses_plugin_usage,
            uses_filesystem: self.uses_filesystem,
        }
    }

    /// Instantiate with the parameter object configured for this check name.
    pub fn instantiate(&self, config: &AdvisorConfig) -> Check {
        Check {
            name: self.name.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
            scope: self.scope,
            uses_llm: self.uses_llm,
            uses_plugin_usage: self.uses_plugin_usage,
            uses_filesystem: self.uses_filesystem,
            parameters: config.check_parameters(&self.name),
            status: AssessmentStatus::NotRun,
            runtime_secs: 0.0,
            severity: Severity::NoSeverity,
            message: String::new(),
            details: Details::new(),
            failure: None,
        }
    }
}

/// The discovered definitions for one scope.
pub struct Registry {
    pub metrics: Vec<MetricDef>,
    pub checks: Vec<CheckDef>,
}

impl Registry {
    /// Built-ins for the scope plus any add-on check specs found in
    /// `addon_dir`. A missing directory means built-ins only; a malformed
    /// spec file is skipped with a warning, never a run failure.
    pub fn discover(scope: ScopeKind, addon_dir: Option<&Path>) -> Result<Self> {
        let metrics = match scope {
            ScopeKind::Project => assessments::project::metric_defs(),
            ScopeKind::Instance => assessments::instance::metric_defs(),
        };
        let mut checks = match scope {
            ScopeKind::Project => assessments::project::check_defs(),
            ScopeKind::Instance => assessments::instance::check_defs(),
        };

        if let Some(dir) = addon_dir {
            checks.extend(load_addon_checks(dir, scope));
        }

        info!(
            scope = scope.as_str(),
            metrics = metrics.len(),
            checks = checks.len(),
            "assessment registry discovered"
        );
        Ok(Self { metrics, checks })
    }
}

/// Declarative add-on check: watches one metric and compares it to a
/// threshold.
#[derive(Debug, Deserialize)]
struct AddonCheckSpec {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tags: Vec<String>,
    scope: ScopeKind,
    metric: String,
    op: ComparisonOp,
    threshold: f64,
    severity: Severity,
    fail_message: String,
    #[serde(default)]
    ok_message: Option<String>,
    #[serde(default)]
    min_version: Option<String>,
    #[serde(default)]
    max_version: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ComparisonOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl ComparisonOp {
    fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Ge => value >= threshold,
            Self::Lt => value < threshold,
            Self::Le => value <= threshold,
            Self::Eq => value == threshold,
            Self::Ne => value != threshold,
        }
    }
}

/// An absent or unreadable add-on directory is never an error; discovery
/// falls back to the built-ins.
fn load_addon_checks(dir: &Path, scope: ScopeKind) -> Vec<CheckDef> {
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "no add-on directory, using built-ins only");
        return Vec::new();
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "add-on directory unreadable, using built-ins only");
            return Vec::new();
        }
    };
    let mut spec_paths = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "skipping unreadable add-on entry");
                continue;
            }
        };
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            spec_paths.push(path);
        }
    }
    spec_paths.sort();

    let mut defs = Vec::new();
    for path in spec_paths {
        match load_addon_spec(&path) {
            Ok(spec) if spec.scope == scope => match compile_addon_check(spec) {
                Ok(def) => {
                    debug!(name = %def.name, path = %path.display(), "loaded add-on check");
                    defs.push(def);
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping invalid add-on check spec");
                }
            },
            Ok(_) => {}
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable add-on check spec");
            }
        }
    }
    defs
}

fn load_addon_spec(path: &Path) -> Result<AddonCheckSpec> {
    let raw = fs::read(path)
        .with_context(|| format!("failed to read add-on spec: {}", path.display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse add-on spec: {}", path.display()))
}

fn compile_addon_check(spec: AddonCheckSpec) -> Result<CheckDef> {
    if spec.name.is_empty() {
        bail!("add-on check has an empty name");
    }
    let version_range = VersionRange {
        min: spec
            .min_version
            .as_deref()
            .map(parse_platform_version)
            .transpose()?,
        max: spec
            .max_version
            .as_deref()
            .map(parse_platform_version)
            .transpose()?,
    };

    let metric = spec.metric;
    let op = spec.op;
    let threshold = spec.threshold;
    let severity = spec.severity;
    let fail_message = spec.fail_message;
    let ok_message = spec
        .ok_message
        .unwrap_or_else(|| format!("{metric} is within bounds"));

    let run: CheckRun = Arc::new(move |_target, _ctx, metrics, _params, details| {
        let Some(value) = metrics.number(&metric) else {
            return Ok(CheckVerdict::NotApplicable {
                reason: format!("metric {metric} was not computed"),
            });
        };
        details.insert("observed_value".to_string(), Value::from(value));
        details.insert("threshold".to_string(), Value::from(threshold));
        if op.holds(value, threshold) {
            Ok(CheckVerdict::Evaluated {
                severity,
                message: fail_message.clone(),
            })
        } else {
            Ok(CheckVerdict::Evaluated {
                severity: Severity::Ok,
                message: ok_message.clone(),
            })
        }
    });

    Ok(CheckDef {
        name: spec.name,
        description: spec.description,
        tags: spec.tags,
        scope: spec.scope,
        version_range,
        uses_llm: false,
        uses_plugin_usage: false,
        uses_filesystem: false,
        extra_rules: Vec::new(),
        run,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric_named(name: &str, value: Option<MetricValue>, status: AssessmentStatus) -> Metric {
        let mut metric = MetricDef {
            name: name.to_string(),
            description: String::new(),
            tags: Vec::new(),
            scope: ScopeKind::Project,
            version_range: VersionRange::any(),
            uses_llm: false,
            uses_plugin_usage: false,
            uses_filesystem: false,
            unit: None,
            run: Arc::new(|_, _, _| {
                Ok(MetricVerdict::NotApplicable {
                    reason: "unused".to_string(),
                })
            }),
        }
        .instantiate();
        metric.value = value;
        metric.status = status;
        metric
    }

    #[test]
    fn lookup_only_sees_successful_metrics() {
        let metrics = vec![
            metric_named(
                "datasets",
                Some(MetricValue::Int(4)),
                AssessmentStatus::RunSuccess,
            ),
            metric_named(
                "recipes",
                Some(MetricValue::Int(9)),
                AssessmentStatus::RunError,
            ),
        ];
        let lookup = MetricLookup::new(&metrics);
        assert_eq!(lookup.int("datasets"), Some(4));
        assert_eq!(lookup.int("recipes"), None);
        assert_eq!(lookup.number("datasets"), Some(4.0));
    }

    #[test]
    fn discovery_falls_back_to_builtins_without_addon_dir() {
        let registry = Registry::discover(ScopeKind::Project, None).unwrap();
        assert!(!registry.metrics.is_empty());
        assert!(!registry.checks.is_empty());
    }

    #[test]
    fn addon_specs_load_sorted_and_skip_malformed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("b_too_many_datasets.json"),
            r#"{
                "name": "too_many_datasets",
                "scope": "project",
                "metric": "nbr_of_datasets",
                "op": "gt",
                "threshold": 100,
                "severity": "MEDIUM",
                "fail_message": "too many datasets"
            }"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a_stale.json"),
            r#"{
                "name": "stale_project",
                "scope": "project",
                "metric": "days_since_update",
                "op": "gt",
                "threshold": 180,
                "severity": "LOW",
                "fail_message": "stale"
            }"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();

        let defs = load_addon_checks(dir.path(), ScopeKind::Project);
        let names: Vec<&str> = defs.iter().map(|def| def.name.as_str()).collect();
        assert_eq!(names, vec!["stale_project", "too_many_datasets"]);
    }

    #[test]
    fn discovery_survives_an_unusable_addon_path() {
        // A path that exists but is not a directory must fall back to the
        // built-ins instead of failing the run.
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("addons");
        std::fs::write(&not_a_dir, b"plain file").unwrap();

        let registry = Registry::discover(ScopeKind::Project, Some(&not_a_dir)).unwrap();
        let builtin_only = Registry::discover(ScopeKind::Project, None).unwrap();
        assert_eq!(registry.checks.len(), builtin_only.checks.len());
    }

    #[test]
    fn addon_checks_compare_against_the_watched_metric() {
        let spec: AddonCheckSpec = serde_json::from_str(
            r#"{
                "name": "too_many_datasets",
                "scope": "project",
                "metric": "nbr_of_datasets",
                "op": "gt",
                "threshold": 2,
                "severity": "HIGH",
                "fail_message": "too many datasets"
            }"#,
        )
        .unwrap();
        let def = compile_addon_check(spec).unwrap();

        let metrics = vec![metric_named(
            "nbr_of_datasets",
            Some(MetricValue::Int(5)),
            AssessmentStatus::RunSuccess,
        )];
        let lookup = MetricLookup::new(&metrics);
        let snapshot = crate::platform::EnvironmentSnapshot {
            platform_version: "13.0.0".to_string(),
            ..Default::default()
        };
        let platform = crate::platform::SnapshotPlatform::new(snapshot);
        let config = AdvisorConfig::default();
        let backend = BackendClient::in_memory();
        let ctx = RunContext {
            platform: &platform,
            config: &config,
            backend: &backend,
        };
        let mut details = Details::new();

        let verdict = (def.run)(
            &ScopeTarget::Instance,
            &ctx,
            &lookup,
            &Value::Object(Default::default()),
            &mut details,
        )
        .unwrap();
        match verdict {
            CheckVerdict::Evaluated { severity, message } => {
                assert_eq!(severity, Severity::High);
                assert_eq!(message, "too many datasets");
            }
            CheckVerdict::NotApplicable { .. } => panic!("expected an evaluation"),
        }
        assert_eq!(details["observed_value"], 5.0);
    }
}
