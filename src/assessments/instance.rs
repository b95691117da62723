//! Built-in instance-scope assessments. Instance checks carry the category
//! gating rule on top of the base filter rules.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::filter::instance_category_rule;
use crate::model::{MetricValue, ScopeKind, Severity, VersionRange};
use crate::registry::{CheckDef, CheckRun, CheckVerdict, MetricDef, MetricRun, MetricVerdict};

fn metric(name: &str, description: &str, tags: &[&str], unit: Option<&str>, run: MetricRun) -> MetricDef {
    MetricDef {
        name: name.to_string(),
        description: description.to_string(),
        tags: tags.iter().map(|tag| tag.to_string()).collect(),
        scope: ScopeKind::Instance,
        version_range: VersionRange::any(),
        uses_llm: false,
        uses_plugin_usage: false,
        uses_filesystem: false,
        unit: unit.map(|unit| unit.to_string()),
        run,
    }
}

fn check(name: &str, description: &str, tags: &[&str], run: CheckRun) -> CheckDef {
    CheckDef {
        name: name.to_string(),
        description: description.to_string(),
        tags: tags.iter().map(|tag| tag.to_string()).collect(),
        scope: ScopeKind::Instance,
        version_range: VersionRange::any(),
        uses_llm: false,
        uses_plugin_usage: false,
        uses_filesystem: false,
        extra_rules: vec![instance_category_rule()],
        run,
    }
}

fn directory_size(path: &Path) -> Result<u64> {
    let mut total = 0;
    let entries = fs::read_dir(path)
        .with_context(|| format!("failed to list data directory: {}", path.display()))?;
    for entry in entries {
        let entry = entry
            .with_context(|| format!("failed to read entry in {}", path.display()))?;
        let metadata = entry
            .metadata()
            .with_context(|| format!("failed to stat {}", entry.path().display()))?;
        if metadata.is_dir() {
            total += directory_size(&entry.path())?;
        } else {
            total += metadata.len();
        }
    }
    Ok(total)
}

pub fn metric_defs() -> Vec<MetricDef> {
    let mut defs = vec![
        metric(
            "nbr_of_projects",
            "Number of projects on the instance",
            &["PROJECTS"],
            Some("projects"),
            Arc::new(|_target, ctx, _details| {
                let keys = ctx.platform.list_project_keys()?;
                Ok(MetricVerdict::Computed(MetricValue::Int(keys.len() as i64)))
            }),
        ),
        metric(
            "nbr_of_users",
            "Number of declared users on the instance",
            &["USERS"],
            Some("users"),
            Arc::new(|_target, ctx, _details| {
                let users = ctx.platform.list_users()?;
                Ok(MetricVerdict::Computed(MetricValue::Int(users.len() as i64)))
            }),
        ),
        metric(
            "nbr_of_plugins",
            "Number of installed plugins on the instance",
            &["PLUGINS"],
            Some("plugins"),
            Arc::new(|_target, ctx, details| {
                let plugins = ctx.platform.list_plugins()?;
                let dev: Vec<String> = plugins
                    .iter()
                    .filter(|plugin| plugin.dev)
                    .map(|plugin| plugin.id.clone())
                    .collect();
                details.insert("dev_plugins".to_string(), Value::from(dev));
                Ok(MetricVerdict::Computed(MetricValue::Int(
                    plugins.len() as i64,
                )))
            }),
        ),
    ];

    let mut data_dir_usage = metric(
        "data_dir_usage_bytes",
        "Total size of the configured data directory",
        &["RESOURCES"],
        Some("bytes"),
        Arc::new(|_target, ctx, _details| {
            let Some(data_dir) = &ctx.config.data_dir else {
                return Ok(MetricVerdict::NotApplicable {
                    reason: "no data directory configured".to_string(),
                });
            };
            let size = directory_size(data_dir)?;
            Ok(MetricVerdict::Computed(MetricValue::Int(size as i64)))
        }),
    );
    data_dir_usage.uses_filesystem = true;
    defs.push(data_dir_usage);

    defs
}

pub fn check_defs() -> Vec<CheckDef> {
    let mut defs = vec![check(
        "no_disabled_user_check",
        "Disabled user accounts should be removed from the instance",
        &["USERS"],
        Arc::new(|_target, ctx, _metrics, _params, details| {
            let users = ctx.platform.list_users()?;
            let disabled: Vec<String> = users
                .iter()
                .filter(|user| !user.enabled)
                .map(|user| user.login.clone())
                .collect();
            details.insert("disabled_users".to_string(), Value::from(disabled.clone()));
            if disabled.is_empty() {
                Ok(CheckVerdict::Evaluated {
                    severity: Severity::Ok,
                    message: "No disabled user account on the instance".to_string(),
                })
            } else {
                Ok(CheckVerdict::Evaluated {
                    severity: Severity::Low,
                    message: format!("{} disabled user account(s) linger", disabled.len()),
                })
            }
        }),
    )];

    let mut plugin_usage = check(
        "plugin_usage_check",
        "Installed plugins should actually be used somewhere",
        &["PLUGINS"],
        Arc::new(|_target, ctx, _metrics, _params, details| {
            let Some(table) = ctx.backend.get_table("plugins_usage") else {
                return Ok(CheckVerdict::NotApplicable {
                    reason: "backend table plugins_usage is not available".to_string(),
                });
            };
            let used: Vec<&str> = table.column_values("plugin_id");
            let unused: Vec<String> = ctx
                .platform
                .list_plugins()?
                .into_iter()
                .filter(|plugin| !used.contains(&plugin.id.as_str()))
                .map(|plugin| plugin.id)
                .collect();
            details.insert("unused_plugins".to_string(), Value::from(unused.clone()));
            if unused.is_empty() {
                Ok(CheckVerdict::Evaluated {
                    severity: Severity::Ok,
                    message: "Every installed plugin is used at least once".to_string(),
                })
            } else {
                Ok(CheckVerdict::Evaluated {
                    severity: Severity::Medium,
                    message: format!("{} installed plugin(s) are never used", unused.len()),
                })
            }
        }),
    );
    plugin_usage.uses_plugin_usage = true;
    defs.push(plugin_usage);

    defs
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::backend::{BackendClient, TableSelection};
    use crate::config::AdvisorConfig;
    use crate::model::Details;
    use crate::platform::{EnvironmentSnapshot, SnapshotPlatform};
    use crate::registry::{MetricLookup, RunContext, ScopeTarget};

    fn sample_platform() -> SnapshotPlatform {
        let snapshot: EnvironmentSnapshot = serde_json::from_value(json!({
            "platform_version": "13.0.0",
            "projects": [{"project_key": "SALES"}],
            "plugins": [
                {"id": "used-plugin",
                 "usages": [{"project_key": "SALES", "object_id": "ds1",
                             "object_type": "DATASET", "element_type": "connector"}]},
                {"id": "idle-plugin"}
            ],
            "users": [
                {"login": "alice"},
                {"login": "bob", "enabled": false}
            ]
        }))
        .unwrap();
        SnapshotPlatform::new(snapshot)
    }

    #[test]
    fn disabled_users_raise_a_low_severity() {
        let platform = sample_platform();
        let config = AdvisorConfig::default();
        let backend = BackendClient::in_memory();
        let ctx = RunContext {
            platform: &platform,
            config: &config,
            backend: &backend,
        };
        let defs = check_defs();
        let def = defs
            .iter()
            .find(|def| def.name == "no_disabled_user_check")
            .unwrap();
        let mut details = Details::new();
        let verdict = (def.run)(
            &ScopeTarget::Instance,
            &ctx,
            &MetricLookup::new(&[]),
            &json!({}),
            &mut details,
        )
        .unwrap();
        match verdict {
            CheckVerdict::Evaluated { severity, .. } => assert_eq!(severity, Severity::Low),
            CheckVerdict::NotApplicable { .. } => panic!("expected an evaluation"),
        }
        assert_eq!(details["disabled_users"], json!(["bob"]));
    }

    #[test]
    fn plugin_usage_check_reads_the_cache_table() {
        let platform = sample_platform();
        let config = AdvisorConfig::default();
        let mut backend = BackendClient::in_memory();
        backend.build(
            &platform,
            &TableSelection::Names(vec!["plugins_usage".to_string()]),
        );
        let ctx = RunContext {
            platform: &platform,
            config: &config,
            backend: &backend,
        };
        let defs = check_defs();
        let def = defs
            .iter()
            .find(|def| def.name == "plugin_usage_check")
            .unwrap();
        let mut details = Details::new();
        let verdict = (def.run)(
            &ScopeTarget::Instance,
            &ctx,
            &MetricLookup::new(&[]),
            &json!({}),
            &mut details,
        )
        .unwrap();
        match verdict {
            CheckVerdict::Evaluated { severity, message } => {
                assert_eq!(severity, Severity::Medium);
                assert!(message.contains("1 installed plugin"));
            }
            CheckVerdict::NotApplicable { .. } => panic!("expected an evaluation"),
        }
        assert_eq!(details["unused_plugins"], json!(["idle-plugin"]));
    }

    #[test]
    fn data_dir_metric_needs_a_configured_directory() {
        let platform = sample_platform();
        let config = AdvisorConfig::default();
        let backend = BackendClient::in_memory();
        let ctx = RunContext {
            platform: &platform,
            config: &config,
            backend: &backend,
        };
        let defs = metric_defs();
        let def = defs
            .iter()
            .find(|def| def.name == "data_dir_usage_bytes")
            .unwrap();
        let mut details = Details::new();
        let verdict = (def.run)(&ScopeTarget::Instance, &ctx, &mut details).unwrap();
        assert!(matches!(verdict, MetricVerdict::NotApplicable { .. }));
    }

    #[test]
    fn data_dir_metric_sums_file_sizes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("jobs")).unwrap();
        std::fs::write(dir.path().join("a.log"), b"12345").unwrap();
        std::fs::write(dir.path().join("jobs/b.log"), b"123").unwrap();

        let platform = sample_platform();
        let mut config = AdvisorConfig::default();
        config.data_dir = Some(dir.path().to_path_buf());
        let backend = BackendClient::in_memory();
        let ctx = RunContext {
            platform: &platform,
            config: &config,
            backend: &backend,
        };
        let defs = metric_defs();
        let def = defs
            .iter()
            .find(|def| def.name == "data_dir_usage_bytes")
            .unwrap();
        let mut details = Details::new();
        match (def.run)(&ScopeTarget::Instance, &ctx, &mut details).unwrap() {
            MetricVerdict::Computed(MetricValue::Int(size)) => assert_eq!(size, 8),
            _ => panic!("expected an int metric"),
        }
    }
}
