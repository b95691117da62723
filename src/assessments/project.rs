//! Built-in project-scope assessments.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;

use crate::model::{MetricValue, ScopeKind, Severity, VersionRange};
use crate::registry::{CheckDef, CheckRun, CheckVerdict, MetricDef, MetricRun, MetricVerdict};

/// Recipe kinds counted as code recipes.
const CODE_RECIPE_KINDS: [&str; 7] = [
    "python",
    "r",
    "sql_query",
    "sql_script",
    "shell",
    "pyspark",
    "sparkr",
];

fn metric(name: &str, description: &str, tags: &[&str], unit: Option<&str>, run: MetricRun) -> MetricDef {
    MetricDef {
        name: name.to_string(),
        description: description.to_string(),
        tags: tags.iter().map(|tag| tag.to_string()).collect(),
        scope: ScopeKind::Project,
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
        scope: ScopeKind::Project,
        version_range: VersionRange::any(),
        uses_llm: false,
        uses_plugin_usage: false,
        uses_filesystem: false,
        extra_rules: Vec::new(),
        run,
    }
}

pub fn metric_defs() -> Vec<MetricDef> {
    vec![
        metric(
            "nbr_of_datasets",
            "Number of datasets in the project flow",
            &["FLOW"],
            Some("datasets"),
            Arc::new(|target, _ctx, _details| {
                let project = target.project()?;
                Ok(MetricVerdict::Computed(MetricValue::Int(
                    project.datasets.len() as i64,
                )))
            }),
        ),
        metric(
            "nbr_wiki_articles",
            "Number of wiki articles in the project",
            &["DOCUMENTATION"],
            Some("articles"),
            Arc::new(|target, _ctx, _details| {
                let project = target.project()?;
                Ok(MetricVerdict::Computed(MetricValue::Int(
                    project.wiki_articles.len() as i64,
                )))
            }),
        ),
        metric(
            "nbr_code_recipes",
            "Number of code recipes in the project flow",
            &["FLOW"],
            Some("recipes"),
            Arc::new(|target, _ctx, details| {
                let project = target.project()?;
                let code: Vec<String> = project
                    .recipes
                    .iter()
                    .filter(|recipe| {
                        CODE_RECIPE_KINDS.contains(&recipe.kind.to_lowercase().as_str())
                    })
                    .map(|recipe| recipe.name.clone())
                    .collect();
                details.insert(
                    "code_recipes".to_string(),
                    Value::from(code.clone()),
                );
                Ok(MetricVerdict::Computed(MetricValue::Int(code.len() as i64)))
            }),
        ),
        metric(
            "days_since_update",
            "Days elapsed since the project was last modified",
            &["MAINTENANCE"],
            Some("days"),
            Arc::new(|target, _ctx, _details| {
                let project = target.project()?;
                let Some(raw) = &project.last_modified_on else {
                    return Ok(MetricVerdict::NotApplicable {
                        reason: "project has no last-modified timestamp".to_string(),
                    });
                };
                let modified = DateTime::parse_from_rfc3339(raw)
                    .with_context(|| format!("invalid last-modified timestamp: {raw}"))?;
                let days = (Utc::now() - modified.with_timezone(&Utc)).num_days().max(0);
                Ok(MetricVerdict::Computed(MetricValue::Int(days)))
            }),
        ),
    ]
}

pub fn check_defs() -> Vec<CheckDef> {
    let mut defs = vec![
        check(
            "description_check",
            "The project should carry a short description",
            &["DOCUMENTATION"],
            Arc::new(|target, _ctx, _metrics, _params, _details| {
                let project = target.project()?;
                let described = project
                    .description
                    .as_deref()
                    .is_some_and(|text| !text.trim().is_empty());
                if described {
                    Ok(CheckVerdict::Evaluated {
                        severity: Severity::Ok,
                        message: "The project has a description".to_string(),
                    })
                } else {
                    Ok(CheckVerdict::Evaluated {
                        severity: Severity::Medium,
                        message: "The project has no description".to_string(),
                    })
                }
            }),
        ),
        check(
            "wiki_check",
            "The project wiki should not be empty",
            &["DOCUMENTATION"],
            Arc::new(|_target, _ctx, metrics, _params, _details| {
                let Some(articles) = metrics.int("nbr_wiki_articles") else {
                    return Ok(CheckVerdict::NotApplicable {
                        reason: "metric nbr_wiki_articles was not computed".to_string(),
                    });
                };
                if articles > 0 {
                    Ok(CheckVerdict::Evaluated {
                        severity: Severity::Ok,
                        message: format!("The project wiki has {articles} article(s)"),
                    })
                } else {
                    Ok(CheckVerdict::Evaluated {
                        severity: Severity::Medium,
                        message: "The project wiki is empty".to_string(),
                    })
                }
            }),
        ),
        check(
            "scenario_auto_trigger_check",
            "At least one active scenario should have an automatic trigger",
            &["AUTOMATION"],
            Arc::new(|target, _ctx, _metrics, _params, details| {
                let project = target.project()?;
                if project.scenarios.is_empty() {
                    return Ok(CheckVerdict::NotApplicable {
                        reason: "project has no scenarios".to_string(),
                    });
                }
                let triggered: Vec<String> = project
                    .scenarios
                    .iter()
                    .filter(|scenario| scenario.active && scenario.auto_trigger)
                    .map(|scenario| scenario.id.clone())
                    .collect();
                details.insert(
                    "auto_triggered_scenarios".to_string(),
                    Value::from(triggered.clone()),
                );
                if triggered.is_empty() {
                    Ok(CheckVerdict::Evaluated {
                        severity: Severity::Low,
                        message: "No active scenario has an automatic trigger".to_string(),
                    })
                } else {
                    Ok(CheckVerdict::Evaluated {
                        severity: Severity::Ok,
                        message: format!(
                            "{} scenario(s) are actively auto-triggered",
                            triggered.len()
                        ),
                    })
                }
            }),
        ),
        check(
            "dataset_naming_check",
            "Dataset names should follow the configured naming pattern",
            &["FLOW"],
            Arc::new(|target, _ctx, _metrics, params, details| {
                let project = target.project()?;
                let pattern = params
                    .get("pattern")
                    .and_then(Value::as_str)
                    .unwrap_or("^[A-Za-z0-9_]+$");
                let regex = Regex::new(pattern)
                    .with_context(|| format!("invalid dataset naming pattern: {pattern}"))?;
                let violators: Vec<String> = project
                    .datasets
                    .iter()
                    .filter(|dataset| !regex.is_match(&dataset.name))
                    .map(|dataset| dataset.name.clone())
                    .collect();
                details.insert("violators".to_string(), Value::from(violators.clone()));
                if violators.is_empty() {
                    Ok(CheckVerdict::Evaluated {
                        severity: Severity::Ok,
                        message: "All dataset names match the naming pattern".to_string(),
                    })
                } else {
                    Ok(CheckVerdict::Evaluated {
                        severity: Severity::Medium,
                        message: format!(
                            "{} dataset(s) do not match the naming pattern",
                            violators.len()
                        ),
                    })
                }
            }),
        ),
        check(
            "deployment_check",
            "The project should be deployed through the deployer",
            &["DEPLOYMENT"],
            Arc::new(|target, ctx, _metrics, _params, details| {
                let project = target.project()?;
                let Some(table) = ctx.backend.get_table("project_deployments") else {
                    return Ok(CheckVerdict::NotApplicable {
                        reason: "backend table project_deployments is not available".to_string(),
                    });
                };
                let deployed = table
                    .column_values("source_project_key")
                    .iter()
                    .any(|key| *key == project.project_key);
                details.insert("deployed".to_string(), Value::from(deployed));
                if deployed {
                    Ok(CheckVerdict::Evaluated {
                        severity: Severity::Ok,
                        message: "The project has at least one deployment".to_string(),
                    })
                } else {
                    Ok(CheckVerdict::Evaluated {
                        severity: Severity::Low,
                        message: "The project has never been deployed".to_string(),
                    })
                }
            }),
        ),
    ];

    let mut doc_quality = check(
        "doc_quality_check",
        "Project documentation should be substantial enough to onboard a newcomer",
        &["DOCUMENTATION"],
        Arc::new(|target, ctx, _metrics, params, details| {
            let project = target.project()?;
            let min_length = params
                .get("min_length")
                .and_then(Value::as_u64)
                .unwrap_or(80) as usize;
            if let Some(llm_id) = &ctx.config.llm_id {
                details.insert("llm_id".to_string(), Value::from(llm_id.clone()));
            }
            let length = project
                .description
                .as_deref()
                .map(|text| text.trim().len())
                .unwrap_or(0);
            details.insert("description_length".to_string(), Value::from(length as u64));
            if length >= min_length {
                Ok(CheckVerdict::Evaluated {
                    severity: Severity::Ok,
                    message: "The project documentation looks substantial".to_string(),
                })
            } else {
                Ok(CheckVerdict::Evaluated {
                    severity: Severity::Medium,
                    message: format!(
                        "The project documentation is too thin ({length} < {min_length} characters)"
                    ),
                })
            }
        }),
    );
    doc_quality.uses_llm = true;
    defs.push(doc_quality);

    defs
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::backend::BackendClient;
    use crate::config::AdvisorConfig;
    use crate::model::Details;
    use crate::platform::{EnvironmentSnapshot, ProjectSummary, SnapshotPlatform};
    use crate::registry::{MetricLookup, RunContext, ScopeTarget};

    fn run_check_on(
        def_name: &str,
        project: &ProjectSummary,
        params: Value,
        backend: &BackendClient,
    ) -> CheckVerdict {
        let def_list = check_defs();
        let def = def_list
            .iter()
            .find(|def| def.name == def_name)
            .expect("unknown check");
        let snapshot = EnvironmentSnapshot {
            platform_version: "13.0.0".to_string(),
            ..Default::default()
        };
        let platform = SnapshotPlatform::new(snapshot);
        let config = AdvisorConfig::default();
        let ctx = RunContext {
            platform: &platform,
            config: &config,
            backend,
        };
        let mut details = Details::new();
        (def.run)(
            &ScopeTarget::Project(project),
            &ctx,
            &MetricLookup::new(&[]),
            &params,
            &mut details,
        )
        .expect("check run failed")
    }

    fn severity_of(verdict: CheckVerdict) -> Severity {
        match verdict {
            CheckVerdict::Evaluated { severity, .. } => severity,
            CheckVerdict::NotApplicable { reason } => {
                panic!("expected an evaluation, got not-applicable: {reason}")
            }
        }
    }

    #[test]
    fn description_check_flags_missing_descriptions() {
        let backend = BackendClient::in_memory();
        let mut project = ProjectSummary {
            project_key: "SALES".to_string(),
            ..Default::default()
        };
        assert_eq!(
            severity_of(run_check_on("description_check", &project, json!({}), &backend)),
            Severity::Medium
        );
        project.description = Some("Weekly sales ingestion and scoring".to_string());
        assert_eq!(
            severity_of(run_check_on("description_check", &project, json!({}), &backend)),
            Severity::Ok
        );
    }

    #[test]
    fn dataset_naming_check_honours_the_configured_pattern() {
        let backend = BackendClient::in_memory();
        let project: ProjectSummary = serde_json::from_value(json!({
            "project_key": "SALES",
            "datasets": [{"name": "clean_orders"}, {"name": "Raw Orders!"}]
        }))
        .unwrap();
        assert_eq!(
            severity_of(run_check_on(
                "dataset_naming_check",
                &project,
                json!({"pattern": "^[a-z_]+$"}),
                &backend
            )),
            Severity::Medium
        );
    }

    #[test]
    fn deployment_check_goes_not_applicable_without_the_cache_table() {
        let backend = BackendClient::in_memory();
        let project = ProjectSummary {
            project_key: "SALES".to_string(),
            ..Default::default()
        };
        let verdict = run_check_on("deployment_check", &project, json!({}), &backend);
        assert!(matches!(verdict, CheckVerdict::NotApplicable { .. }));
    }

    #[test]
    fn code_recipe_metric_counts_only_code_kinds() {
        let project: ProjectSummary = serde_json::from_value(json!({
            "project_key": "SALES",
            "recipes": [
                {"name": "score", "kind": "python"},
                {"name": "join", "kind": "join"},
                {"name": "extract", "kind": "SQL_query"}
            ]
        }))
        .unwrap();
        let defs = metric_defs();
        let def = defs
            .iter()
            .find(|def| def.name == "nbr_code_recipes")
            .unwrap();
        let snapshot = EnvironmentSnapshot {
            platform_version: "13.0.0".to_string(),
            ..Default::default()
        };
        let platform = SnapshotPlatform::new(snapshot);
        let config = AdvisorConfig::default();
        let backend = BackendClient::in_memory();
        let ctx = RunContext {
            platform: &platform,
            config: &config,
            backend: &backend,
        };
        let mut details = Details::new();
        let verdict = (def.run)(&ScopeTarget::Project(&project), &ctx, &mut details).unwrap();
        match verdict {
            MetricVerdict::Computed(MetricValue::Int(count)) => assert_eq!(count, 2),
            _ => panic!("expected an int metric"),
        }
    }
}
