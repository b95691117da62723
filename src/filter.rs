//! Filter engine: pure, conjunctive removal rules applied once per scope
//! construction, before anything executes.
//!
//! Each rule returns an optional removal reason. Purity makes the pass
//! idempotent: filtering an already-filtered set removes nothing.

use std::sync::Arc;

use semver::Version;
use tracing::debug;

use crate::config::AdvisorConfig;
use crate::registry::{AssessmentProfile, CheckDef, FilterRule, MetricDef};

pub struct FilterContext<'a> {
    pub config: &'a AdvisorConfig,
    pub platform_version: &'a Version,
}

fn version_rule(profile: &AssessmentProfile, ctx: &FilterContext) -> Option<String> {
    if profile.version_range.contains(ctx.platform_version) {
        None
    } else {
        Some(format!(
            "platform version {} outside the supported range",
            ctx.platform_version
        ))
    }
}

fn capability_rules(profile: &AssessmentProfile, ctx: &FilterContext) -> Option<String> {
    let filters = &ctx.config.filters;
    if profile.uses_llm && !filters.use_llm {
        return Some("llm-powered assessments are disabled".to_string());
    }
    if profile.uses_plugin_usage && !filters.use_plugin_usage {
        return Some("plugin usage data is disabled".to_string());
    }
    if profile.uses_filesystem && !filters.use_filesystem {
        return Some("filesystem access is disabled".to_string());
    }
    None
}

/// Conjunction of the base rules and any extra rules carried by the
/// definition. The first matching rule decides; its reason is logged.
pub fn should_remove(
    profile: &AssessmentProfile,
    ctx: &FilterContext,
    extra_rules: &[FilterRule],
) -> bool {
    let base_reason =
        version_rule(profile, ctx).or_else(|| capability_rules(profile, ctx));
    let reason = base_reason.or_else(|| {
        extra_rules
            .iter()
            .find_map(|rule| rule(profile, ctx.config))
    });
    match reason {
        Some(reason) => {
            debug!(name = profile.name, reason = %reason, "assessment filtered out");
            true
        }
        None => false,
    }
}

pub fn filter_metric_defs(defs: Vec<MetricDef>, ctx: &FilterContext) -> Vec<MetricDef> {
    defs.into_iter()
        .filter(|def| !should_remove(&def.profile(), ctx, &[]))
        .collect()
}

pub fn filter_check_defs(defs: Vec<CheckDef>, ctx: &FilterContext) -> Vec<CheckDef> {
    defs.into_iter()
        .filter(|def| !should_remove(&def.profile(), ctx, &def.extra_rules))
        .collect()
}

/// Category gating for instance checks, attached as an extra rule so the
/// base rules stay scope-agnostic. `None` in the config disables gating;
/// an explicit allow-list keeps only checks with an intersecting tag.
pub fn instance_category_rule() -> FilterRule {
    Arc::new(|profile, config| {
        let Some(allowed) = &config.filters.instance_check_categories else {
            return None;
        };
        if profile.tags.iter().any(|tag| allowed.contains(tag)) {
            None
        } else {
            Some("no tag in the configured instance check categories".to_string())
        }
    })
}
