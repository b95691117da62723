//! Run configuration: built once before any scope executes, validated
//! eagerly, and shared read-only with every assessment in the run.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use regex::Regex;
use semver::Version;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::cli::RunArgs;
use crate::model::parse_platform_version;

/// Predicates shared by the filter engine.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub use_llm: bool,
    pub use_plugin_usage: bool,
    pub use_filesystem: bool,
    /// `None` disables category gating entirely; `Some` is an explicit
    /// allow-list (an empty list keeps nothing).
    pub instance_check_categories: Option<Vec<String>>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            use_llm: false,
            use_plugin_usage: true,
            use_filesystem: true,
            instance_check_categories: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub parallel: bool,
    pub workers: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            workers: 1,
        }
    }
}

/// Immutable, process-wide configuration for one run.
#[derive(Debug, Clone, Default)]
pub struct AdvisorConfig {
    pub filters: FilterConfig,
    pub run: RunConfig,
    pub llm_id: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub deployer_host: Option<String>,
    pub platform_version_override: Option<String>,
    pub check_settings: Value,
}

impl AdvisorConfig {
    /// Per-check parameter object captured into the check at construction.
    pub fn check_parameters(&self, check_name: &str) -> Value {
        self.check_settings
            .get(check_name)
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()))
    }

    /// Runtime platform version, honoring the override used for
    /// compatibility testing against not-yet-deployed releases.
    pub fn platform_version(&self, reported: &str) -> Result<Version> {
        let raw = self.platform_version_override.as_deref().unwrap_or(reported);
        parse_platform_version(raw)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilterConfigFile {
    use_llm: Option<bool>,
    use_plugin_usage: Option<bool>,
    use_filesystem: Option<bool>,
    instance_check_categories: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RunConfigFile {
    parallel: Option<bool>,
    workers: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    check_filters: FilterConfigFile,
    #[serde(default)]
    run_config: RunConfigFile,
    llm_id: Option<String>,
    data_dir: Option<PathBuf>,
    deployer_host: Option<String>,
    platform_version_override: Option<String>,
    #[serde(default)]
    check_settings: Value,
}

/// Build the run configuration from the optional JSON config file plus CLI
/// flags (flags win), then validate. Validation failures are fatal and
/// happen before any assessment executes.
pub fn build_config(args: &RunArgs) -> Result<AdvisorConfig> {
    let file = match &args.config_path {
        Some(path) => {
            let raw = fs::read(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            serde_json::from_slice::<ConfigFile>(&raw)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?
        }
        None => ConfigFile::default(),
    };

    let defaults = FilterConfig::default();
    let mut filters = FilterConfig {
        use_llm: file.check_filters.use_llm.unwrap_or(defaults.use_llm),
        use_plugin_usage: file
            .check_filters
            .use_plugin_usage
            .unwrap_or(defaults.use_plugin_usage),
        use_filesystem: file
            .check_filters
            .use_filesystem
            .unwrap_or(defaults.use_filesystem),
        instance_check_categories: file.check_filters.instance_check_categories,
    };
    if args.use_llm {
        filters.use_llm = true;
    }
    if args.no_plugin_usage {
        filters.use_plugin_usage = false;
    }
    if args.no_filesystem {
        filters.use_filesystem = false;
    }
    if !args.instance_check_categories.is_empty() {
        filters.instance_check_categories = Some(args.instance_check_categories.clone());
    }

    let run_defaults = RunConfig::default();
    let run = RunConfig {
        parallel: args.parallel || file.run_config.parallel.unwrap_or(run_defaults.parallel),
        workers: args
            .workers
            .or(file.run_config.workers)
            .unwrap_or(run_defaults.workers),
    };

    let config = AdvisorConfig {
        filters,
        run,
        llm_id: file.llm_id,
        data_dir: file.data_dir,
        deployer_host: file.deployer_host,
        platform_version_override: args
            .platform_version
            .clone()
            .or(file.platform_version_override),
        check_settings: if file.check_settings.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            file.check_settings
        },
    };
    validate_config(&config)?;

    info!(
        parallel = config.run.parallel,
        workers = config.run.workers,
        use_llm = config.filters.use_llm,
        use_plugin_usage = config.filters.use_plugin_usage,
        use_filesystem = config.filters.use_filesystem,
        "run configuration built"
    );
    Ok(config)
}

fn validate_config(config: &AdvisorConfig) -> Result<()> {
    if config.run.workers == 0 {
        bail!("workers must be at least 1");
    }
    if config.filters.use_llm && config.llm_id.is_none() {
        bail!("llm-powered assessments are enabled but no llm_id is configured");
    }
    if !config.check_settings.is_object() {
        bail!("check_settings must be a json object keyed by check name");
    }
    if let Some(host) = &config.deployer_host {
        ensure_url(host, "deployer host")?;
    }
    Ok(())
}

fn ensure_url(value: &str, label: &str) -> Result<()> {
    if value.is_empty() {
        bail!("{label} URL should not be empty");
    }
    let pattern = Regex::new(r"^https?://\S+$").context("failed to compile URL regex")?;
    if !pattern.is_match(value) {
        bail!("invalid {label} URL: {value}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> RunArgs {
        RunArgs {
            snapshot: PathBuf::from("snapshot.json"),
            report_root: PathBuf::from(".advisor/report"),
            backend_root: PathBuf::from(".advisor/backend"),
            addon_dir: None,
            config_path: None,
            parallel: false,
            workers: None,
            use_llm: false,
            no_plugin_usage: false,
            no_filesystem: false,
            instance_check_categories: Vec::new(),
            platform_version: None,
            summary_out: None,
        }
    }

    #[test]
    fn defaults_are_sequential_and_permissive() {
        let config = build_config(&base_args()).unwrap();
        assert!(!config.run.parallel);
        assert_eq!(config.run.workers, 1);
        assert!(config.filters.use_plugin_usage);
        assert!(config.filters.instance_check_categories.is_none());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut args = base_args();
        args.workers = Some(0);
        assert!(build_config(&args).is_err());
    }

    #[test]
    fn llm_toggle_requires_an_llm_id() {
        let mut args = base_args();
        args.use_llm = true;
        assert!(build_config(&args).is_err());
    }

    #[test]
    fn malformed_host_fails_fast() {
        assert!(ensure_url("https://deployer.example.com", "deployer host").is_ok());
        assert!(ensure_url("deployer.example.com", "deployer host").is_err());
        assert!(ensure_url("", "deployer host").is_err());
    }

    #[test]
    fn check_parameters_default_to_empty_object() {
        let mut config = AdvisorConfig::default();
        config.check_settings = serde_json::json!({
            "dataset_naming_check": {"pattern": "^[a-z_]+$"}
        });
        assert_eq!(
            config.check_parameters("dataset_naming_check")["pattern"],
            "^[a-z_]+$"
        );
        assert!(config.check_parameters("unknown").as_object().unwrap().is_empty());
    }
}
