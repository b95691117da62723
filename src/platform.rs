//! Entity accessor seam between the engine and the managed platform.
//!
//! The engine never interprets platform internals beyond what this module
//! exposes: child entity enumeration, tag/status metadata and the handful of
//! per-entity collections the leaf assessments read. The built-in
//! implementation is backed by a JSON environment snapshot; a live API
//! client would implement the same trait.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_root_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub name: String,
    #[serde(default)]
    pub connection_type: String,
    #[serde(default)]
    pub shared: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecipeSummary {
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub engine: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioSummary {
    pub id: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub auto_trigger: bool,
    #[serde(default)]
    pub last_run_outcome: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExposedObject {
    pub object_type: String,
    pub local_name: String,
    pub target_project_key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectPermission {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub write_project_content: bool,
    #[serde(default)]
    pub admin: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub project_key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owner_login: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_root_path")]
    pub folder_path: String,
    #[serde(default)]
    pub last_modified_on: Option<String>,
    #[serde(default)]
    pub datasets: Vec<DatasetSummary>,
    #[serde(default)]
    pub recipes: Vec<RecipeSummary>,
    #[serde(default)]
    pub scenarios: Vec<ScenarioSummary>,
    #[serde(default)]
    pub wiki_articles: Vec<String>,
    #[serde(default)]
    pub exposed_objects: Vec<ExposedObject>,
    #[serde(default)]
    pub permissions: Vec<ProjectPermission>,
}

impl ProjectSummary {
    pub fn status_or_default(&self) -> &str {
        self.status.as_deref().unwrap_or("NO_STATUS")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginUsage {
    pub project_key: String,
    #[serde(default)]
    pub object_id: String,
    #[serde(default)]
    pub object_type: String,
    #[serde(default)]
    pub element_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginSummary {
    pub id: String,
    #[serde(default)]
    pub dev: bool,
    #[serde(default)]
    pub usages: Vec<PluginUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub login: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub last_login_on: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentSummary {
    pub deployment_id: String,
    #[serde(default)]
    pub infra_id: String,
    pub source_project_key: String,
    pub deployed_project_key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub platform_version: String,
    #[serde(default)]
    pub projects: Vec<ProjectSummary>,
    #[serde(default)]
    pub plugins: Vec<PluginSummary>,
    #[serde(default)]
    pub users: Vec<UserSummary>,
    #[serde(default)]
    pub deployments: Vec<DeploymentSummary>,
}

/// Read-only view of the managed environment. Implementations must be safe
/// to share across the worker pool.
pub trait Platform: Send + Sync {
    fn version_string(&self) -> Result<String>;
    fn list_project_keys(&self) -> Result<Vec<String>>;
    fn project(&self, project_key: &str) -> Result<ProjectSummary>;
    fn list_plugins(&self) -> Result<Vec<PluginSummary>>;
    fn list_users(&self) -> Result<Vec<UserSummary>>;
    fn list_deployments(&self) -> Result<Vec<DeploymentSummary>>;
}

/// Platform backed by a JSON environment snapshot file.
#[derive(Debug, Clone)]
pub struct SnapshotPlatform {
    snapshot: EnvironmentSnapshot,
}

impl SnapshotPlatform {
    pub fn new(snapshot: EnvironmentSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read(path)
            .with_context(|| format!("failed to read environment snapshot: {}", path.display()))?;
        let snapshot: EnvironmentSnapshot = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse environment snapshot: {}", path.display()))?;
        Ok(Self::new(snapshot))
    }
}

impl Platform for SnapshotPlatform {
    fn version_string(&self) -> Result<String> {
        Ok(self.snapshot.platform_version.clone())
    }

    fn list_project_keys(&self) -> Result<Vec<String>> {
        Ok(self
            .snapshot
            .projects
            .iter()
            .map(|project| project.project_key.clone())
            .collect())
    }

    fn project(&self, project_key: &str) -> Result<ProjectSummary> {
        match self
            .snapshot
            .projects
            .iter()
            .find(|project| project.project_key == project_key)
        {
            Some(project) => Ok(project.clone()),
            None => bail!("unknown project key: {project_key}"),
        }
    }

    fn list_plugins(&self) -> Result<Vec<PluginSummary>> {
        Ok(self.snapshot.plugins.clone())
    }

    fn list_users(&self) -> Result<Vec<UserSummary>> {
        Ok(self.snapshot.users.clone())
    }

    fn list_deployments(&self) -> Result<Vec<DeploymentSummary>> {
        Ok(self.snapshot.deployments.clone())
    }
}
