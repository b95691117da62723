//! Precomputation cache: expensive instance-wide tables built once before a
//! run, persisted as versioned CSV blobs, and read-only during execution.
//!
//! Every table is built, saved and loaded independently. A failing table
//! never blocks the others; consumers treat an absent table as "feature not
//! available" and go `NotApplicable`, never error.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::platform::Platform;
use crate::store::{DataTable, FolderStore};
use crate::util::format_run_timestamp;

pub const TABLE_NAMES: [&str; 8] = [
    "project_dependencies",
    "project_deployments",
    "plugins_usage",
    "project_to_folder_path",
    "projects",
    "users",
    "user_to_project_mapping",
    "scenarios",
];

#[derive(Debug, Clone)]
pub enum TableSelection {
    All,
    Names(Vec<String>),
}

impl TableSelection {
    /// Known table names in the selection; unknown names are dropped with a
    /// warning.
    pub fn resolve(&self) -> Vec<&str> {
        match self {
            Self::All => TABLE_NAMES.to_vec(),
            Self::Names(names) => names
                .iter()
                .filter_map(|name| match TABLE_NAMES.iter().find(|known| *known == name) {
                    Some(known) => Some(*known),
                    None => {
                        warn!(table = %name, "unknown backend table name, skipping");
                        None
                    }
                })
                .collect(),
        }
    }
}

pub struct BackendClient {
    store: FolderStore,
    tables: BTreeMap<String, DataTable>,
}

impl BackendClient {
    pub fn new(store: FolderStore) -> Self {
        Self {
            store,
            tables: BTreeMap::new(),
        }
    }

    /// Client with no persistence root in use; tables live only in memory.
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self::new(FolderStore::new(std::env::temp_dir().join("advisor-backend-unused")))
    }

    /// Consumers treat `None` as "feature not available", not an error.
    pub fn get_table(&self, name: &str) -> Option<&DataTable> {
        self.tables.get(name)
    }

    pub fn row_count(&self, name: &str) -> Option<usize> {
        self.tables.get(name).map(DataTable::len)
    }

    /// Relative path of the newest saved version of a table, if any.
    pub fn latest_saved(&self, name: &str) -> Result<Option<String>> {
        Ok(self.store.list_paths(&format!("{name}/"))?.last().cloned())
    }

    /// Build the selected tables from the platform. Each table builds
    /// independently; a failing build logs a warning and leaves that table
    /// absent.
    pub fn build(&mut self, platform: &dyn Platform, selection: &TableSelection) {
        for name in selection.resolve() {
            match build_table(name, platform) {
                Ok(table) => {
                    debug!(table = name, rows = table.len(), "backend table built");
                    self.tables.insert(name.to_string(), table);
                }
                Err(err) => {
                    warn!(table = name, error = %format!("{err:#}"), "backend table build failed, leaving absent");
                    self.tables.remove(name);
                }
            }
        }
        info!(tables = self.tables.len(), "backend cache built");
    }

    /// Persist the selected tables as `<table>/<timestamp>.csv`. Absent
    /// tables are skipped with a warning, never written empty; a failing
    /// write is logged and never blocks the sibling tables.
    pub fn save(&self, timestamp: DateTime<Utc>, selection: &TableSelection) {
        let version = format_run_timestamp(timestamp);
        for name in selection.resolve() {
            match self.tables.get(name) {
                Some(table) => {
                    let path = format!("{name}/{version}.csv");
                    match self.store.write(&path, table.to_csv().as_bytes()) {
                        Ok(()) => debug!(table = name, path = %path, "backend table saved"),
                        Err(err) => {
                            warn!(table = name, error = %format!("{err:#}"), "failed to save backend table, skipping");
                        }
                    }
                }
                None => {
                    warn!(table = name, "backend table absent, not saving");
                }
            }
        }
    }

    /// Load the lexicographically greatest version of each selected table.
    /// A missing, unlistable or corrupt version logs a warning and leaves
    /// that table absent without blocking the others.
    pub fn load_latest(&mut self, selection: &TableSelection) {
        for name in selection.resolve() {
            let paths = match self.store.list_paths(&format!("{name}/")) {
                Ok(paths) => paths,
                Err(err) => {
                    warn!(table = name, error = %format!("{err:#}"), "failed to list backend table versions, leaving absent");
                    self.tables.remove(name);
                    continue;
                }
            };
            let Some(latest) = paths.last() else {
                warn!(table = name, "no saved version of backend table");
                self.tables.remove(name);
                continue;
            };
            let loaded = self
                .store
                .read_to_string(latest)
                .and_then(|raw| DataTable::from_csv(&raw));
            match loaded {
                Ok(table) => {
                    debug!(table = name, path = %latest, "backend table loaded");
                    self.tables.insert(name.to_string(), table);
                }
                Err(err) => {
                    warn!(table = name, path = %latest, error = %format!("{err:#}"), "backend table version unreadable, leaving absent");
                    self.tables.remove(name);
                }
            }
        }
    }
}

fn build_table(name: &str, platform: &dyn Platform) -> Result<DataTable> {
    match name {
        "projects" => build_projects(platform),
        "project_to_folder_path" => build_project_to_folder_path(platform),
        "project_dependencies" => build_project_dependencies(platform),
        "project_deployments" => build_project_deployments(platform),
        "plugins_usage" => build_plugins_usage(platform),
        "users" => build_users(platform),
        "user_to_project_mapping" => build_user_to_project_mapping(platform),
        "scenarios" => build_scenarios(platform),
        other => anyhow::bail!("unknown backend table: {other}"),
    }
}

fn build_projects(platform: &dyn Platform) -> Result<DataTable> {
    let mut table = DataTable::new(vec![
        "project_key",
        "name",
        "owner",
        "status",
        "folder_path",
        "last_modified_on",
    ]);
    for key in platform.list_project_keys()? {
        let project = platform.project(&key)?;
        table.push_row(vec![
            project.project_key.clone(),
            project.name.clone(),
            project.owner_login.clone(),
            project.status_or_default().to_string(),
            project.folder_path.clone(),
            project.last_modified_on.clone().unwrap_or_default(),
        ]);
    }
    Ok(table)
}

fn build_project_to_folder_path(platform: &dyn Platform) -> Result<DataTable> {
    let mut table = DataTable::new(vec!["project_key", "folder_path"]);
    for key in platform.list_project_keys()? {
        let project = platform.project(&key)?;
        table.push_row(vec![project.project_key.clone(), project.folder_path.clone()]);
    }
    Ok(table)
}

fn build_project_dependencies(platform: &dyn Platform) -> Result<DataTable> {
    let mut table = DataTable::new(vec![
        "project_key",
        "depends_on_project_key",
        "object_type",
        "object_id",
    ]);
    for key in platform.list_project_keys()? {
        let project = platform.project(&key)?;
        for exposed in &project.exposed_objects {
            table.push_row(vec![
                exposed.target_project_key.clone(),
                project.project_key.clone(),
                exposed.object_type.clone(),
                exposed.local_name.clone(),
            ]);
        }
    }
    Ok(table)
}

fn build_project_deployments(platform: &dyn Platform) -> Result<DataTable> {
    let mut table = DataTable::new(vec![
        "deployment_id",
        "infra_id",
        "source_project_key",
        "deployed_project_key",
    ]);
    for deployment in platform.list_deployments()? {
        table.push_row(vec![
            deployment.deployment_id,
            deployment.infra_id,
            deployment.source_project_key,
            deployment.deployed_project_key,
        ]);
    }
    Ok(table)
}

fn build_plugins_usage(platform: &dyn Platform) -> Result<DataTable> {
    let mut table = DataTable::new(vec![
        "plugin_id",
        "project_key",
        "object_id",
        "object_type",
        "element_type",
    ]);
    for plugin in platform.list_plugins()? {
        for usage in &plugin.usages {
            table.push_row(vec![
                plugin.id.clone(),
                usage.project_key.clone(),
                usage.object_id.clone(),
                usage.object_type.clone(),
                usage.element_type.clone(),
            ]);
        }
    }
    Ok(table)
}

fn build_users(platform: &dyn Platform) -> Result<DataTable> {
    let mut table = DataTable::new(vec!["login", "display_name", "enabled", "last_login_on"]);
    for user in platform.list_users()? {
        table.push_row(vec![
            user.login,
            user.display_name,
            user.enabled.to_string(),
            user.last_login_on.unwrap_or_default(),
        ]);
    }
    Ok(table)
}

fn build_user_to_project_mapping(platform: &dyn Platform) -> Result<DataTable> {
    let mut table = DataTable::new(vec!["login", "project_key", "relation"]);
    for key in platform.list_project_keys()? {
        let project = platform.project(&key)?;
        table.push_row(vec![
            project.owner_login.clone(),
            project.project_key.clone(),
            "owner".to_string(),
        ]);
        for permission in &project.permissions {
            if let Some(user) = &permission.user {
                table.push_row(vec![
                    user.clone(),
                    project.project_key.clone(),
                    "permission".to_string(),
                ]);
            }
        }
    }
    Ok(table)
}

fn build_scenarios(platform: &dyn Platform) -> Result<DataTable> {
    let mut table = DataTable::new(vec![
        "project_key",
        "scenario_id",
        "active",
        "auto_trigger",
        "last_run_outcome",
    ]);
    for key in platform.list_project_keys()? {
        let project = platform.project(&key)?;
        for scenario in &project.scenarios {
            table.push_row(vec![
                project.project_key.clone(),
                scenario.id.clone(),
                scenario.active.to_string(),
                scenario.auto_trigger.to_string(),
                scenario.last_run_outcome.clone().unwrap_or_default(),
            ]);
        }
    }
    Ok(table)
}
