use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::model::ScopeKind;

#[derive(Parser, Debug)]
#[command(
    name = "advisor",
    version,
    about = "Assessment orchestration and reporting for managed platform environments"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Project(ProjectArgs),
    Batch(BatchArgs),
    Instance(InstanceArgs),
    Backend(BackendArgs),
    History(HistoryArgs),
}

/// Flags shared by every command that executes assessments.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long)]
    pub snapshot: PathBuf,

    #[arg(long, default_value = ".advisor/report")]
    pub report_root: PathBuf,

    #[arg(long, default_value = ".advisor/backend")]
    pub backend_root: PathBuf,

    #[arg(long)]
    pub addon_dir: Option<PathBuf>,

    #[arg(long)]
    pub config_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub parallel: bool,

    #[arg(long)]
    pub workers: Option<usize>,

    #[arg(long, default_value_t = false)]
    pub use_llm: bool,

    #[arg(long, default_value_t = false)]
    pub no_plugin_usage: bool,

    #[arg(long, default_value_t = false)]
    pub no_filesystem: bool,

    #[arg(long = "instance-check-category")]
    pub instance_check_categories: Vec<String>,

    #[arg(long)]
    pub platform_version: Option<String>,

    #[arg(long)]
    pub summary_out: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
    #[command(flatten)]
    pub run: RunArgs,

    #[arg(long)]
    pub project_key: String,
}

#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    #[command(flatten)]
    pub run: RunArgs,

    #[arg(long = "project-key")]
    pub project_keys: Vec<String>,

    #[arg(long = "project-status")]
    pub project_statuses: Vec<String>,

    #[arg(long = "tag")]
    pub tags: Vec<String>,

    #[arg(long)]
    pub folder_path: Option<String>,

    #[arg(long, default_value_t = false)]
    pub rebuild_backend: bool,
}

#[derive(Args, Debug, Clone)]
pub struct InstanceArgs {
    #[command(flatten)]
    pub run: RunArgs,

    #[arg(long, default_value_t = false)]
    pub rebuild_backend: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum BackendAction {
    Build,
    Save,
    Status,
}

#[derive(Args, Debug, Clone)]
pub struct BackendArgs {
    #[command(flatten)]
    pub run: RunArgs,

    #[arg(long, value_enum, default_value_t = BackendAction::Save)]
    pub action: BackendAction,

    #[arg(long = "table")]
    pub tables: Vec<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ScopeArg {
    Project,
    Instance,
}

impl ScopeArg {
    pub fn to_scope(self) -> ScopeKind {
        match self {
            Self::Project => ScopeKind::Project,
            Self::Instance => ScopeKind::Instance,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct HistoryArgs {
    #[arg(long, default_value = ".advisor/report")]
    pub report_root: PathBuf,

    #[arg(long, value_enum, default_value_t = ScopeArg::Project)]
    pub scope: ScopeArg,

    #[arg(long, default_value_t = 5)]
    pub last: usize,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}
