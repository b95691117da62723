mod advisor;
mod assessments;
mod backend;
mod cli;
mod commands;
mod config;
mod engine;
mod filter;
mod model;
mod platform;
mod registry;
mod report;
mod severity;
mod store;
mod util;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Project(args) => commands::project::run(args),
        Commands::Batch(args) => commands::batch::run(args),
        Commands::Instance(args) => commands::instance::run(args),
        Commands::Backend(args) => commands::backend::run(args),
        Commands::History(args) => commands::history::run(args),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
