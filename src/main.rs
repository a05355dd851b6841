mod cli;
mod commands;
mod config;
mod corpus;
mod engine;
mod followup;
mod keywords;
mod model;
mod semantic;
mod store;
mod util;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::engine::EngineCell;

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
    let engines = EngineCell::new();

    match cli.command {
        Commands::Index(args) => commands::index::run(args),
        Commands::Diagnose(args) => commands::diagnose::run(args, &engines),
        Commands::Analyze(args) => commands::analyze::run(args, &engines),
        Commands::Evaluate(args) => commands::evaluate::run(args, &engines),
        Commands::Status(args) => commands::status::run(args),
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
