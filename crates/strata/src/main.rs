//! Strata CLI
//!
//! Offline and in-memory front end of the deployment engine: simulate a
//! blueprint tree, resolve component closures and preview reconcile
//! schedules.

mod cli;
mod commands;
mod output;

use anyhow::{Context, Result};
use clap::Parser;
use strata_core::StrataConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let config = StrataConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Simulate(args) => commands::simulate::run(args, &config).await,
        Commands::Components(cmd) => commands::components::run(cmd, &config).await,
        Commands::Schedule(cmd) => commands::schedule::run(cmd),
    }
}

/// Log to stderr so command output stays parseable. `RUST_LOG` applies
/// unless `-v` or `--quiet` is given.
fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) if !quiet && verbose == 0 => filter,
        _ => EnvFilter::new(level),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
