//! CLI argument parsing with clap

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};

/// Strata - blueprint based deployment orchestration
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to strata.yaml config file
    #[arg(short, long, global = true)]
    pub config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render an installation tree without deploying anything
    Simulate(SimulateArgs),

    /// Component descriptor commands
    #[command(subcommand)]
    Components(ComponentsCommands),

    /// Continuous reconcile schedules
    #[command(subcommand)]
    Schedule(ScheduleCommands),
}

/// Root component of a local registry
#[derive(Args, Debug, Clone)]
pub struct ComponentArgs {
    /// Directory with <component>/component-descriptor.yaml entries
    #[arg(short, long)]
    pub registry: Utf8PathBuf,

    /// Component name, e.g. example.com/root
    #[arg(long)]
    pub component: String,

    /// Component version
    #[arg(long)]
    pub component_version: String,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub root: ComponentArgs,

    /// Blueprint resource of the root component
    #[arg(long, default_value = "blueprint")]
    pub resource: String,

    /// YAML file with `data` and `targets` import maps
    #[arg(short, long)]
    pub imports: Option<Utf8PathBuf>,

    /// YAML file with `deployItemExports` and `installationExports` templates
    #[arg(short, long)]
    pub export_templates: Option<Utf8PathBuf>,

    /// Reconcile against an in-memory store with the mock deployer
    #[arg(long)]
    pub live: bool,

    /// Maximum settle rounds of a live run
    #[arg(long, default_value_t = 100, requires = "live")]
    pub max_rounds: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum ComponentsCommands {
    /// Resolve the transitive component closure of a root component
    Resolve(ComponentsResolveArgs),
}

#[derive(Args, Debug)]
pub struct ComponentsResolveArgs {
    #[command(flatten)]
    pub root: ComponentArgs,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum ScheduleCommands {
    /// Print the next activations of a schedule
    Next(ScheduleNextArgs),
}

#[derive(Args, Debug)]
pub struct ScheduleNextArgs {
    /// Cron expression (5 fields or @daily style descriptor)
    #[arg(long, conflicts_with = "every", required_unless_present = "every")]
    pub cron: Option<String>,

    /// Fixed interval such as 1h30m
    #[arg(long)]
    pub every: Option<String>,

    /// Start time (RFC 3339), defaults to now
    #[arg(long)]
    pub after: Option<DateTime<Utc>>,

    /// Number of activations to print
    #[arg(short = 'n', long, default_value_t = 5)]
    pub count: usize,
}
