//! CLI argument parsing for the setup/run workflow.
//!
//! The CLI stays thin: each subcommand maps onto one workflow function and
//! carries no policy of its own.
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "otask",
    version,
    about = "Set up and run ocean model regression tasks",
    after_help = "Examples:\n  otask list\n  otask setup --work-dir /tmp/ocean --task planar/manufactured_solution/default\n  otask run --work-dir /tmp/ocean --jobs 4\n  otask status --work-dir /tmp/ocean --json",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level workflow commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    List(ListArgs),
    Setup(SetupArgs),
    Run(RunArgs),
    Status(StatusArgs),
}

impl Command {
    pub fn verbose(&self) -> bool {
        match self {
            Command::Setup(args) => args.verbose,
            Command::Run(args) => args.verbose,
            Command::List(_) | Command::Status(_) => false,
        }
    }
}

#[derive(Parser, Debug)]
#[command(about = "List every registered task")]
pub struct ListArgs {
    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

/// Exactly one way of picking tasks.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct TaskSelection {
    /// Task path relative to the work dir (repeatable)
    #[arg(long = "task", value_name = "PATH")]
    pub tasks: Vec<String>,

    /// Task index as printed by `otask list` (repeatable)
    #[arg(long = "number", value_name = "N")]
    pub numbers: Vec<usize>,

    /// Set up every registered task
    #[arg(long)]
    pub all: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Materialize tasks, steps and configs into a work dir")]
pub struct SetupArgs {
    /// Work directory receiving step dirs, configs and the setup manifest
    #[arg(long, value_name = "DIR")]
    pub work_dir: PathBuf,

    #[command(flatten)]
    pub selection: TaskSelection,

    /// User config merged over every task's defaults
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Root of the external resource databases
    #[arg(long, value_name = "DIR")]
    pub database_root: Option<PathBuf>,

    /// Log at debug level
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Run set-up tasks (or single steps) in dependency order")]
pub struct RunArgs {
    /// Work directory previously populated by `otask setup`
    #[arg(long, value_name = "DIR")]
    pub work_dir: PathBuf,

    /// Run only this task's default steps (repeatable)
    #[arg(long = "task", value_name = "PATH")]
    pub tasks: Vec<String>,

    /// Run only this step and any producers it is missing (repeatable)
    #[arg(long = "step", value_name = "PATH")]
    pub steps: Vec<String>,

    /// Steps allowed to run at the same time
    #[arg(long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Emit the run report as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Log at debug level
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Summarize config drift and the last run")]
pub struct StatusArgs {
    /// Work directory previously populated by `otask setup`
    #[arg(long, value_name = "DIR")]
    pub work_dir: PathBuf,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}
