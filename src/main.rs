use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod cli;
mod component;
mod compute;
mod config;
mod database;
mod dataset;
mod error;
mod exec;
mod graph;
mod layout;
mod manifest;
mod ocean;
mod paths;
mod resolution;
mod util;
mod viz;
mod workflow;

use cli::{Command, RootArgs};

/// Environment variable holding a `tracing` filter directive.
const LOG_ENV: &str = "OTASK_LOG";

fn main() -> ExitCode {
    let args = RootArgs::parse();
    init_tracing(args.command.verbose());

    let result = match &args.command {
        Command::List(args) => workflow::run_list(args).map(|()| true),
        Command::Setup(args) => workflow::run_setup(args).map(|()| true),
        Command::Run(args) => workflow::run_run(args),
        Command::Status(args) => workflow::run_status(args).map(|()| true),
    };
    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
