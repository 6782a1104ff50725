//! Workflow status step.
//!
//! Status is read-only: it compares config files against the digests
//! recorded at setup and summarizes the last run report.
use super::context::WorkContext;
use crate::cli::StatusArgs;
use crate::exec::{load_report, RunSummary, StepStatus};
use crate::manifest::{config_status, ConfigState, ConfigStatus};
use crate::util::{display_path, truncate_string};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;

const MESSAGE_PREVIEW_BYTES: usize = 160;

#[derive(Debug, Serialize)]
pub struct StatusSummary {
    pub work_dir: PathBuf,
    pub tasks: Vec<String>,
    pub configs: Vec<ConfigStatus>,
    /// True when any config file was edited or removed after setup.
    pub stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<LastRun>,
}

#[derive(Debug, Serialize)]
pub struct LastRun {
    pub finished_at_epoch_ms: u128,
    pub success: bool,
    pub summary: RunSummary,
    pub steps: Vec<StepLine>,
}

#[derive(Debug, Serialize)]
pub struct StepLine {
    pub path: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn run_status(args: &StatusArgs) -> Result<()> {
    let summary = status_summary(args)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("work dir: {}", summary.work_dir.display());
    println!("tasks: {}", summary.tasks.len());
    for config in &summary.configs {
        if config.state != ConfigState::Unchanged {
            let state = format!("{:?}", config.state).to_lowercase();
            println!("  {state}: {}", config.filepath);
        }
    }
    if !summary.stale {
        println!("configs: unchanged since setup");
    }
    match &summary.last_run {
        Some(run) => {
            let s = &run.summary;
            println!(
                "last run: {} (succeeded {}, failed {}, blocked {}, already complete {})",
                if run.success { "ok" } else { "failed" },
                s.succeeded,
                s.failed,
                s.blocked,
                s.satisfied
            );
            for step in &run.steps {
                if matches!(step.status, StepStatus::Failed | StepStatus::Blocked) {
                    let status = format!("{:?}", step.status).to_lowercase();
                    let message = step.message.as_deref().unwrap_or_default();
                    println!("  {status}: {} {message}", step.path);
                }
            }
        }
        None => println!("last run: none"),
    }
    Ok(())
}

fn status_summary(args: &StatusArgs) -> Result<StatusSummary> {
    let ctx = WorkContext::load(&args.work_dir)?;
    let configs = config_status(&ctx.paths, &ctx.manifest);
    let stale = configs
        .iter()
        .any(|config| config.state != ConfigState::Unchanged);

    let last_run = if ctx.paths.report_path().is_file() {
        let report = load_report(&ctx.paths).with_context(|| {
            format!(
                "load {}",
                display_path(&ctx.paths.report_path(), Some(ctx.paths.root()))
            )
        })?;
        let steps = report
            .steps
            .iter()
            .map(|step| StepLine {
                path: step.path.clone(),
                status: step.status,
                kind: step.kind.clone(),
                message: step
                    .message
                    .as_deref()
                    .map(|message| truncate_string(message, MESSAGE_PREVIEW_BYTES)),
            })
            .collect();
        Some(LastRun {
            finished_at_epoch_ms: report.finished_at_epoch_ms,
            success: report.success(),
            summary: report.summary.clone(),
            steps,
        })
    } else {
        None
    };

    Ok(StatusSummary {
        work_dir: ctx.paths.root().to_path_buf(),
        tasks: ctx.manifest.task_paths(),
        configs,
        stale,
        last_run,
    })
}
