//! Workflow run step.
//!
//! Run rebuilds the component exactly as setup did, then lets the config
//! files in the work dir win: they are reloaded before and after the
//! recipe-driven tasks are reconfigured, so a resolution edited after setup
//! changes which steps exist.
use super::context::{build_component, WorkContext};
use crate::cli::RunArgs;
use crate::component::{Component, StepId};
use crate::compute::BuiltinCompute;
use crate::database::ResourceStore;
use crate::exec::{append_history, write_report, Executor, RunReport};
use crate::layout::{materialize, reload_configs, select_steps, ConfigWrite};
use crate::util::now_epoch_ms;
use crate::viz::SummaryPlotter;
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Returns whether every scheduled step succeeded.
pub fn run_run(args: &RunArgs) -> Result<bool> {
    let ctx = WorkContext::load(&args.work_dir)?;
    let tasks = ctx.manifest.task_paths();

    let mut component = build_component()?;
    let reloaded = reload_configs(&mut component, &ctx.paths, &tasks)
        .context("reload config files")?;
    for task in &tasks {
        let diff = component
            .configure_task(task)
            .with_context(|| format!("configure task {task}"))?;
        if !diff.is_empty() {
            info!(
                task = %task,
                added = diff.added.len(),
                removed = diff.removed.len(),
                "task changed since setup"
            );
        }
    }
    reload_configs(&mut component, &ctx.paths, &tasks).context("reload config files")?;
    debug!(reloaded, "config files reloaded");

    let steps = select_steps(&component, &tasks).context("select steps")?;
    materialize(&component, &ctx.paths, &tasks, &steps, ConfigWrite::KeepExisting)
        .with_context(|| format!("materialize {}", ctx.paths.root().display()))?;

    let targets = targets(&component, &tasks, args)?;
    let jobs = jobs(&ctx, args)?;
    let store = ResourceStore::new(ctx.manifest.database_root.clone());
    debug!(database_root = %store.root().display(), "resource store");
    let compute = BuiltinCompute;
    let plotter = SummaryPlotter;
    let executor = Executor::new(&component, &ctx.paths, &store, &compute, &plotter).jobs(jobs);

    let started = now_epoch_ms();
    let outcome = executor.run(&targets).context("execute steps")?;
    let finished = now_epoch_ms();

    let report_tasks = if args.tasks.is_empty() {
        tasks
    } else {
        args.tasks.clone()
    };
    let report = RunReport::build(&component, &outcome, report_tasks, started, finished)?;
    write_report(&ctx.paths, &report)
        .with_context(|| format!("write {}", ctx.paths.report_path().display()))?;
    append_history(&ctx.paths, &report.history_entry())
        .with_context(|| format!("append {}", ctx.paths.history_path().display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for step in &report.steps {
            let detail = step
                .message
                .as_deref()
                .or(step.blocked_by.as_deref())
                .unwrap_or_default();
            let status = format!("{:?}", step.status).to_lowercase();
            println!("{status:<10} {} {detail}", step.path);
        }
        let summary = &report.summary;
        println!(
            "succeeded {}, failed {}, blocked {}, already complete {}",
            summary.succeeded, summary.failed, summary.blocked, summary.satisfied
        );
    }
    Ok(report.success())
}

/// `--step` and `--task` targets in the order given, else every default
/// step of every set-up task.
fn targets(component: &Component, tasks: &[String], args: &RunArgs) -> Result<Vec<StepId>> {
    let mut targets = Vec::new();
    for path in &args.tasks {
        let task = component
            .task(path)
            .with_context(|| format!("select task {path}"))?;
        if !tasks.iter().any(|known| known == task.subdir()) {
            return Err(anyhow!("task {path} was not set up in this work dir"));
        }
        targets.extend(task.default_steps());
    }
    for path in &args.steps {
        let id = component
            .require_step_id(path.trim_matches('/'))
            .with_context(|| format!("select step {path}"))?;
        targets.push(id);
    }
    if args.tasks.is_empty() && args.steps.is_empty() {
        for path in tasks {
            targets.extend(component.task(path)?.default_steps());
        }
    }
    let mut seen = BTreeSet::new();
    targets.retain(|id| seen.insert(*id));
    Ok(targets)
}

/// `--jobs`, else `[execution] jobs` from the user config, else one per core.
fn jobs(ctx: &WorkContext, args: &RunArgs) -> Result<usize> {
    if let Some(jobs) = args.jobs {
        return Ok(jobs);
    }
    if let Some(user) = ctx.user_config()? {
        if user.has_option("execution", "jobs") {
            let jobs = user.getint("execution", "jobs")?;
            return usize::try_from(jobs)
                .map_err(|_| anyhow!("[execution] jobs must be positive, got {jobs}"));
        }
    }
    Ok(std::thread::available_parallelism()
        .map(usize::from)
        .unwrap_or(1))
}
