//! Execution of a step subset in dependency order.
//!
//! The driver expands the requested targets with any producer whose outputs
//! are not on disk yet, computes topological levels, and runs each level in
//! parallel on a rayon pool. Every canonical step runs at most once per
//! call. A failure marks the transitive dependents blocked while
//! independent branches carry on.
mod materialize;
mod report;

pub use report::{append_history, load_report, write_report, RunReport, RunSummary};

use crate::component::{Component, RunContext, Step, StepId};
use crate::compute::ComputeBackend;
use crate::database::ResourceStore;
use crate::dataset::validate_artifact;
use crate::error::{Error, Result};
use crate::graph;
use crate::paths::WorkDirPaths;
use crate::viz::Plotter;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    /// A producer failed, so the step never ran.
    Blocked,
    /// Not scheduled; its outputs were already on disk.
    Satisfied,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub status: StepStatus,
    pub error_kind: Option<&'static str>,
    pub message: Option<String>,
    pub blocked_by: Option<StepId>,
    pub duration: Duration,
    pub executions: u32,
}

impl StepOutcome {
    fn succeeded(duration: Duration) -> Self {
        Self {
            status: StepStatus::Succeeded,
            error_kind: None,
            message: None,
            blocked_by: None,
            duration,
            executions: 1,
        }
    }

    fn failed(err: &Error, duration: Duration) -> Self {
        Self {
            status: StepStatus::Failed,
            error_kind: Some(err.kind()),
            message: Some(err.to_string()),
            blocked_by: None,
            duration,
            executions: 1,
        }
    }

    fn blocked(by: StepId) -> Self {
        Self {
            status: StepStatus::Blocked,
            error_kind: None,
            message: None,
            blocked_by: Some(by),
            duration: Duration::ZERO,
            executions: 0,
        }
    }

    fn satisfied() -> Self {
        Self {
            status: StepStatus::Satisfied,
            error_kind: None,
            message: None,
            blocked_by: None,
            duration: Duration::ZERO,
            executions: 0,
        }
    }
}

/// Per-step results of one execution pass.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub steps: BTreeMap<StepId, StepOutcome>,
}

impl RunOutcome {
    pub fn status(&self, id: StepId) -> Option<StepStatus> {
        self.steps.get(&id).map(|outcome| outcome.status)
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.steps
            .values()
            .filter(|outcome| outcome.status == status)
            .count()
    }

    /// True when nothing failed or was blocked.
    pub fn success(&self) -> bool {
        self.count(StepStatus::Failed) == 0 && self.count(StepStatus::Blocked) == 0
    }
}

/// Which steps a call will run and which producers it takes as given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub scheduled: BTreeSet<StepId>,
    pub satisfied: BTreeSet<StepId>,
}

/// Runs steps of a component that is no longer being mutated.
pub struct Executor<'a> {
    component: &'a Component,
    paths: &'a WorkDirPaths,
    store: &'a ResourceStore,
    compute: &'a dyn ComputeBackend,
    plotter: &'a dyn Plotter,
    jobs: usize,
}

impl<'a> Executor<'a> {
    pub fn new(
        component: &'a Component,
        paths: &'a WorkDirPaths,
        store: &'a ResourceStore,
        compute: &'a dyn ComputeBackend,
        plotter: &'a dyn Plotter,
    ) -> Self {
        Self {
            component,
            paths,
            store,
            compute,
            plotter,
            jobs: 1,
        }
    }

    /// Upper bound on steps running at the same time.
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Expand `targets` with producers whose outputs are missing.
    pub fn plan(&self, targets: &[StepId]) -> Result<ExecutionPlan> {
        let requested: BTreeSet<StepId> = targets.iter().copied().collect();
        let mut plan = ExecutionPlan::default();
        let mut queue: VecDeque<StepId> = targets.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if !plan.scheduled.insert(id) {
                continue;
            }
            for dep in graph::dependencies(self.component, id)? {
                if plan.scheduled.contains(&dep) || plan.satisfied.contains(&dep) {
                    continue;
                }
                if !requested.contains(&dep) && self.outputs_present(dep)? {
                    debug!(step = %self.path(dep), "producer already complete");
                    plan.satisfied.insert(dep);
                } else {
                    queue.push_back(dep);
                }
            }
        }
        Ok(plan)
    }

    /// Run `targets` (and any incomplete producers) to completion.
    pub fn run(&self, targets: &[StepId]) -> Result<RunOutcome> {
        let plan = self.plan(targets)?;
        let graph = graph::build(self.component, &plan.scheduled)?;
        let mut outcome = RunOutcome::default();
        for id in &plan.satisfied {
            outcome.steps.insert(*id, StepOutcome::satisfied());
        }
        if graph.is_empty() {
            debug!("nothing to execute");
            return Ok(outcome);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build()
            .map_err(|err| Error::compute(format!("build worker pool: {err}")))?;
        info!(
            steps = graph.len(),
            levels = graph.levels().len(),
            jobs = self.jobs,
            "executing"
        );

        for level in graph.levels() {
            let ready: Vec<StepId> = level
                .iter()
                .copied()
                .filter(|id| outcome.status(*id).is_none())
                .collect();

            let results: Vec<(StepId, Duration, Result<()>)> = pool.install(|| {
                ready
                    .par_iter()
                    .map(|&id| {
                        let started = Instant::now();
                        let result = self.run_step(id);
                        (id, started.elapsed(), result)
                    })
                    .collect()
            });

            // Apply results sequentially for determinism
            for (id, elapsed, result) in results {
                match result {
                    Ok(()) => {
                        outcome.steps.insert(id, StepOutcome::succeeded(elapsed));
                    }
                    Err(err) => {
                        warn!(step = %self.path(id), error = %err, "step failed");
                        outcome.steps.insert(id, StepOutcome::failed(&err, elapsed));
                        for blocked in graph.downstream(id) {
                            outcome
                                .steps
                                .entry(blocked)
                                .or_insert_with(|| StepOutcome::blocked(id));
                        }
                    }
                }
            }
        }
        info!(
            success = outcome.success(),
            failed = outcome.count(StepStatus::Failed),
            blocked = outcome.count(StepStatus::Blocked),
            "execution finished"
        );
        Ok(outcome)
    }

    fn run_step(&self, id: StepId) -> Result<()> {
        let step = self.component.step_by_id(id)?;
        let span = info_span!("step", path = step.subdir());
        let _guard = span.enter();
        self.execute(id, step)
            .map_err(|err| err.in_step(step.subdir()))
    }

    fn execute(&self, id: StepId, step: &Step) -> Result<()> {
        let config = self.component.effective_config(id)?;
        step.runner().check_preconditions(config)?;

        let step_dir = self.paths.dir(step.subdir());
        fs::create_dir_all(&step_dir).map_err(|err| Error::io(&step_dir, err))?;
        let linked = materialize::link_inputs(self.component, self.paths, self.store, step)?;
        debug!(inputs = linked, "inputs linked");

        let started = Instant::now();
        let ctx = RunContext {
            step_path: step.subdir(),
            step_dir: step_dir.clone(),
            config,
            compute: self.compute,
            plotter: self.plotter,
        };
        step.runner().run(&ctx)?;

        for output in step.outputs() {
            validate_artifact(&step_dir.join(&output.filename), &output.validate_vars)?;
        }
        info!(elapsed_ms = started.elapsed().as_millis() as u64, "step finished");
        Ok(())
    }

    fn outputs_present(&self, id: StepId) -> Result<bool> {
        let step = self.component.step_by_id(id)?;
        let step_dir = self.paths.dir(step.subdir());
        Ok(!step.outputs().is_empty()
            && step
                .outputs()
                .iter()
                .all(|output| step_dir.join(&output.filename).is_file()))
    }

    fn path(&self, id: StepId) -> &str {
        self.component
            .step_by_id(id)
            .map(Step::subdir)
            .unwrap_or_default()
    }
}

/// Run every step's precondition check; the first failure aborts setup.
pub fn check_preconditions(component: &Component, steps: &BTreeSet<StepId>) -> Result<()> {
    for &id in steps {
        let step = component.step_by_id(id)?;
        let config = component.effective_config(id)?;
        step.runner()
            .check_preconditions(config)
            .map_err(|err| err.in_step(step.subdir()))?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "exec_tests.rs"]
mod tests;
