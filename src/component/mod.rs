//! The registry: steps and tasks keyed by directory path, plus the arena of
//! shared config layers.
//!
//! Steps are deduplicated by path. Sibling tasks that need the same
//! expensive step look it up with `step_id` / `step_or_insert_with` and end
//! up holding the same `StepId`; registering a second, different step at an
//! occupied path is an error.
mod step;
mod task;

pub use step::{
    ConfigId, InputFile, InputSource, RunContext, Step, StepConfig, StepId, StepRunner,
};
pub use task::{ConfigureDiff, StepFactoryContext, StepPlan, Task, TaskId, TaskRecipe};

use crate::config::ConfigLayer;
use crate::error::{Error, Result};
use crate::util::{normalize_join, split_parent};
use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug)]
pub struct Component {
    name: String,
    steps: Vec<Option<Step>>,
    step_paths: BTreeMap<String, StepId>,
    tasks: IndexMap<String, Task>,
    configs: Vec<ConfigLayer>,
}

impl Component {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            step_paths: BTreeMap::new(),
            tasks: IndexMap::new(),
            configs: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ---- config arena ----

    pub fn add_config(&mut self, layer: ConfigLayer) -> ConfigId {
        self.configs.push(layer);
        ConfigId(self.configs.len() - 1)
    }

    pub fn config(&self, id: ConfigId) -> &ConfigLayer {
        &self.configs[id.0]
    }

    /// The only write path to a shared layer. Setup phase only; execution
    /// borrows the component immutably.
    pub fn config_mut(&mut self, id: ConfigId) -> &mut ConfigLayer {
        &mut self.configs[id.0]
    }

    /// Merge `user` last into every layer so user options win everywhere.
    pub fn apply_user_config(&mut self, user: &ConfigLayer) {
        for layer in &mut self.configs {
            layer.merge(user);
        }
        for step in self.steps.iter_mut().flatten() {
            if step.has_blank_config() {
                continue;
            }
            if let Ok(layer) = step.config_mut() {
                layer.merge(user);
            }
        }
    }

    /// The layer a step reads at run time.
    pub fn effective_config(&self, id: StepId) -> Result<&ConfigLayer> {
        let step = self.step_by_id(id)?;
        Ok(match step.config() {
            StepConfig::Owned(layer) => layer,
            StepConfig::Shared { config, .. } => self.config(*config),
        })
    }

    // ---- steps ----

    /// Register a new step at its directory path.
    pub fn add_step(&mut self, step: Step) -> Result<StepId> {
        if self.step_paths.contains_key(step.subdir()) {
            return Err(Error::DuplicateStep(step.subdir().to_string()));
        }
        for input in step.inputs() {
            if let InputSource::StepOutput {
                step: producer,
                filename,
            } = &input.source
            {
                let producer = self.step_by_id(*producer)?;
                if !producer.has_output(filename) {
                    return Err(Error::UndeclaredOutput {
                        consumer: step.subdir().to_string(),
                        producer: producer.subdir().to_string(),
                        filename: filename.clone(),
                    });
                }
            }
        }
        let id = StepId(self.steps.len());
        debug!(path = step.subdir(), "register step");
        self.step_paths.insert(step.subdir().to_string(), id);
        self.steps.push(Some(step));
        Ok(id)
    }

    /// Reuse the step at `path` or build and register one.
    pub fn step_or_insert_with<F>(&mut self, path: &str, build: F) -> Result<StepId>
    where
        F: FnOnce() -> Result<Step>,
    {
        if let Some(id) = self.step_id(path) {
            return Ok(id);
        }
        let step = build()?;
        if step.subdir() != path {
            return Err(Error::StepPathMismatch {
                expected: path.to_string(),
                actual: step.subdir().to_string(),
            });
        }
        self.add_step(step)
    }

    pub fn step_id(&self, path: &str) -> Option<StepId> {
        self.step_paths.get(path.trim_matches('/')).copied()
    }

    pub fn require_step_id(&self, path: &str) -> Result<StepId> {
        self.step_id(path)
            .ok_or_else(|| Error::StepNotFound(path.to_string()))
    }

    pub fn step(&self, path: &str) -> Result<&Step> {
        let id = self.require_step_id(path)?;
        self.step_by_id(id)
    }

    pub fn step_by_id(&self, id: StepId) -> Result<&Step> {
        self.steps
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::StepNotFound(id.to_string()))
    }

    pub fn step_mut(&mut self, id: StepId) -> Result<&mut Step> {
        self.steps
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::StepNotFound(id.to_string()))
    }

    /// Registered steps in path order.
    pub fn steps(&self) -> impl Iterator<Item = (StepId, &Step)> {
        self.step_paths
            .values()
            .filter_map(|id| self.steps[id.0].as_ref().map(|step| (*id, step)))
    }

    /// Number of registered steps.
    pub fn step_count(&self) -> usize {
        self.step_paths.len()
    }

    /// The producer behind one declared input, if it is a dependency edge.
    pub fn input_producer(&self, consumer: &Step, input: &InputFile) -> Option<(StepId, String)> {
        match &input.source {
            InputSource::StepOutput { step, filename } => Some((*step, filename.clone())),
            InputSource::Path(target) if !target.starts_with('/') => {
                let resolved = normalize_join(consumer.subdir(), target)?;
                let (dir, filename) = split_parent(&resolved)?;
                let producer = match self.step_id(dir) {
                    Some(id) => id,
                    None => self.step_id(&self.resolve_alias(dir)?)?,
                };
                let step = self.step_by_id(producer).ok()?;
                step.has_output(filename)
                    .then(|| (producer, filename.to_string()))
            }
            _ => None,
        }
    }

    /// Rewrite a path that enters a task alias to the canonical directory
    /// the alias points at.
    fn resolve_alias(&self, path: &str) -> Option<String> {
        for task in self.tasks.values() {
            for member in task.steps() {
                let Some(alias) = member.alias.as_deref() else {
                    continue;
                };
                let alias_path = format!("{}/{alias}", task.subdir());
                let Some(rest) = path.strip_prefix(&alias_path) else {
                    continue;
                };
                if !(rest.is_empty() || rest.starts_with('/')) {
                    continue;
                }
                let target = self.step_by_id(member.step).ok()?;
                return Some(format!("{}{rest}", target.subdir()));
            }
        }
        None
    }

    // ---- tasks ----

    /// Register a task. Members must already be registered; the task gets a
    /// config layer at `<subdir>/<name>.cfg` unless one was attached. Tasks
    /// with a recipe are configured immediately.
    pub fn add_task(&mut self, task: Task) -> Result<TaskId> {
        let path = task.subdir().to_string();
        if self.tasks.contains_key(&path) {
            return Err(Error::DuplicateTask(path));
        }
        for member in task.steps() {
            self.step_by_id(member.step)?;
        }
        self.check_aliases(&task)?;
        let has_recipe = task.has_recipe();
        let (index, _) = self.tasks.insert_full(path.clone(), task);
        let config = self.ensure_task_config(index);
        let members: Vec<StepId> = self.tasks[index].steps().iter().map(|m| m.step).collect();
        self.adopt_task_config(config, &members)?;
        debug!(task = %path, steps = members.len(), "register task");
        if has_recipe {
            self.configure_task(&path)?;
        }
        Ok(TaskId(index))
    }

    pub fn task(&self, path: &str) -> Result<&Task> {
        self.tasks
            .get(path.trim_matches('/'))
            .ok_or_else(|| Error::TaskNotFound(path.to_string()))
    }

    /// Tasks in registration order.
    pub fn tasks(&self) -> impl Iterator<Item = (TaskId, &Task)> {
        self.tasks
            .values()
            .enumerate()
            .map(|(index, task)| (TaskId(index), task))
    }

    /// Paths of every task that includes `step`.
    pub fn tasks_using(&self, step: StepId) -> Vec<&str> {
        self.tasks
            .values()
            .filter(|task| task.contains(step))
            .map(Task::subdir)
            .collect()
    }

    /// Rebuild a recipe-driven task from its current config.
    ///
    /// The previous step set is detached, steps that no other task or step
    /// still references are pruned, and the new plan is built, reusing any
    /// step that already exists at a planned path. Tasks without a recipe
    /// are left as they are.
    pub fn configure_task(&mut self, path: &str) -> Result<ConfigureDiff> {
        let index = self
            .tasks
            .get_index_of(path.trim_matches('/'))
            .ok_or_else(|| Error::TaskNotFound(path.to_string()))?;
        let task_config = self.ensure_task_config(index);
        let plans = match self.tasks[index].recipe() {
            Some(recipe) => recipe.plan(self.config(task_config))?,
            None => return Ok(ConfigureDiff::default()),
        };

        let old = self.tasks[index].steps().to_vec();
        for member in &old {
            self.tasks[index].remove_step(member.step);
        }
        let old_paths: BTreeSet<String> = old
            .iter()
            .filter_map(|member| self.step_by_id(member.step).ok())
            .map(|step| step.subdir().to_string())
            .collect();
        self.prune_orphans(old.iter().map(|member| member.step).collect());

        let mut members = Vec::with_capacity(plans.len());
        for plan in plans {
            let id = match self.step_id(&plan.subdir) {
                Some(id) => id,
                None => {
                    let ctx = StepFactoryContext {
                        component: &*self,
                        task_config,
                    };
                    let step = (plan.build)(&ctx)?;
                    if step.subdir() != plan.subdir {
                        return Err(Error::StepPathMismatch {
                            expected: plan.subdir,
                            actual: step.subdir().to_string(),
                        });
                    }
                    self.add_step(step)?
                }
            };
            members.push((id, plan.symlink, plan.run_by_default));
        }

        let task = &mut self.tasks[index];
        for (id, symlink, run_by_default) in &members {
            if *run_by_default {
                task.add_step(*id, symlink.as_deref());
            } else {
                task.add_optional_step(*id, symlink.as_deref());
            }
        }
        let ids: Vec<StepId> = members.iter().map(|(id, _, _)| *id).collect();
        self.adopt_task_config(task_config, &ids)?;
        self.check_aliases(&self.tasks[index])?;

        let new_paths: BTreeSet<String> = ids
            .iter()
            .filter_map(|id| self.step_by_id(*id).ok())
            .map(|step| step.subdir().to_string())
            .collect();
        let diff = ConfigureDiff {
            added: new_paths.difference(&old_paths).cloned().collect(),
            removed: old_paths.difference(&new_paths).cloned().collect(),
        };
        debug!(
            task = path,
            added = diff.added.len(),
            removed = diff.removed.len(),
            "configured task"
        );
        Ok(diff)
    }

    fn ensure_task_config(&mut self, index: usize) -> ConfigId {
        if let Some(config) = self.tasks[index].config() {
            return config;
        }
        let task = &self.tasks[index];
        let layer = ConfigLayer::new(format!("{}/{}.cfg", task.subdir(), task.name()));
        let config = self.add_config(layer);
        self.tasks[index].set_config(config);
        config
    }

    /// Steps that never had their own config read the task's layer.
    fn adopt_task_config(&mut self, config: ConfigId, members: &[StepId]) -> Result<()> {
        for id in members {
            let step = self.step_mut(*id)?;
            if step.has_blank_config() {
                step.set_shared_config(config, None);
            }
        }
        Ok(())
    }

    /// Alias entries must not shadow each other or another step's directory.
    fn check_aliases(&self, task: &Task) -> Result<()> {
        let mut seen = BTreeSet::new();
        for member in task.steps() {
            let Some(alias) = member.alias.as_deref() else {
                continue;
            };
            let alias_path = format!("{}/{}", task.subdir(), alias);
            if !seen.insert(alias_path.clone()) {
                return Err(Error::DuplicateStep(alias_path));
            }
            if let Some(existing) = self.step_id(&alias_path) {
                if existing != member.step {
                    return Err(Error::DuplicateStep(alias_path));
                }
            }
            let nested = format!("{alias_path}/");
            for other in task.steps() {
                if other.step == member.step {
                    continue;
                }
                let step = self.step_by_id(other.step)?;
                if step.subdir() == alias_path || step.subdir().starts_with(&nested) {
                    return Err(Error::DuplicateStep(alias_path));
                }
            }
        }
        Ok(())
    }

    /// Remove candidates that no task includes and no remaining step reads.
    fn prune_orphans(&mut self, mut candidates: Vec<StepId>) {
        loop {
            let orphans: Vec<StepId> = candidates
                .iter()
                .copied()
                .filter(|id| self.is_orphan(*id))
                .collect();
            if orphans.is_empty() {
                break;
            }
            for id in &orphans {
                if let Some(step) = self.steps.get_mut(id.0).and_then(Option::take) {
                    debug!(path = step.subdir(), "prune step");
                    self.step_paths.remove(step.subdir());
                }
            }
            candidates.retain(|id| !orphans.contains(id));
        }
    }

    fn is_orphan(&self, id: StepId) -> bool {
        if self.steps.get(id.0).and_then(Option::as_ref).is_none() {
            return false;
        }
        if self.tasks.values().any(|task| task.contains(id)) {
            return false;
        }
        !self.steps().any(|(other, step)| {
            other != id
                && step
                    .inputs()
                    .iter()
                    .any(|input| {
                        matches!(
                            self.input_producer(step, input),
                            Some((producer, _)) if producer == id
                        )
                    })
        })
    }
}

#[cfg(test)]
#[path = "component_tests.rs"]
mod tests;
