//! Named, directory-scoped groups of steps.
use super::step::{ConfigId, Step, StepId};
use super::Component;
use crate::config::ConfigLayer;
use crate::error::Result;
use serde::Serialize;
use std::fmt;

/// Handle to a task in the component registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskId(pub(crate) usize);

/// One membership of a step in a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStep {
    pub step: StepId,
    /// Directory entry inside the task dir pointing at the canonical step dir.
    pub alias: Option<String>,
    pub run_by_default: bool,
}

/// Builds a step during `configure`; runs after every earlier plan entry has
/// been registered so it can look them up by path.
pub type StepFactory = Box<dyn FnOnce(&StepFactoryContext<'_>) -> Result<Step>>;

/// One step a recipe wants the task to own.
pub struct StepPlan {
    pub subdir: String,
    pub symlink: Option<String>,
    pub run_by_default: bool,
    pub build: StepFactory,
}

impl StepPlan {
    pub fn new(
        subdir: impl Into<String>,
        build: impl FnOnce(&StepFactoryContext<'_>) -> Result<Step> + 'static,
    ) -> Self {
        Self {
            subdir: subdir.into(),
            symlink: None,
            run_by_default: true,
            build: Box::new(build),
        }
    }

    pub fn symlink(mut self, alias: impl Into<String>) -> Self {
        self.symlink = Some(alias.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.run_by_default = false;
        self
    }
}

impl fmt::Debug for StepPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepPlan")
            .field("subdir", &self.subdir)
            .field("symlink", &self.symlink)
            .field("run_by_default", &self.run_by_default)
            .finish_non_exhaustive()
    }
}

/// Read-only view handed to step factories.
pub struct StepFactoryContext<'a> {
    pub(super) component: &'a Component,
    pub(super) task_config: ConfigId,
}

impl StepFactoryContext<'_> {
    /// Id of a step registered earlier (by another task or earlier in the
    /// same plan).
    pub fn step_id(&self, path: &str) -> Result<StepId> {
        self.component.require_step_id(path)
    }

    /// A step registered earlier, for factories that read by path and want
    /// to check what the producer declares.
    pub fn step(&self, path: &str) -> Result<&Step> {
        self.component.step(path)
    }

    pub fn task_config(&self) -> ConfigId {
        self.task_config
    }

    pub fn config(&self) -> &ConfigLayer {
        self.component.config(self.task_config)
    }
}

/// Derives a task's step set from its resolved config.
///
/// `plan` must be a pure function of the config: calling it twice with the
/// same layer yields the same paths in the same order.
pub trait TaskRecipe: Send + Sync {
    fn plan(&self, config: &ConfigLayer) -> Result<Vec<StepPlan>>;
}

pub struct Task {
    name: String,
    subdir: String,
    steps: Vec<TaskStep>,
    config: Option<ConfigId>,
    config_link: Option<String>,
    recipe: Option<Box<dyn TaskRecipe>>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("subdir", &self.subdir)
            .field("steps", &self.steps)
            .field("config", &self.config)
            .field("config_link", &self.config_link)
            .field("recipe", &self.recipe.is_some())
            .finish()
    }
}

impl Task {
    pub fn new(name: impl Into<String>, subdir: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subdir: subdir.into().trim_matches('/').to_string(),
            steps: Vec::new(),
            config: None,
            config_link: None,
            recipe: None,
        }
    }

    pub fn with_recipe(mut self, recipe: impl TaskRecipe + 'static) -> Self {
        self.recipe = Some(Box::new(recipe));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subdir(&self) -> &str {
        &self.subdir
    }

    pub fn steps(&self) -> &[TaskStep] {
        &self.steps
    }

    pub fn default_steps(&self) -> impl Iterator<Item = StepId> + '_ {
        self.steps
            .iter()
            .filter(|member| member.run_by_default)
            .map(|member| member.step)
    }

    pub fn contains(&self, step: StepId) -> bool {
        self.steps.iter().any(|member| member.step == step)
    }

    /// Shared config handle; allocated by `Component::add_task` when unset.
    pub fn config(&self) -> Option<ConfigId> {
        self.config
    }

    pub fn config_link(&self) -> Option<&str> {
        self.config_link.as_deref()
    }

    pub fn has_recipe(&self) -> bool {
        self.recipe.is_some()
    }

    pub(super) fn recipe(&self) -> Option<&dyn TaskRecipe> {
        self.recipe.as_deref()
    }

    /// Add a step that runs by default. Adding the same step again updates
    /// its alias instead of duplicating the membership.
    pub fn add_step(&mut self, step: StepId, symlink: Option<&str>) -> &mut Self {
        self.push_member(step, symlink, true)
    }

    /// Add a step that only runs when requested explicitly.
    pub fn add_optional_step(&mut self, step: StepId, symlink: Option<&str>) -> &mut Self {
        self.push_member(step, symlink, false)
    }

    /// Detach a step; returns whether it was a member.
    pub fn remove_step(&mut self, step: StepId) -> bool {
        let before = self.steps.len();
        self.steps.retain(|member| member.step != step);
        before != self.steps.len()
    }

    pub fn set_shared_config(&mut self, config: ConfigId, link: Option<&str>) -> &mut Self {
        self.config = Some(config);
        self.config_link = link.filter(|name| !name.is_empty()).map(str::to_string);
        self
    }

    pub(super) fn set_config(&mut self, config: ConfigId) {
        self.config = Some(config);
    }

    fn push_member(
        &mut self,
        step: StepId,
        symlink: Option<&str>,
        run_by_default: bool,
    ) -> &mut Self {
        let alias = symlink
            .map(|name| name.trim_matches('/'))
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        if let Some(existing) = self.steps.iter_mut().find(|member| member.step == step) {
            existing.alias = alias;
            existing.run_by_default = run_by_default;
        } else {
            self.steps.push(TaskStep {
                step,
                alias,
                run_by_default,
            });
        }
        self
    }
}

/// Step paths a `configure` call attached and detached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigureDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ConfigureDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}
