//! On-disk layout of a work directory.
//!
//! Every step gets its canonical directory `<root>/<subdir>`. Each config
//! layer is rendered once to its canonical file and linked into the step
//! and task directories that asked for it. Task aliases are symlinks inside
//! the task directory pointing at canonical step directories.
use crate::component::{Component, StepConfig, StepId};
use crate::config::ConfigLayer;
use crate::error::{Error, Result};
use crate::graph;
use crate::manifest::{
    ManifestConfig, ManifestMember, ManifestStep, ManifestTask, SetupManifest,
    MANIFEST_SCHEMA_VERSION,
};
use crate::paths::WorkDirPaths;
use crate::util::{now_epoch_ms, replace_symlink, write_atomic};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Whether canonical config files are rendered or left as found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigWrite {
    /// Render every layer, overwriting what is on disk (setup).
    Render,
    /// Only write files that do not exist yet (run, after user edits).
    KeepExisting,
}

/// Every member of `tasks` plus everything those members read from.
pub fn select_steps(component: &Component, tasks: &[String]) -> Result<BTreeSet<StepId>> {
    let mut roots = Vec::new();
    for path in tasks {
        let task = component.task(path)?;
        roots.extend(task.steps().iter().map(|member| member.step));
    }
    graph::upstream_closure(component, &roots)
}

/// Canonical config layers used by `steps` and `tasks`, keyed by filepath.
pub fn canonical_configs<'a>(
    component: &'a Component,
    tasks: &[String],
    steps: &BTreeSet<StepId>,
) -> Result<BTreeMap<String, &'a ConfigLayer>> {
    let mut layers: Vec<&ConfigLayer> = Vec::new();
    for &id in steps {
        layers.push(component.effective_config(id)?);
    }
    for path in tasks {
        if let Some(config) = component.task(path)?.config() {
            layers.push(component.config(config));
        }
    }
    let mut by_path: BTreeMap<String, &ConfigLayer> = BTreeMap::new();
    for layer in layers {
        match by_path.get(layer.filepath()) {
            Some(existing) if *existing != layer => {
                warn!(
                    filepath = layer.filepath(),
                    "two config layers share a file; keeping the first"
                );
            }
            Some(_) => {}
            None => {
                by_path.insert(layer.filepath().to_string(), layer);
            }
        }
    }
    Ok(by_path)
}

/// Create step and task directories, config files and symlinks.
///
/// Returns the digest of every canonical config file that was considered.
pub fn materialize(
    component: &Component,
    paths: &WorkDirPaths,
    tasks: &[String],
    steps: &BTreeSet<StepId>,
    mode: ConfigWrite,
) -> Result<Vec<ManifestConfig>> {
    let configs = canonical_configs(component, tasks, steps)?;
    let mut digests = Vec::with_capacity(configs.len());
    for (filepath, layer) in &configs {
        let dest = paths.config_path(filepath);
        if mode == ConfigWrite::Render || !dest.is_file() {
            write_atomic(&dest, layer.render().as_bytes())?;
            debug!(config = %filepath, "wrote config");
        }
        digests.push(ManifestConfig {
            filepath: filepath.clone(),
            sha256: layer.digest(),
        });
    }

    for &id in steps {
        let step = component.step_by_id(id)?;
        let step_dir = paths.dir(step.subdir());
        fs::create_dir_all(&step_dir).map_err(|err| Error::io(&step_dir, err))?;
        if let StepConfig::Shared {
            config,
            link: Some(link),
        } = step.config()
        {
            let canonical = paths.config_path(component.config(*config).filepath());
            link_unless_same(&canonical, &step_dir.join(link))?;
        }
    }

    for path in tasks {
        let task = component.task(path)?;
        let task_dir = paths.dir(task.subdir());
        fs::create_dir_all(&task_dir).map_err(|err| Error::io(&task_dir, err))?;
        if let (Some(config), Some(link)) = (task.config(), task.config_link()) {
            let canonical = paths.config_path(component.config(config).filepath());
            link_unless_same(&canonical, &task_dir.join(link))?;
        }
        for member in task.steps() {
            let Some(alias) = member.alias.as_deref() else {
                continue;
            };
            let step = component.step_by_id(member.step)?;
            link_unless_same(&paths.dir(step.subdir()), &task_dir.join(alias))?;
        }
    }
    Ok(digests)
}

/// Describe what was set up, for `run` and `status`.
pub fn build_manifest(
    component: &Component,
    tasks: &[String],
    steps: &BTreeSet<StepId>,
    configs: Vec<ManifestConfig>,
    user_config: Option<PathBuf>,
    database_root: PathBuf,
) -> Result<SetupManifest> {
    let mut manifest_tasks = Vec::with_capacity(tasks.len());
    for path in tasks {
        let task = component.task(path)?;
        let mut members = Vec::with_capacity(task.steps().len());
        for member in task.steps() {
            members.push(ManifestMember {
                step: component.step_by_id(member.step)?.subdir().to_string(),
                alias: member.alias.clone(),
                run_by_default: member.run_by_default,
            });
        }
        manifest_tasks.push(ManifestTask {
            path: task.subdir().to_string(),
            name: task.name().to_string(),
            steps: members,
        });
    }

    let mut manifest_steps = Vec::with_capacity(steps.len());
    for &id in steps {
        let step = component.step_by_id(id)?;
        let mut dependencies = Vec::new();
        for dep in graph::dependencies(component, id)? {
            dependencies.push(component.step_by_id(dep)?.subdir().to_string());
        }
        manifest_steps.push(ManifestStep {
            path: step.subdir().to_string(),
            config: component.effective_config(id)?.filepath().to_string(),
            dependencies,
            outputs: step
                .outputs()
                .iter()
                .map(|output| output.filename.clone())
                .collect(),
        });
    }
    manifest_steps.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(SetupManifest {
        schema_version: MANIFEST_SCHEMA_VERSION,
        generated_at_epoch_ms: now_epoch_ms(),
        component: component.name().to_string(),
        tasks: manifest_tasks,
        steps: manifest_steps,
        configs,
        user_config,
        database_root,
    })
}

/// Read canonical config files back into the component so edits made after
/// setup are honored. Files that are missing keep the in-memory layer.
pub fn reload_configs(
    component: &mut Component,
    paths: &WorkDirPaths,
    tasks: &[String],
) -> Result<usize> {
    let mut reloaded = 0;
    let mut shared = BTreeSet::new();
    for path in tasks {
        if let Some(config) = component.task(path)?.config() {
            shared.insert(config);
        }
    }
    let steps = select_steps(component, tasks)?;
    let mut owned = Vec::new();
    for &id in &steps {
        match component.step_by_id(id)?.shared_config() {
            Some(config) => {
                shared.insert(config);
            }
            None => owned.push(id),
        }
    }

    for config in shared {
        let layer = component.config_mut(config);
        if reload_layer(layer, paths)? {
            reloaded += 1;
        }
    }
    for id in owned {
        let layer = component.step_mut(id)?.config_mut()?;
        if reload_layer(layer, paths)? {
            reloaded += 1;
        }
    }
    Ok(reloaded)
}

fn reload_layer(layer: &mut ConfigLayer, paths: &WorkDirPaths) -> Result<bool> {
    let file = paths.config_path(layer.filepath());
    if !file.is_file() {
        return Ok(false);
    }
    let text = fs::read_to_string(&file).map_err(|err| Error::io(&file, err))?;
    layer.reload_from_str(&file.display().to_string(), &text)?;
    Ok(true)
}

fn link_unless_same(target: &Path, link: &Path) -> Result<()> {
    if target == link {
        return Ok(());
    }
    replace_symlink(target, link)
}
