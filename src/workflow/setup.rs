//! Workflow setup step.
//!
//! Setup builds the full catalogue, configures the selected tasks against
//! the user config, rejects cycles and failed preconditions, and only then
//! touches the work dir.
use super::context::{build_component, canonical_work_dir, load_user_config};
use crate::cli::{SetupArgs, TaskSelection};
use crate::component::Component;
use crate::config::ConfigLayer;
use crate::database::ResourceStore;
use crate::exec;
use crate::graph;
use crate::layout::{build_manifest, materialize, select_steps, ConfigWrite};
use crate::manifest::write_manifest;
use crate::paths::WorkDirPaths;
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub fn run_setup(args: &SetupArgs) -> Result<()> {
    fs::create_dir_all(&args.work_dir)
        .with_context(|| format!("create work dir {}", args.work_dir.display()))?;
    let paths = WorkDirPaths::new(canonical_work_dir(&args.work_dir)?);

    let user_config = args
        .config
        .as_deref()
        .map(canonical_file)
        .transpose()?;
    let user = user_config.as_deref().map(load_user_config).transpose()?;

    let mut component = build_component()?;
    debug!(steps = component.step_count(), "catalogue registered");
    let tasks = select_tasks(&component, &args.selection)?;
    if let Some(user) = &user {
        component.apply_user_config(user);
    }
    for task in &tasks {
        let diff = component
            .configure_task(task)
            .with_context(|| format!("configure task {task}"))?;
        if !diff.is_empty() {
            debug!(task = %task, added = ?diff.added, removed = ?diff.removed, "reconfigured");
        }
    }
    // steps built during configure carry packaged defaults only
    if let Some(user) = &user {
        component.apply_user_config(user);
    }

    let steps = select_steps(&component, &tasks).context("select steps")?;
    let graph = graph::build(&component, &steps).context("check step dependencies")?;
    exec::check_preconditions(&component, &steps).context("check preconditions")?;
    let database_root = database_root(args.database_root.as_deref(), user.as_ref())?;

    let configs = materialize(&component, &paths, &tasks, &steps, ConfigWrite::Render)
        .with_context(|| format!("materialize {}", paths.root().display()))?;
    let manifest = build_manifest(
        &component,
        &tasks,
        &steps,
        configs,
        user_config,
        database_root,
    )?;
    write_manifest(&paths, &manifest)
        .with_context(|| format!("write {}", paths.manifest_path().display()))?;

    info!(
        tasks = tasks.len(),
        steps = steps.len(),
        levels = graph.levels().len(),
        "setup complete"
    );
    for task in &tasks {
        println!("{}", paths.dir(task).display());
    }
    Ok(())
}

fn select_tasks(component: &Component, selection: &TaskSelection) -> Result<Vec<String>> {
    let mut tasks: Vec<String> = Vec::new();
    if selection.all {
        tasks.extend(component.tasks().map(|(_, task)| task.subdir().to_string()));
        return Ok(tasks);
    }
    for path in &selection.tasks {
        let task = component
            .task(path)
            .with_context(|| format!("select task {path}"))?;
        tasks.push(task.subdir().to_string());
    }
    for &number in &selection.numbers {
        let (_, task) = component.tasks().nth(number).ok_or_else(|| {
            anyhow!(
                "no task number {number} (run `otask list` to see the {} tasks)",
                component.tasks().count()
            )
        })?;
        tasks.push(task.subdir().to_string());
    }
    let mut seen = BTreeSet::new();
    tasks.retain(|task| seen.insert(task.clone()));
    Ok(tasks)
}

/// `--database-root`, else `[paths] database_root`, else the cache default.
fn database_root(flag: Option<&Path>, user: Option<&ConfigLayer>) -> Result<PathBuf> {
    if let Some(root) = flag {
        return absolute(root);
    }
    if let Some(user) = user.filter(|user| user.has_option("paths", "database_root")) {
        let root = user.get("paths", "database_root")?;
        return absolute(Path::new(&root));
    }
    Ok(ResourceStore::default_root())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("resolve current dir")?;
    Ok(cwd.join(path))
}

fn canonical_file(path: &Path) -> Result<PathBuf> {
    path.canonicalize()
        .with_context(|| format!("resolve user config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_root_prefers_flag_then_user_config() {
        let mut user = ConfigLayer::new("user.cfg");
        user.set("paths", "database_root", "/srv/ocean-data");
        let root = database_root(Some(Path::new("/mnt/data")), Some(&user)).unwrap();
        assert_eq!(root, PathBuf::from("/mnt/data"));
        let root = database_root(None, Some(&user)).unwrap();
        assert_eq!(root, PathBuf::from("/srv/ocean-data"));
        let root = database_root(None, None).unwrap();
        assert_eq!(root, ResourceStore::default_root());
    }

    #[test]
    fn selection_by_number_follows_registration_order() {
        let component = build_component().unwrap();
        let selection = TaskSelection {
            tasks: vec!["planar/manufactured_solution/default".to_string()],
            numbers: vec![0, 0],
            all: false,
        };
        let tasks = select_tasks(&component, &selection).unwrap();
        let first = component.tasks().next().unwrap().1.subdir().to_string();
        assert_eq!(tasks, ["planar/manufactured_solution/default".to_string(), first]);

        let selection = TaskSelection {
            tasks: Vec::new(),
            numbers: vec![10_000],
            all: false,
        };
        let err = select_tasks(&component, &selection).unwrap_err();
        assert!(err.to_string().contains("no task number 10000"));
    }
}
