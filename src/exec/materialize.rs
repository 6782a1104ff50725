//! Input staging: every declared input becomes a symlink in the step dir.
use crate::component::{Component, InputSource, Step};
use crate::database::ResourceStore;
use crate::error::{Error, Result};
use crate::paths::WorkDirPaths;
use crate::util::{normalize_join, replace_symlink};
use std::path::{Path, PathBuf};

/// Link each input of `step` to its source, returning how many were linked.
pub(super) fn link_inputs(
    component: &Component,
    paths: &WorkDirPaths,
    store: &ResourceStore,
    step: &Step,
) -> Result<usize> {
    let step_dir = paths.dir(step.subdir());
    let mut linked = 0;
    for input in step.inputs() {
        let target = match &input.source {
            InputSource::StepOutput { step: producer, filename } => {
                paths.dir(component.step_by_id(*producer)?.subdir()).join(filename)
            }
            InputSource::Path(target) => resolve_path(paths, step, &step_dir, target),
            InputSource::Database { database, target } => store.resolve(database, target)?,
        };
        if !target.exists() {
            return Err(Error::MissingInput {
                step: step.subdir().to_string(),
                filename: input.filename.clone(),
                path: target,
            });
        }
        let link = step_dir.join(&input.filename);
        if link == target {
            continue;
        }
        replace_symlink(&target, &link)?;
        linked += 1;
    }
    Ok(linked)
}

fn resolve_path(paths: &WorkDirPaths, step: &Step, step_dir: &Path, target: &str) -> PathBuf {
    if Path::new(target).is_absolute() {
        return PathBuf::from(target);
    }
    match normalize_join(step.subdir(), target) {
        Some(relative) => paths.dir(&relative),
        None => step_dir.join(target),
    }
}
