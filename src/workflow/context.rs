use crate::component::Component;
use crate::config::ConfigLayer;
use crate::manifest::{load_manifest, SetupManifest};
use crate::ocean;
use crate::paths::WorkDirPaths;
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use tracing::warn;

/// A work dir that `setup` has already populated.
pub(crate) struct WorkContext {
    pub(crate) paths: WorkDirPaths,
    pub(crate) manifest: SetupManifest,
}

impl WorkContext {
    pub(crate) fn load(work_dir: &Path) -> Result<Self> {
        let root = canonical_work_dir(work_dir)?;
        let paths = WorkDirPaths::new(root);
        if !paths.manifest_path().is_file() {
            return Err(anyhow!(
                "missing setup manifest at {} (run `otask setup --work-dir {}` first)",
                paths.manifest_path().display(),
                paths.root().display()
            ));
        }
        let manifest = load_manifest(&paths)
            .with_context(|| format!("load {}", paths.manifest_path().display()))?;
        Ok(Self { paths, manifest })
    }

    /// The user config recorded at setup, if it is still on disk.
    pub(crate) fn user_config(&self) -> Result<Option<ConfigLayer>> {
        let Some(path) = self.manifest.user_config.as_deref() else {
            return Ok(None);
        };
        if !path.is_file() {
            warn!(path = %path.display(), "user config recorded at setup is gone");
            return Ok(None);
        }
        load_user_config(path).map(Some)
    }
}

pub(crate) fn canonical_work_dir(work_dir: &Path) -> Result<PathBuf> {
    work_dir
        .canonicalize()
        .with_context(|| format!("resolve work dir {}", work_dir.display()))
}

pub(crate) fn load_user_config(path: &Path) -> Result<ConfigLayer> {
    let mut layer = ConfigLayer::new(path.display().to_string());
    layer
        .add_from_file(path)
        .with_context(|| format!("load user config {}", path.display()))?;
    Ok(layer)
}

pub(crate) fn build_component() -> Result<Component> {
    ocean::build_component().context("register ocean tasks")
}
