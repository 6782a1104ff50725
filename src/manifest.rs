//! The setup manifest: what `setup` materialized and with which configs.
//!
//! `run` reads it to know which tasks were selected and where external
//! resources live; `status` compares the recorded config digests against
//! the files on disk to flag edits made after setup.
use crate::error::{Error, Result};
use crate::paths::WorkDirPaths;
use crate::util::{sha256_hex, write_atomic};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupManifest {
    pub schema_version: u32,
    pub generated_at_epoch_ms: u128,
    pub component: String,
    pub tasks: Vec<ManifestTask>,
    pub steps: Vec<ManifestStep>,
    pub configs: Vec<ManifestConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_config: Option<PathBuf>,
    pub database_root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestTask {
    pub path: String,
    pub name: String,
    pub steps: Vec<ManifestMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestMember {
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub run_by_default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestStep {
    pub path: String,
    pub config: String,
    pub dependencies: Vec<String>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestConfig {
    pub filepath: String,
    pub sha256: String,
}

/// Drift of one canonical config file relative to the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigState {
    Unchanged,
    Modified,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigStatus {
    pub filepath: String,
    pub state: ConfigState,
}

impl SetupManifest {
    pub fn task_paths(&self) -> Vec<String> {
        self.tasks.iter().map(|task| task.path.clone()).collect()
    }
}

/// Load the manifest written by `setup`.
pub fn load_manifest(paths: &WorkDirPaths) -> Result<SetupManifest> {
    let path = paths.manifest_path();
    let bytes = fs::read(&path).map_err(|err| Error::io(&path, err))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Persist the manifest in a stable JSON format.
pub fn write_manifest(paths: &WorkDirPaths, manifest: &SetupManifest) -> Result<()> {
    let text = serde_json::to_string_pretty(manifest)?;
    write_atomic(&paths.manifest_path(), text.as_bytes())
}

/// Compare each recorded config digest with the file currently on disk.
pub fn config_status(paths: &WorkDirPaths, manifest: &SetupManifest) -> Vec<ConfigStatus> {
    manifest
        .configs
        .iter()
        .map(|config| {
            let state = match fs::read(paths.config_path(&config.filepath)) {
                Ok(bytes) if sha256_hex(&bytes) == config.sha256 => ConfigState::Unchanged,
                Ok(_) => ConfigState::Modified,
                Err(_) => ConfigState::Missing,
            };
            ConfigStatus {
                filepath: config.filepath.clone(),
                state,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(sha256: String) -> SetupManifest {
        SetupManifest {
            schema_version: MANIFEST_SCHEMA_VERSION,
            generated_at_epoch_ms: 0,
            component: "ocean".to_string(),
            tasks: Vec::new(),
            steps: Vec::new(),
            configs: vec![
                ManifestConfig {
                    filepath: "a/a.cfg".to_string(),
                    sha256,
                },
                ManifestConfig {
                    filepath: "b/b.cfg".to_string(),
                    sha256: String::new(),
                },
            ],
            user_config: None,
            database_root: PathBuf::from("/data"),
        }
    }

    #[test]
    fn config_status_flags_edits_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = WorkDirPaths::new(dir.path().to_path_buf());
        let text = "[forward]\nsteps = 4\n";
        write_atomic(&paths.config_path("a/a.cfg"), text.as_bytes()).unwrap();
        let manifest = manifest(sha256_hex(text.as_bytes()));
        write_manifest(&paths, &manifest).unwrap();
        assert_eq!(load_manifest(&paths).unwrap(), manifest);

        let states: Vec<ConfigState> = config_status(&paths, &manifest)
            .into_iter()
            .map(|status| status.state)
            .collect();
        assert_eq!(states, [ConfigState::Unchanged, ConfigState::Missing]);

        write_atomic(&paths.config_path("a/a.cfg"), b"[forward]\nsteps = 8\n").unwrap();
        assert_eq!(
            config_status(&paths, &manifest)[0].state,
            ConfigState::Modified
        );
    }
}
