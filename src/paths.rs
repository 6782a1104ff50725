//! Typed paths into a work directory.
//!
//! Centralizing path construction keeps file access consistent between the
//! setup, run, and status commands.
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "otask_setup.json";
pub const REPORT_FILE: &str = "run_report.json";
pub const HISTORY_FILE: &str = "history.jsonl";

/// Convenience wrapper for locating work-dir artifacts.
#[derive(Debug, Clone)]
pub struct WorkDirPaths {
    root: PathBuf,
}

impl WorkDirPaths {
    /// Create a new path helper rooted at the work directory.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Return the work root used for path derivation.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return the `otask_setup.json` manifest path.
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Return the `run_report.json` path.
    pub fn report_path(&self) -> PathBuf {
        self.root.join(REPORT_FILE)
    }

    /// Return the `history.jsonl` path.
    pub fn history_path(&self) -> PathBuf {
        self.root.join(HISTORY_FILE)
    }

    /// Return the canonical directory of a step or task.
    pub fn dir(&self, subdir: &str) -> PathBuf {
        self.root.join(subdir)
    }

    /// Return the canonical location of a config file recorded relative to
    /// the work root.
    pub fn config_path(&self, filepath: &str) -> PathBuf {
        self.root.join(filepath)
    }
}
