//! Shared test infrastructure for integration tests.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Scratch work dir plus database root for driving `otask`.
pub struct Workspace {
    pub temp: TempDir,
}

impl Workspace {
    pub fn create() -> Self {
        Self {
            temp: TempDir::new().expect("create temp dir"),
        }
    }

    pub fn work_dir(&self) -> PathBuf {
        self.temp.path().join("work")
    }

    pub fn database_root(&self) -> PathBuf {
        self.temp.path().join("databases")
    }

    /// Write a user config next to the work dir and return its path.
    pub fn user_config(&self, text: &str) -> PathBuf {
        let path = self.temp.path().join("user.cfg");
        fs::write(&path, text).expect("write user config");
        path
    }

    pub fn otask(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_otask"))
            .args(args)
            .env("OTASK_LOG", "warn")
            .output()
            .expect("spawn otask")
    }

    /// Run `otask setup` for `tasks` and panic with stderr on failure.
    pub fn setup(&self, tasks: &[&str], config: Option<&Path>) {
        let work_dir = self.work_dir();
        let database_root = self.database_root();
        let mut args = vec![
            "setup".to_string(),
            "--work-dir".to_string(),
            work_dir.display().to_string(),
            "--database-root".to_string(),
            database_root.display().to_string(),
        ];
        for task in tasks {
            args.push("--task".to_string());
            args.push(task.to_string());
        }
        if let Some(config) = config {
            args.push("--config".to_string());
            args.push(config.display().to_string());
        }
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.otask(&args);
        assert!(
            output.status.success(),
            "setup failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    /// Run `otask run --json` with extra args; returns exit success and report.
    pub fn run(&self, extra: &[&str]) -> (bool, Value) {
        let work_dir = self.work_dir().display().to_string();
        let mut args = vec!["run", "--work-dir", work_dir.as_str(), "--json"];
        args.extend_from_slice(extra);
        let output = self.otask(&args);
        let report = serde_json::from_slice(&output.stdout).unwrap_or_else(|err| {
            panic!(
                "run printed no report ({err}): {}",
                String::from_utf8_lossy(&output.stderr)
            )
        });
        (output.status.success(), report)
    }

    #[allow(dead_code)]
    pub fn status(&self) -> Value {
        let work_dir = self.work_dir().display().to_string();
        let output = self.otask(&["status", "--work-dir", work_dir.as_str(), "--json"]);
        assert!(
            output.status.success(),
            "status failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).expect("status json")
    }
}

/// The report entry for one canonical step path.
pub fn report_step<'a>(report: &'a Value, path: &str) -> &'a Value {
    report["steps"]
        .as_array()
        .expect("steps array")
        .iter()
        .find(|step| step["path"] == path)
        .unwrap_or_else(|| panic!("no report entry for {path}"))
}

#[allow(dead_code)]
pub fn report_paths(report: &Value) -> Vec<String> {
    report["steps"]
        .as_array()
        .expect("steps array")
        .iter()
        .map(|step| step["path"].as_str().unwrap_or_default().to_string())
        .collect()
}
