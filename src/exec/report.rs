//! Reporting and history persistence for execution passes.
//!
//! `run_report.json` is a snapshot of the latest pass; `history.jsonl` is
//! append-only so earlier runs stay auditable.
use super::{RunOutcome, StepStatus};
use crate::component::Component;
use crate::error::{Error, Result};
use crate::paths::WorkDirPaths;
use crate::util::write_atomic;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;

pub const REPORT_SCHEMA_VERSION: u32 = 1;
pub const HISTORY_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub blocked: usize,
    pub satisfied: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub path: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<String>,
    pub duration_ms: u64,
    /// Tasks that include the step, in registration order.
    pub tasks: Vec<String>,
    /// Times the step ran in this pass; never more than one.
    pub executions: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub schema_version: u32,
    pub started_at_epoch_ms: u128,
    pub finished_at_epoch_ms: u128,
    pub tasks: Vec<String>,
    pub summary: RunSummary,
    pub steps: Vec<StepReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub schema_version: u32,
    pub started_at_epoch_ms: u128,
    pub finished_at_epoch_ms: u128,
    pub tasks: Vec<String>,
    pub summary: RunSummary,
    pub success: bool,
}

impl RunSummary {
    pub fn from_outcome(outcome: &RunOutcome) -> Self {
        Self {
            succeeded: outcome.count(StepStatus::Succeeded),
            failed: outcome.count(StepStatus::Failed),
            blocked: outcome.count(StepStatus::Blocked),
            satisfied: outcome.count(StepStatus::Satisfied),
        }
    }
}

impl RunReport {
    /// Attribute every outcome to its canonical path and the tasks using it.
    pub fn build(
        component: &Component,
        outcome: &RunOutcome,
        tasks: Vec<String>,
        started_at_epoch_ms: u128,
        finished_at_epoch_ms: u128,
    ) -> Result<Self> {
        let mut steps = Vec::with_capacity(outcome.steps.len());
        for (id, step_outcome) in &outcome.steps {
            let step = component.step_by_id(*id)?;
            let blocked_by = match step_outcome.blocked_by {
                Some(producer) => Some(component.step_by_id(producer)?.subdir().to_string()),
                None => None,
            };
            steps.push(StepReport {
                path: step.subdir().to_string(),
                status: step_outcome.status,
                kind: step_outcome.error_kind.map(str::to_string),
                message: step_outcome.message.clone(),
                blocked_by,
                duration_ms: step_outcome.duration.as_millis() as u64,
                tasks: component
                    .tasks_using(*id)
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                executions: step_outcome.executions,
            });
        }
        steps.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(Self {
            schema_version: REPORT_SCHEMA_VERSION,
            started_at_epoch_ms,
            finished_at_epoch_ms,
            tasks,
            summary: RunSummary::from_outcome(outcome),
            steps,
        })
    }

    pub fn success(&self) -> bool {
        self.summary.failed == 0 && self.summary.blocked == 0
    }

    pub fn history_entry(&self) -> HistoryEntry {
        HistoryEntry {
            schema_version: HISTORY_SCHEMA_VERSION,
            started_at_epoch_ms: self.started_at_epoch_ms,
            finished_at_epoch_ms: self.finished_at_epoch_ms,
            tasks: self.tasks.clone(),
            summary: self.summary.clone(),
            success: self.success(),
        }
    }
}

/// Write the latest run report snapshot.
pub fn write_report(paths: &WorkDirPaths, report: &RunReport) -> Result<()> {
    let text = serde_json::to_string_pretty(report)?;
    write_atomic(&paths.report_path(), text.as_bytes())
}

pub fn load_report(paths: &WorkDirPaths) -> Result<RunReport> {
    let path = paths.report_path();
    let bytes = fs::read(&path).map_err(|err| Error::io(&path, err))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Append a history entry as JSONL.
pub fn append_history(paths: &WorkDirPaths, entry: &HistoryEntry) -> Result<()> {
    let path = paths.history_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| Error::io(parent, err))?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|err| Error::io(&path, err))?;
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');
    file.write_all(line.as_bytes())
        .map_err(|err| Error::io(&path, err))?;
    Ok(())
}
