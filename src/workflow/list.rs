//! Task listing.
use super::context::build_component;
use crate::cli::ListArgs;
use crate::component::Component;
use anyhow::Result;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct TaskEntry {
    index: usize,
    name: String,
    path: String,
    steps: Vec<StepEntry>,
}

#[derive(Debug, Serialize)]
struct StepEntry {
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    alias: Option<String>,
    run_by_default: bool,
}

pub fn run_list(args: &ListArgs) -> Result<()> {
    let component = build_component()?;
    let entries = task_entries(&component)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    for entry in &entries {
        println!("{:>4}: {}", entry.index, entry.path);
    }
    Ok(())
}

fn task_entries(component: &Component) -> Result<Vec<TaskEntry>> {
    let mut entries = Vec::new();
    for (index, (_, task)) in component.tasks().enumerate() {
        let mut steps = Vec::with_capacity(task.steps().len());
        for member in task.steps() {
            steps.push(StepEntry {
                path: component.step_by_id(member.step)?.subdir().to_string(),
                alias: member.alias.clone(),
                run_by_default: member.run_by_default,
            });
        }
        entries.push(TaskEntry {
            index,
            name: task.name().to_string(),
            path: task.subdir().to_string(),
            steps,
        });
    }
    Ok(entries)
}
