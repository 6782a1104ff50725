//! Dependency graph over registered steps.
//!
//! Edges come from declared inputs: a `StepOutput` input, or a relative
//! `Path` input that lands on another step's declared output. Execution
//! order is computed in topological levels with Kahn's algorithm; steps in
//! one level have no edges between them.
use crate::component::{Component, StepId};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Debug, Clone, Default)]
pub struct ExecutionGraph {
    levels: Vec<Vec<StepId>>,
    consumers: BTreeMap<StepId, BTreeSet<StepId>>,
}

impl ExecutionGraph {
    /// Levels in execution order.
    pub fn levels(&self) -> &[Vec<StepId>] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Every step downstream of `id`, transitively.
    pub fn downstream(&self, id: StepId) -> BTreeSet<StepId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<StepId> = self
            .consumers
            .get(&id)
            .into_iter()
            .flatten()
            .copied()
            .collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                queue.extend(self.consumers.get(&next).into_iter().flatten().copied());
            }
        }
        seen
    }
}

/// Producers a step reads from, deduplicated, in input order.
pub fn dependencies(component: &Component, id: StepId) -> Result<Vec<StepId>> {
    let step = component.step_by_id(id)?;
    let mut deps = Vec::new();
    for input in step.inputs() {
        if let Some((producer, _)) = component.input_producer(step, input) {
            if producer == id {
                return Err(Error::DependencyCycle {
                    steps: vec![step.subdir().to_string()],
                });
            }
            if !deps.contains(&producer) {
                deps.push(producer);
            }
        }
    }
    Ok(deps)
}

/// `roots` plus everything they transitively read from.
pub fn upstream_closure(component: &Component, roots: &[StepId]) -> Result<BTreeSet<StepId>> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<StepId> = roots.iter().copied().collect();
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        queue.extend(dependencies(component, id)?);
    }
    Ok(seen)
}

/// Topological levels over `steps`. Edges to producers outside the set are
/// ignored here; the driver decides how to treat them.
pub fn build(component: &Component, steps: &BTreeSet<StepId>) -> Result<ExecutionGraph> {
    let mut producers: BTreeMap<StepId, BTreeSet<StepId>> = BTreeMap::new();
    let mut consumers: BTreeMap<StepId, BTreeSet<StepId>> = BTreeMap::new();
    for &id in steps {
        let deps: BTreeSet<StepId> = dependencies(component, id)?
            .into_iter()
            .filter(|dep| steps.contains(dep))
            .collect();
        for dep in &deps {
            consumers.entry(*dep).or_default().insert(id);
        }
        producers.insert(id, deps);
    }

    let mut in_degree: BTreeMap<StepId, usize> = producers
        .iter()
        .map(|(id, deps)| (*id, deps.len()))
        .collect();
    let mut current: Vec<StepId> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut levels = Vec::new();
    let mut placed = 0usize;
    while !current.is_empty() {
        let mut next = Vec::new();
        for id in &current {
            for consumer in consumers.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(consumer) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(*consumer);
                    }
                }
            }
        }
        placed += current.len();
        current.sort_by_key(|id| path_of(component, *id));
        levels.push(current);
        next.sort();
        next.dedup();
        current = next;
    }

    if placed != steps.len() {
        let mut stuck: Vec<String> = in_degree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(id, _)| path_of(component, *id).to_string())
            .collect();
        stuck.sort();
        return Err(Error::DependencyCycle { steps: stuck });
    }

    Ok(ExecutionGraph { levels, consumers })
}

fn path_of(component: &Component, id: StepId) -> &str {
    component
        .step_by_id(id)
        .map(|step| step.subdir())
        .unwrap_or_default()
}
