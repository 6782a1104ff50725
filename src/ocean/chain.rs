//! Iterative forward/adjust chains.
//!
//! The chain length comes from config, so it is described as data and the
//! caller turns each stage into an ordinary step whose only producer is the
//! stage before it.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// Short forward run from the current initial state.
    Forward,
    /// Rebalance the initial state from the preceding forward run.
    Adjust,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub kind: StageKind,
    pub iteration: usize,
    pub name: String,
}

/// `ssh_forward_0`, `ssh_adjust_0`, `ssh_forward_1`, ... for `iterations`
/// rounds.
pub fn ssh_adjustment_chain(iterations: usize) -> Vec<Stage> {
    let mut stages = Vec::with_capacity(2 * iterations);
    for iteration in 0..iterations {
        stages.push(Stage {
            kind: StageKind::Forward,
            iteration,
            name: format!("ssh_forward_{iteration}"),
        });
        stages.push(Stage {
            kind: StageKind::Adjust,
            iteration,
            name: format!("ssh_adjust_{iteration}"),
        });
    }
    stages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_alternate_forward_and_adjust() {
        let stages = ssh_adjustment_chain(2);
        let names: Vec<&str> = stages.iter().map(|stage| stage.name.as_str()).collect();
        assert_eq!(
            names,
            ["ssh_forward_0", "ssh_adjust_0", "ssh_forward_1", "ssh_adjust_1"]
        );
        assert_eq!(stages[3].kind, StageKind::Adjust);
        assert_eq!(stages[3].iteration, 1);
    }

    #[test]
    fn zero_iterations_is_an_empty_chain() {
        assert!(ssh_adjustment_chain(0).is_empty());
    }
}
