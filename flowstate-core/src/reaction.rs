//! Reactions and workflow lifecycle phases.

use serde::{Deserialize, Serialize};

/// Outcome of one reactor invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction<S, R> {
    /// Advance the machine to `next` and invoke the reactor again.
    EnterState(S),
    /// Terminate the workflow with `result`.
    FinishWith(R),
}

impl<S, R> Reaction<S, R> {
    /// Returns true if this reaction terminates the workflow.
    pub fn is_finish(&self) -> bool {
        matches!(self, Reaction::FinishWith(_))
    }

    /// Returns the next state, if this reaction advances the machine.
    pub fn next_state(&self) -> Option<&S> {
        match self {
            Reaction::EnterState(next) => Some(next),
            Reaction::FinishWith(_) => None,
        }
    }
}

/// Workflow lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// The run loop is driving the reactor.
    #[default]
    Running,
    /// The reactor finished with a result.
    Finished,
    /// A reactor invocation failed.
    Failed,
    /// The workflow was abandoned.
    Cancelled,
}

impl Phase {
    /// Returns true once the workflow can no longer change.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Phase::Running)
    }
}
