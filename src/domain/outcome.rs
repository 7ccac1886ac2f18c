//! Run outcome types.
//!
//! This module defines the result types for an agent run.

/// Outcome of one goal execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Goal verified - `complete` then `done{success:true}` were emitted
    Completed { iterations: u32 },
    /// Iteration cap reached without verification
    Exhausted { iterations: u32 },
    /// Caller cancelled the run
    Aborted { iterations: u32 },
    /// Fatal infrastructure failure - an `error` event ended the stream
    Failed(String),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }

    /// Number of iterations that ran, if the run got that far.
    pub fn iterations(&self) -> Option<u32> {
        match self {
            RunOutcome::Completed { iterations }
            | RunOutcome::Exhausted { iterations }
            | RunOutcome::Aborted { iterations } => Some(*iterations),
            RunOutcome::Failed(_) => None,
        }
    }
}
