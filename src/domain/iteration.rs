//! Iteration records - the agent loop's append-only memory.

use serde::{Deserialize, Serialize};

use super::execution_log::ExecutionLog;
use super::plan::ExecutionPlan;

/// One finished loop iteration: the plan, what ran, and how it went.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationRecord {
    pub iteration: u32,
    pub plan: ExecutionPlan,
    pub logs: Vec<ExecutionLog>,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_failed: Option<bool>,
}

impl IterationRecord {
    /// Record for an iteration whose commands were executed.
    pub fn executed(iteration: u32, plan: ExecutionPlan, logs: Vec<ExecutionLog>) -> Self {
        let failed = logs.iter().filter(|l| !l.is_success()).count();
        let summary = if logs.is_empty() {
            "No commands executed".to_string()
        } else if failed == 0 {
            format!("{} command(s) succeeded", logs.len())
        } else {
            format!("{} of {} command(s) failed", failed, logs.len())
        };
        Self {
            iteration,
            plan,
            logs,
            summary,
            verification_failed: None,
        }
    }

    /// Synthetic record for a plan that claimed completion but failed verification.
    pub fn verification_failure(iteration: u32, plan: ExecutionPlan, check: ExecutionLog) -> Self {
        Self {
            iteration,
            plan,
            summary: format!(
                "Task marked complete but verification failed: {}",
                check.output.trim()
            ),
            logs: vec![check],
            verification_failed: Some(true),
        }
    }

    pub fn any_succeeded(&self) -> bool {
        self.logs.iter().any(ExecutionLog::is_success)
    }
}

/// Ordered, append-only iteration history for one goal execution.
///
/// Records are numbered 1..N without gaps; `push` rejects anything else.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IterationHistory {
    records: Vec<IterationRecord>,
}

impl IterationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next iteration number to be appended.
    pub fn next_iteration(&self) -> u32 {
        self.records.len() as u32 + 1
    }

    /// Append a record. Its `iteration` must equal `next_iteration()`.
    pub fn push(&mut self, record: IterationRecord) -> crate::Result<()> {
        let expected = self.next_iteration();
        if record.iteration != expected {
            return Err(crate::PilotError::InvalidState(format!(
                "iteration record {} appended out of order, expected {}",
                record.iteration, expected
            )));
        }
        self.records.push(record);
        Ok(())
    }

    pub fn records(&self) -> &[IterationRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<IterationRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn any_command_succeeded(&self) -> bool {
        self.records
            .iter()
            .filter(|r| r.verification_failed.is_none())
            .any(IterationRecord::any_succeeded)
    }
}
