//! Execution log - the normalized result of one command attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exit code reserved for "timed out".
pub const EXIT_TIMEOUT: i32 = 124;

/// Exit code for failures on our side before the target reported a code.
pub const EXIT_LOCAL_FAILURE: i32 = -1;

/// Result of executing one command on a backend.
///
/// Produced exactly once per attempt and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLog {
    pub timestamp: DateTime<Utc>,
    pub command: String,
    pub output: String,
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionLog {
    /// Log for a command the target ran to completion.
    pub fn completed(command: impl Into<String>, output: impl Into<String>, exit_code: i32) -> Self {
        Self {
            timestamp: Utc::now(),
            command: command.into(),
            output: output.into(),
            exit_code,
            error: None,
        }
    }

    /// Log for a command that could not be run (or whose result is unknown).
    pub fn failed(command: impl Into<String>, error: impl Into<String>, exit_code: i32) -> Self {
        let error = error.into();
        Self {
            timestamp: Utc::now(),
            command: command.into(),
            output: error.clone(),
            exit_code,
            error: Some(error),
        }
    }

    /// Log for a command that exceeded its timeout.
    pub fn timed_out(command: impl Into<String>, timeout_ms: u64) -> Self {
        Self::failed(
            command,
            format!("Command timed out after {}ms", timeout_ms),
            EXIT_TIMEOUT,
        )
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0 && self.error.is_none()
    }

    pub fn is_timeout(&self) -> bool {
        self.exit_code == EXIT_TIMEOUT
    }
}
