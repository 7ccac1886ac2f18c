//! Progress events streamed to the caller.
//!
//! Wire form is one object per event: `{"type": "<tag>", "data": {...}}`.

use serde::{Deserialize, Serialize};

use crate::agent::truncate_tail;
use crate::domain::{ExecutionLog, IterationRecord};
use crate::verification::VerificationOutcome;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    Start(StartData),
    IterationStart(IterationStartData),
    Status(StatusData),
    Reasoning(ReasoningData),
    CommandStart(CommandStartData),
    CommandOutput(CommandOutputData),
    Verification(VerificationData),
    IterationComplete(IterationCompleteData),
    Complete(CompleteData),
    Done(DoneData),
    Error(ErrorData),
    Abort(AbortData),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartData {
    pub task: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationStartData {
    pub iteration: u32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusData {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningData {
    pub iteration: u32,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandStartData {
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutputData {
    pub command: String,
    pub output: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationData {
    pub command: String,
    pub output: String,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationCompleteData {
    pub iteration: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteData {
    pub message: String,
    pub reasoning: String,
    pub verification: VerificationData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoneData {
    pub success: bool,
    pub iterations: u32,
    pub execution_history: Vec<IterationRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbortData {
    pub message: String,
    pub iterations: u32,
}

impl From<&VerificationOutcome> for VerificationData {
    fn from(outcome: &VerificationOutcome) -> Self {
        Self {
            command: outcome.command.clone(),
            output: outcome.output.clone(),
            success: outcome.success,
        }
    }
}

impl DoneData {
    /// Copy with every log output cut to its last `max_output_chars`.
    pub fn compacted(&self, max_output_chars: usize) -> Self {
        let mut execution_history = self.execution_history.clone();
        for log in execution_history.iter_mut().flat_map(|r| r.logs.iter_mut()) {
            log.output = truncate_tail(&log.output, max_output_chars);
        }
        Self {
            success: self.success,
            iterations: self.iterations,
            execution_history,
        }
    }

    pub fn log_count(&self) -> usize {
        self.execution_history.iter().map(|r| r.logs.len()).sum()
    }
}

impl StreamEvent {
    pub fn start(task: &str) -> Self {
        Self::Start(StartData {
            task: task.to_string(),
            message: format!("Starting task: {}", task),
        })
    }

    pub fn iteration_start(iteration: u32, max_iterations: u32) -> Self {
        Self::IterationStart(IterationStartData {
            iteration,
            message: format!("Iteration {}/{}", iteration, max_iterations),
        })
    }

    pub fn status(message: impl Into<String>) -> Self {
        Self::Status(StatusData {
            message: message.into(),
            verification: None,
        })
    }

    pub fn status_with_verification(message: impl Into<String>, verification: &VerificationOutcome) -> Self {
        Self::Status(StatusData {
            message: message.into(),
            verification: Some(verification.into()),
        })
    }

    pub fn reasoning(iteration: u32, reasoning: &str) -> Self {
        Self::Reasoning(ReasoningData {
            iteration,
            reasoning: reasoning.to_string(),
        })
    }

    pub fn command_start(command: &str) -> Self {
        Self::CommandStart(CommandStartData {
            command: command.to_string(),
        })
    }

    /// Output event for a finished command. Failed logs with an empty output
    /// surface their error message instead.
    pub fn command_output(log: &ExecutionLog) -> Self {
        let output = match (&log.error, log.output.is_empty()) {
            (Some(error), true) => error.clone(),
            _ => log.output.clone(),
        };
        Self::CommandOutput(CommandOutputData {
            command: log.command.clone(),
            output,
            exit_code: log.exit_code,
        })
    }

    pub fn verification(outcome: &VerificationOutcome) -> Self {
        Self::Verification(outcome.into())
    }

    pub fn iteration_complete(iteration: u32) -> Self {
        Self::IterationComplete(IterationCompleteData { iteration })
    }

    pub fn complete(reasoning: &str, verification: &VerificationOutcome) -> Self {
        Self::Complete(CompleteData {
            message: "Task completed and verified".to_string(),
            reasoning: reasoning.to_string(),
            verification: verification.into(),
        })
    }

    pub fn done(success: bool, iterations: u32, execution_history: Vec<IterationRecord>) -> Self {
        Self::Done(DoneData {
            success,
            iterations,
            execution_history,
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorData {
            message: message.into(),
        })
    }

    pub fn abort(iterations: u32) -> Self {
        Self::Abort(AbortData {
            message: "Task aborted by caller".to_string(),
            iterations,
        })
    }

    /// Wire tag, e.g. `command_output`.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::IterationStart(_) => "iteration_start",
            Self::Status(_) => "status",
            Self::Reasoning(_) => "reasoning",
            Self::CommandStart(_) => "command_start",
            Self::CommandOutput(_) => "command_output",
            Self::Verification(_) => "verification",
            Self::IterationComplete(_) => "iteration_complete",
            Self::Complete(_) => "complete",
            Self::Done(_) => "done",
            Self::Error(_) => "error",
            Self::Abort(_) => "abort",
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Error(_) | Self::Abort(_))
    }
}
