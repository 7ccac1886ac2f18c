//! Verification engine
//!
//! Confirms a goal empirically instead of trusting the planner's claim: pick a
//! check command for the goal's subject, run it on the target, and judge the
//! log. Exit code 0 alone is not enough; the output must also be free of
//! "not found" / "not installed" markers.

mod checks;
mod subject;

pub use checks::{generic as generic_check, lookup as lookup_check, check_for};
pub use subject::extract_subject;

use serde::Serialize;

use crate::domain::ExecutionLog;
use crate::error::Result;
use crate::executor::BackendExecutor;

/// Output markers that veto an otherwise successful check.
pub const NEGATIVE_MARKERS: &[&str] = &["not found", "not installed"];

/// Message used when no subject can be extracted from the goal.
pub const UNVERIFIABLE_MESSAGE: &str = "No verification subject could be extracted from the goal";

/// Result of one verification attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationOutcome {
    pub command: String,
    pub output: String,
    pub success: bool,
    /// No check was run because the goal named nothing checkable.
    #[serde(skip)]
    pub unverifiable: bool,
    /// Log of the check, when one ran.
    #[serde(skip)]
    pub log: Option<ExecutionLog>,
}

impl VerificationOutcome {
    fn unverifiable() -> Self {
        Self {
            command: String::new(),
            output: UNVERIFIABLE_MESSAGE.to_string(),
            success: true,
            unverifiable: true,
            log: None,
        }
    }

    fn from_log(log: ExecutionLog) -> Self {
        Self {
            command: log.command.clone(),
            output: log.output.clone(),
            success: judge(&log),
            unverifiable: false,
            log: Some(log),
        }
    }

    /// The check log, or a synthetic failed log when no check ran.
    pub fn to_log(&self) -> ExecutionLog {
        match &self.log {
            Some(log) => log.clone(),
            None => ExecutionLog::completed(&self.command, &self.output, if self.success { 0 } else { 1 }),
        }
    }
}

/// Whether a check log counts as verified.
pub fn judge(log: &ExecutionLog) -> bool {
    if log.exit_code != 0 || log.error.is_some() {
        return false;
    }
    let output = log.output.to_lowercase();
    !NEGATIVE_MARKERS.iter().any(|m| output.contains(m))
}

/// Runs verification checks through an executor.
#[derive(Debug, Clone, Default)]
pub struct Verifier;

impl Verifier {
    pub fn new() -> Self {
        Self
    }

    /// Check command for `goal`, or `None` if the goal is unverifiable.
    pub fn check_command(&self, goal: &str) -> Option<String> {
        extract_subject(goal).map(|subject| check_for(&subject))
    }

    /// Verify `goal` against the target behind `executor`.
    ///
    /// Unverifiable goals succeed by default; callers decide whether to
    /// accept that.
    pub async fn verify(&self, goal: &str, executor: &dyn BackendExecutor) -> Result<VerificationOutcome> {
        let Some(command) = self.check_command(goal) else {
            log::info!("goal {:?} has no verification subject", goal);
            return Ok(VerificationOutcome::unverifiable());
        };

        log::debug!("verifying {:?} with: {}", goal, command);
        let log = executor.execute(&command).await?;
        let exit_code = log.exit_code;
        let outcome = VerificationOutcome::from_log(log);
        log::info!(
            "verification {} (exit {})",
            if outcome.success { "passed" } else { "failed" },
            exit_code
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ConnectionKind;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedExecutor {
        output: String,
        exit_code: i32,
        received: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn new(output: &str, exit_code: i32) -> Self {
            Self {
                output: output.to_string(),
                exit_code,
                received: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BackendExecutor for ScriptedExecutor {
        fn kind(&self) -> ConnectionKind {
            ConnectionKind::Local
        }

        async fn execute(&self, command: &str) -> Result<ExecutionLog> {
            self.received.lock().unwrap().push(command.to_string());
            Ok(ExecutionLog::completed(command, &self.output, self.exit_code))
        }

        async fn disconnect(&self) {}
    }

    #[test]
    fn test_judge_requires_clean_output() {
        assert!(judge(&ExecutionLog::completed("nginx -v", "nginx version: nginx/1.24.0", 0)));
        assert!(!judge(&ExecutionLog::completed("x", "nginx: not found", 0)));
        assert!(!judge(&ExecutionLog::completed("x", "Package NOT INSTALLED", 0)));
        assert!(!judge(&ExecutionLog::completed("x", "nginx version", 1)));
        assert!(!judge(&ExecutionLog::failed("x", "Connection lost", 255)));
    }

    #[tokio::test]
    async fn test_verify_uses_table_check() {
        let exec = ScriptedExecutor::new("nginx version: nginx/1.24.0\n", 0);
        let outcome = Verifier::new().verify("install nginx", &exec).await.unwrap();
        assert!(outcome.success);
        assert!(!outcome.unverifiable);
        assert_eq!(outcome.command, "nginx -v 2>&1");
        assert_eq!(exec.received.lock().unwrap().as_slice(), ["nginx -v 2>&1"]);
    }

    #[tokio::test]
    async fn test_exit_zero_with_not_found_is_not_verified() {
        let exec = ScriptedExecutor::new("nginx: not found\n", 0);
        let outcome = Verifier::new().verify("install nginx", &exec).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.to_log().output, "nginx: not found\n");
    }

    #[tokio::test]
    async fn test_unverifiable_goal_succeeds_without_check() {
        let exec = ScriptedExecutor::new("", 0);
        let outcome = Verifier::new().verify("安装", &exec).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.unverifiable);
        assert!(exec.received.lock().unwrap().is_empty());
    }

    #[test]
    fn test_check_command_generic_fallback() {
        let check = Verifier::new().check_command("install htop").unwrap();
        assert_eq!(check, generic_check("htop"));
    }

    #[test]
    fn test_outcome_serializes_wire_fields_only() {
        let outcome = VerificationOutcome::from_log(ExecutionLog::completed("nginx -v", "ok", 0));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json, serde_json::json!({"command": "nginx -v", "output": "ok", "success": true}));
    }
}
