//! Error types for Shellpilot
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can abort a Shellpilot operation.
///
/// Ordinary command failures are not errors: backends fold them into an
/// `ExecutionLog`. Only infrastructure failures travel through this enum.
#[derive(Debug, Error)]
pub enum PilotError {
    /// Could not open or construct a backend connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// Reasoning service failure
    #[error("LLM error: {0}")]
    Llm(String),

    /// Reasoning service response did not contain a valid plan
    #[error("Plan parse error: {0}")]
    PlanParse(String),

    /// Backend executor raised instead of returning a failed log
    #[error("Executor error: {0}")]
    Executor(String),

    /// Loop bookkeeping reached an impossible state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// History store failure
    #[error("History error: {0}")]
    History(String),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Run was cancelled by the caller
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<crate::llm::LlmError> for PilotError {
    fn from(err: crate::llm::LlmError) -> Self {
        PilotError::Llm(err.to_string())
    }
}

/// Result type alias for Shellpilot operations
pub type Result<T> = std::result::Result<T, PilotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error() {
        let err = PilotError::Connection("auth failed for root@10.0.0.5".to_string());
        assert_eq!(err.to_string(), "Connection error: auth failed for root@10.0.0.5");
    }

    #[test]
    fn test_plan_parse_error() {
        let err = PilotError::PlanParse("no JSON object found".to_string());
        assert_eq!(err.to_string(), "Plan parse error: no JSON object found");
    }

    #[test]
    fn test_llm_error_conversion() {
        let err: PilotError = crate::llm::LlmError::InvalidResponse("empty".to_string()).into();
        assert!(matches!(err, PilotError::Llm(_)));
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PilotError = io_err.into();
        assert!(matches!(err, PilotError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: PilotError = json_err.into();
        assert!(matches!(err, PilotError::Json(_)));
    }
}
