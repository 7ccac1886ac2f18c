//! Backend executors
//!
//! One implementation per target-runtime kind, all behind the same contract:
//! hand over a command string, get back an `ExecutionLog`. Backend failures
//! (missing container, pod not ready, daemon unreachable, timeouts) are folded
//! into the log as a human-readable `error` instead of escaping as errors.

mod container;
mod container_api;
mod distro;
pub mod frames;
mod local;
mod pod;
mod process;
mod remote_shell;
pub mod shell;

pub use container::ContainerExecutor;
pub use container_api::ContainerApiExecutor;
pub use distro::DistroExecutor;
pub use local::LocalExecutor;
pub use pod::PodExecutor;
pub use process::{ProcessSpec, run_process};
pub use remote_shell::RemoteShellExecutor;

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{ConnectionKind, ExecutionLog};
use crate::error::Result;

/// Default per-command timeout (5 minutes)
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Default connection handshake timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default cap on captured command output (10 MiB)
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Shell tried first inside containers, pods and distros
pub const PREFERRED_SHELL: &str = "bash";

/// Shell used when the preferred one is missing
pub const FALLBACK_SHELL: &str = "sh";

/// Executes commands against one concrete target runtime.
#[async_trait]
pub trait BackendExecutor: Send + Sync {
    /// Which runtime kind this executor drives
    fn kind(&self) -> ConnectionKind;

    /// Run one command.
    ///
    /// Command failures, timeouts and backend errors come back as `Ok` logs
    /// with a non-zero exit code. `Err` means the executor itself is broken.
    async fn execute(&self, command: &str) -> Result<ExecutionLog>;

    /// Release the session. Safe to call more than once.
    async fn disconnect(&self);
}

/// Timeouts and limits shared by all executors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorOptions {
    pub command_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_output_bytes: usize,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

impl ExecutorOptions {
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }
}

/// Rewrite a failed log's error into a friendlier message when its output
/// matches one of the known backend failure signatures.
///
/// Patterns are matched case-insensitively. The original output is kept.
pub(crate) fn normalize_failure(log: ExecutionLog, rules: &[(&str, String)]) -> ExecutionLog {
    if log.exit_code == 0 && log.error.is_none() {
        return log;
    }
    let haystack = log.output.to_lowercase();
    for (pattern, message) in rules {
        if haystack.contains(&pattern.to_lowercase()) {
            return ExecutionLog {
                error: Some(message.clone()),
                ..log
            };
        }
    }
    log
}
