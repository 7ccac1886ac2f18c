//! WSL distro executor - runs commands inside a named guest distribution.

use async_trait::async_trait;

use super::process::{ProcessSpec, run_process};
use super::shell::with_shell_fallback;
use super::{BackendExecutor, ExecutorOptions, FALLBACK_SHELL, PREFERRED_SHELL, normalize_failure};
use crate::domain::{ConnectionKind, DistroTarget, EXIT_LOCAL_FAILURE, ExecutionLog};
use crate::error::Result;

pub struct DistroExecutor {
    target: DistroTarget,
    options: ExecutorOptions,
}

impl DistroExecutor {
    pub fn new(target: DistroTarget, options: ExecutorOptions) -> Self {
        Self { target, options }
    }

    pub(crate) fn spec(&self, shell: &str, command: &str) -> ProcessSpec {
        let mut spec = ProcessSpec::new("wsl").arg("-d").arg(self.target.distro.clone());
        if let Some(user) = &self.target.user {
            spec = spec.arg("-u").arg(user.clone());
        }
        spec.arg("--").arg(shell).arg("-c").arg(command)
    }

    fn failure_rules(&self) -> Vec<(&'static str, String)> {
        let distro = &self.target.distro;
        vec![
            (
                "there is no distribution with the supplied name",
                format!("WSL distribution '{}' is not installed", distro),
            ),
            ("wsl_e_distro_not_found", format!("WSL distribution '{}' is not installed", distro)),
            ("wsl is not installed", "WSL is not available on this host".to_string()),
            (
                "windows subsystem for linux has no installed distributions",
                "WSL has no installed distributions".to_string(),
            ),
            ("user not found", format!("User not found in WSL distribution '{}'", distro)),
        ]
    }
}

/// Whether the failure was reported by wsl.exe itself rather than the
/// command running inside the distro.
fn is_wsl_failure(log: &ExecutionLog) -> bool {
    let output = log.output.trim_start().to_lowercase();
    log.exit_code == EXIT_LOCAL_FAILURE
        || output.contains("error code: wsl/")
        || output.contains("wsl_e_")
        || output.starts_with("<3>wsl")
        || output.starts_with("windows subsystem for linux")
        || output.starts_with("wsl is not installed")
}

#[async_trait]
impl BackendExecutor for DistroExecutor {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::Distro
    }

    async fn execute(&self, command: &str) -> Result<ExecutionLog> {
        log::debug!("wsl exec in {}: {}", self.target.distro, command);
        let log = with_shell_fallback(PREFERRED_SHELL, FALLBACK_SHELL, |shell| async move {
            Ok(run_process(
                &self.spec(&shell, command),
                command,
                self.options.command_timeout,
                self.options.max_output_bytes,
            )
            .await)
        })
        .await?;
        if is_wsl_failure(&log) {
            return Ok(normalize_failure(log, &self.failure_rules()));
        }
        Ok(log)
    }

    async fn disconnect(&self) {}
}
