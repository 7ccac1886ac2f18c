//! Container executor - `docker exec` locally, or on a remote host over ssh.

use async_trait::async_trait;

use super::process::{ProcessSpec, run_process};
use super::remote_shell::RemoteShellExecutor;
use super::shell::{quote, with_shell_fallback};
use super::{BackendExecutor, ExecutorOptions, FALLBACK_SHELL, PREFERRED_SHELL, normalize_failure};
use crate::domain::{ConnectionKind, ContainerTarget, EXIT_LOCAL_FAILURE, ExecutionLog};
use crate::error::Result;

const RUNTIME: &str = "docker";

pub struct ContainerExecutor {
    container: String,
    shell: String,
    options: ExecutorOptions,
    remote: Option<RemoteShellExecutor>,
}

impl ContainerExecutor {
    /// Build an executor for `target`. Remote containers open their ssh
    /// session here.
    pub async fn connect(target: ContainerTarget, options: ExecutorOptions) -> Result<Self> {
        let remote = match target.remote {
            Some(host) => Some(RemoteShellExecutor::connect(host, options.clone()).await?),
            None => None,
        };
        Ok(Self {
            container: target.container,
            shell: target.shell.unwrap_or_else(|| PREFERRED_SHELL.to_string()),
            options,
            remote,
        })
    }

    pub fn is_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// The `docker exec` line as one shell string, for running through ssh.
    pub(crate) fn remote_command_line(&self, shell: &str, command: &str) -> String {
        format!(
            "{} exec {} {} -c {}",
            RUNTIME,
            quote(&self.container),
            quote(shell),
            quote(command)
        )
    }

    pub(crate) fn local_spec(&self, shell: &str, command: &str) -> ProcessSpec {
        ProcessSpec::new(RUNTIME)
            .arg("exec")
            .arg(self.container.clone())
            .arg(shell)
            .arg("-c")
            .arg(command)
    }

    async fn run_with_shell(&self, shell: String, command: &str) -> Result<ExecutionLog> {
        let log = match &self.remote {
            Some(remote) => {
                let log = remote.execute(&self.remote_command_line(&shell, command)).await?;
                ExecutionLog {
                    command: command.to_string(),
                    ..log
                }
            }
            None => {
                run_process(
                    &self.local_spec(&shell, command),
                    command,
                    self.options.command_timeout,
                    self.options.max_output_bytes,
                )
                .await
            }
        };
        Ok(log)
    }

    fn failure_rules(&self) -> Vec<(&'static str, String)> {
        vec![
            ("no such container", format!("Container '{}' does not exist", self.container)),
            ("is not running", format!("Container '{}' is not running", self.container)),
            ("is paused", format!("Container '{}' is paused", self.container)),
            (
                "cannot connect to the docker daemon",
                "Docker daemon is not reachable".to_string(),
            ),
            ("docker is not installed", "Docker CLI is not installed".to_string()),
            ("docker: command not found", "Docker CLI is not installed on the remote host".to_string()),
        ]
    }
}

/// Whether the failure came from the container runtime rather than the
/// command running inside the container.
fn is_runtime_failure(log: &ExecutionLog) -> bool {
    let output = log.output.trim_start().to_lowercase();
    log.exit_code == EXIT_LOCAL_FAILURE
        || output.starts_with("error")
        || output.starts_with("cannot connect to the docker daemon")
        || output.contains("docker: command not found")
}

#[async_trait]
impl BackendExecutor for ContainerExecutor {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::Container
    }

    async fn execute(&self, command: &str) -> Result<ExecutionLog> {
        log::debug!("container exec in {}: {}", self.container, command);
        let log = with_shell_fallback(&self.shell, FALLBACK_SHELL, |shell| self.run_with_shell(shell, command)).await?;
        if is_runtime_failure(&log) {
            return Ok(normalize_failure(log, &self.failure_rules()));
        }
        Ok(log)
    }

    async fn disconnect(&self) {
        if let Some(remote) = &self.remote {
            remote.disconnect().await;
        }
    }
}
