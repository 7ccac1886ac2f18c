//! Pod executor - runs commands through `kubectl exec`.

use async_trait::async_trait;

use super::process::{ProcessSpec, run_process};
use super::shell::with_shell_fallback;
use super::{BackendExecutor, ExecutorOptions, FALLBACK_SHELL, PREFERRED_SHELL, normalize_failure};
use crate::domain::{ConnectionKind, EXIT_LOCAL_FAILURE, ExecutionLog, PodTarget};
use crate::error::Result;

pub struct PodExecutor {
    target: PodTarget,
    options: ExecutorOptions,
}

impl PodExecutor {
    pub fn new(target: PodTarget, options: ExecutorOptions) -> Self {
        Self { target, options }
    }

    pub(crate) fn spec(&self, shell: &str, command: &str) -> ProcessSpec {
        let mut spec = ProcessSpec::new("kubectl");
        if let Some(kubeconfig) = &self.target.kubeconfig {
            spec = spec.arg("--kubeconfig").arg(kubeconfig.display().to_string());
        }
        if let Some(context) = &self.target.context {
            spec = spec.arg("--context").arg(context.clone());
        }
        spec = spec
            .arg("exec")
            .arg("-n")
            .arg(self.target.namespace.clone())
            .arg(self.target.pod.clone());
        if let Some(container) = &self.target.container {
            spec = spec.arg("-c").arg(container.clone());
        }
        spec.arg("--").arg(shell).arg("-c").arg(command)
    }

    fn failure_rules(&self) -> Vec<(&'static str, String)> {
        let pod = &self.target.pod;
        let ns = &self.target.namespace;
        vec![
            (
                "container not found",
                format!(
                    "Container '{}' not found in pod '{}'",
                    self.target.container.as_deref().unwrap_or("default"),
                    pod
                ),
            ),
            ("forbidden", format!("Not allowed to exec into pod '{}' in namespace '{}'", pod, ns)),
            ("notfound", format!("Pod '{}' not found in namespace '{}'", pod, ns)),
            ("pods \"", format!("Pod '{}' not found in namespace '{}'", pod, ns)),
            ("containercreating", format!("Pod '{}' is not ready (container creating)", pod)),
            ("does not have a host assigned", format!("Pod '{}' is not ready (unscheduled)", pod)),
            ("is not running", format!("Pod '{}' is not ready", pod)),
            ("unable to connect to the server", "Kubernetes API server is not reachable".to_string()),
            ("kubectl is not installed", "kubectl is not installed".to_string()),
        ]
    }
}

/// Whether the failure came from kubectl or the API server rather than the
/// command running inside the pod.
fn is_kubectl_failure(log: &ExecutionLog) -> bool {
    let output = log.output.trim_start().to_lowercase();
    log.exit_code == EXIT_LOCAL_FAILURE
        || output.starts_with("error")
        || output.starts_with("unable to connect to the server")
}

#[async_trait]
impl BackendExecutor for PodExecutor {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::Pod
    }

    async fn execute(&self, command: &str) -> Result<ExecutionLog> {
        log::debug!("pod exec in {}/{}: {}", self.target.namespace, self.target.pod, command);
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
        if is_kubectl_failure(&log) {
            return Ok(normalize_failure(log, &self.failure_rules()));
        }
        Ok(log)
    }

    async fn disconnect(&self) {}
}
