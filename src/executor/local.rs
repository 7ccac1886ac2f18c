//! Local executor - runs commands in the host's default shell.

use async_trait::async_trait;

use super::process::{ProcessSpec, run_process};
use super::{BackendExecutor, ExecutorOptions};
use crate::domain::{ConnectionKind, ExecutionLog};
use crate::error::Result;

pub struct LocalExecutor {
    options: ExecutorOptions,
}

impl LocalExecutor {
    pub fn new(options: ExecutorOptions) -> Self {
        Self { options }
    }

    fn spec(command: &str) -> ProcessSpec {
        if cfg!(windows) {
            ProcessSpec::new("cmd").arg("/C").arg(command)
        } else {
            ProcessSpec::new("sh").arg("-c").arg(command)
        }
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new(ExecutorOptions::default())
    }
}

#[async_trait]
impl BackendExecutor for LocalExecutor {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::Local
    }

    async fn execute(&self, command: &str) -> Result<ExecutionLog> {
        log::debug!("local exec: {}", command);
        Ok(run_process(
            &Self::spec(command),
            command,
            self.options.command_timeout,
            self.options.max_output_bytes,
        )
        .await)
    }

    async fn disconnect(&self) {}
}
