//! Remote shell executor - OpenSSH with a multiplexed control master.
//!
//! `connect` authenticates once and leaves a master process holding the
//! session; every command reuses it through the control socket, so the
//! connect timeout and the command timeout are independent.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::process::{ProcessSpec, run_process};
use super::{BackendExecutor, ExecutorOptions, normalize_failure};
use crate::domain::{ConnectionKind, EXIT_LOCAL_FAILURE, ExecutionLog, RemoteShellTarget};
use crate::error::{PilotError, Result};
use crate::id::{generate_run_id, short_digest};

/// ssh exits 255 when the connection itself failed
const SSH_CONNECTION_FAILURE: i32 = 255;

pub struct RemoteShellExecutor {
    target: RemoteShellTarget,
    options: ExecutorOptions,
    control_path: PathBuf,
    connected: AtomicBool,
}

impl RemoteShellExecutor {
    /// Open an authenticated session to `target`.
    pub async fn connect(target: RemoteShellTarget, options: ExecutorOptions) -> Result<Self> {
        let dir = std::env::temp_dir().join("shellpilot-ssh");
        std::fs::create_dir_all(&dir)?;
        let control_path = dir.join(format!(
            "{}.sock",
            short_digest(&format!("{}#{}", target.address(), generate_run_id()))
        ));

        let executor = Self {
            target,
            options,
            control_path,
            connected: AtomicBool::new(false),
        };

        let timeout = executor.connect_timeout();
        log::info!("opening ssh session to {}", executor.target.address());
        let log = run_process(
            &executor.master_spec(),
            "ssh-connect",
            timeout + Duration::from_secs(5),
            64 * 1024,
        )
        .await;

        if log.exit_code != 0 {
            let log = normalize_failure(log, &executor.failure_rules());
            let reason = log.error.unwrap_or(log.output);
            return Err(PilotError::Connection(format!(
                "ssh to {} failed: {}",
                executor.target.address(),
                reason.trim()
            )));
        }

        executor.connected.store(true, Ordering::SeqCst);
        Ok(executor)
    }

    pub fn target(&self) -> &RemoteShellTarget {
        &self.target
    }

    fn connect_timeout(&self) -> Duration {
        self.target
            .connect_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.options.connect_timeout)
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.target.user, self.target.host)
    }

    /// `ssh`, or `sshpass -e ssh` with the password in the environment.
    fn base_spec(&self) -> ProcessSpec {
        match &self.target.password {
            Some(password) => ProcessSpec::new("sshpass")
                .arg("-e")
                .arg("ssh")
                .env("SSHPASS", password.clone()),
            None => ProcessSpec::new("ssh"),
        }
    }

    pub(crate) fn master_spec(&self) -> ProcessSpec {
        let mut spec = self.base_spec().args([
            "-M".to_string(),
            "-N".to_string(),
            "-f".to_string(),
            "-o".to_string(),
            "ControlMaster=yes".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
            "-o".to_string(),
            "ControlPersist=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout().as_secs().max(1)),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            "ServerAliveInterval=30".to_string(),
            "-p".to_string(),
            self.target.port.to_string(),
        ]);
        if self.target.password.is_none() {
            spec = spec.arg("-o").arg("BatchMode=yes");
        }
        if let Some(key) = &self.target.private_key {
            spec = spec.arg("-i").arg(key.display().to_string());
        }
        spec.arg(self.destination())
    }

    pub(crate) fn exec_spec(&self, command: &str) -> ProcessSpec {
        ProcessSpec::new("ssh")
            .args([
                "-o".to_string(),
                format!("ControlPath={}", self.control_path.display()),
                "-o".to_string(),
                "ControlMaster=no".to_string(),
                "-o".to_string(),
                "BatchMode=yes".to_string(),
                "-p".to_string(),
                self.target.port.to_string(),
                self.destination(),
                "--".to_string(),
            ])
            .arg(command)
    }

    fn failure_rules(&self) -> Vec<(&'static str, String)> {
        let addr = self.target.address();
        vec![
            ("permission denied", format!("Authentication failed for {}", addr)),
            ("host key verification failed", format!("Host key verification failed for {}", addr)),
            ("could not resolve hostname", format!("Could not resolve host {}", self.target.host)),
            ("connection refused", format!("Connection refused by {}", addr)),
            ("timed out", format!("Connection to {} timed out", addr)),
            ("no route to host", format!("No route to host {}", self.target.host)),
            ("sshpass is not installed", "Password authentication requires sshpass".to_string()),
            ("ssh is not installed", "OpenSSH client is not installed".to_string()),
        ]
    }
}

#[async_trait]
impl BackendExecutor for RemoteShellExecutor {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::RemoteShell
    }

    async fn execute(&self, command: &str) -> Result<ExecutionLog> {
        if !self.connected.load(Ordering::SeqCst) {
            return Ok(ExecutionLog::failed(
                command,
                format!("Session to {} is closed", self.target.address()),
                EXIT_LOCAL_FAILURE,
            ));
        }
        log::debug!("ssh exec on {}: {}", self.target.address(), command);
        let log = run_process(
            &self.exec_spec(command),
            command,
            self.options.command_timeout,
            self.options.max_output_bytes,
        )
        .await;

        if log.exit_code == SSH_CONNECTION_FAILURE {
            let mut rules = self.failure_rules();
            rules.push((
                "",
                format!("Connection to {} lost", self.target.address()),
            ));
            return Ok(normalize_failure(log, &rules));
        }
        Ok(log)
    }

    async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        log::info!("closing ssh session to {}", self.target.address());
        let spec = ProcessSpec::new("ssh").args([
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
            "-O".to_string(),
            "exit".to_string(),
            self.destination(),
        ]);
        let _ = run_process(&spec, "ssh-disconnect", Duration::from_secs(10), 4096).await;
        let _ = std::fs::remove_file(&self.control_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> RemoteShellTarget {
        RemoteShellTarget {
            host: "10.0.0.5".to_string(),
            port: 2222,
            user: "deploy".to_string(),
            password: None,
            private_key: Some(PathBuf::from("/keys/id_ed25519")),
            connect_timeout_ms: Some(15_000),
        }
    }

    fn executor(target: RemoteShellTarget) -> RemoteShellExecutor {
        RemoteShellExecutor {
            target,
            options: ExecutorOptions::default(),
            control_path: PathBuf::from("/tmp/shellpilot-ssh/test.sock"),
            connected: AtomicBool::new(true),
        }
    }

    #[test]
    fn test_master_spec_with_key() {
        let spec = executor(target()).master_spec();
        assert_eq!(spec.program, "ssh");
        assert!(spec.args.contains(&"-M".to_string()));
        assert!(spec.args.contains(&"ConnectTimeout=15".to_string()));
        assert!(spec.args.contains(&"BatchMode=yes".to_string()));
        assert!(spec.args.contains(&"/keys/id_ed25519".to_string()));
        assert_eq!(spec.args.last().unwrap(), "deploy@10.0.0.5");
    }

    #[test]
    fn test_master_spec_with_password_uses_sshpass_env() {
        let mut t = target();
        t.password = Some("s3cret".to_string());
        t.private_key = None;
        let spec = executor(t).master_spec();
        assert_eq!(spec.program, "sshpass");
        assert_eq!(spec.args[0], "-e");
        assert_eq!(spec.args[1], "ssh");
        assert_eq!(spec.env, vec![("SSHPASS".to_string(), "s3cret".to_string())]);
        assert!(!spec.args.iter().any(|a| a.contains("s3cret")));
        assert!(!spec.args.contains(&"BatchMode=yes".to_string()));
    }

    #[test]
    fn test_exec_spec_reuses_control_socket() {
        let spec = executor(target()).exec_spec("systemctl status nginx");
        assert_eq!(spec.program, "ssh");
        assert!(spec.args.contains(&"ControlPath=/tmp/shellpilot-ssh/test.sock".to_string()));
        assert!(spec.args.contains(&"ControlMaster=no".to_string()));
        assert_eq!(spec.args.last().unwrap(), "systemctl status nginx");
        assert_eq!(spec.args[spec.args.len() - 2], "--");
    }

    #[test]
    fn test_connect_timeout_falls_back_to_options() {
        let mut t = target();
        t.connect_timeout_ms = None;
        assert_eq!(executor(t).connect_timeout(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_closed_session_returns_failed_log() {
        let exec = executor(target());
        exec.connected.store(false, Ordering::SeqCst);
        let log = exec.execute("uptime").await.unwrap();
        assert_eq!(log.exit_code, EXIT_LOCAL_FAILURE);
        assert!(log.error.unwrap().contains("closed"));
    }
}
