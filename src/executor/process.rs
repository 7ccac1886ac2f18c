//! Child-process runner shared by the CLI-backed executors.

use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::domain::{EXIT_LOCAL_FAILURE, ExecutionLog};

const TRUNCATION_MARKER: &str = "\n... [output truncated]";

/// A program invocation on the host running shellpilot.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Run `spec` to completion and fold the result into an `ExecutionLog`
/// recorded against `command`.
///
/// stdout and stderr share one `max_output_bytes` budget and are joined. On
/// timeout the child is killed and the log carries exit code 124.
pub async fn run_process(
    spec: &ProcessSpec,
    command: &str,
    timeout: Duration,
    max_output_bytes: usize,
) -> ExecutionLog {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return ExecutionLog::failed(
                command,
                format!("{} is not installed or not on PATH", spec.program),
                EXIT_LOCAL_FAILURE,
            );
        }
        Err(e) => {
            return ExecutionLog::failed(
                command,
                format!("Failed to spawn {}: {}", spec.program, e),
                EXIT_LOCAL_FAILURE,
            );
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let budget = AtomicUsize::new(max_output_bytes);
    let result = tokio::time::timeout(timeout, async {
        let (out, err, status) = tokio::join!(
            read_capped(stdout, &budget),
            read_capped(stderr, &budget),
            child.wait()
        );
        Ok::<_, std::io::Error>((out?, err?, status?))
    })
    .await;

    match result {
        Ok(Ok((stdout, stderr, status))) => {
            let output = join_output(stdout, stderr);
            ExecutionLog::completed(command, output, status.code().unwrap_or(EXIT_LOCAL_FAILURE))
        }
        Ok(Err(e)) => ExecutionLog::failed(command, format!("IO error: {}", e), EXIT_LOCAL_FAILURE),
        Err(_) => {
            let _ = child.start_kill();
            log::warn!("command timed out after {}ms: {}", timeout.as_millis(), command);
            ExecutionLog::timed_out(command, timeout.as_millis() as u64)
        }
    }
}

/// Read a stream to EOF, keeping only what fits in the shared `budget`.
///
/// The rest is drained so the child never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>, budget: &AtomicUsize) -> std::io::Result<(Vec<u8>, bool)> {
    let Some(mut reader) = reader else {
        return Ok((Vec::new(), false));
    };
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut truncated = false;
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = claim(budget, n);
        buf.extend_from_slice(&chunk[..room]);
        if room < n {
            truncated = true;
        }
    }
    Ok((buf, truncated))
}

/// Take up to `wanted` bytes from `budget`, returning how many were granted.
fn claim(budget: &AtomicUsize, wanted: usize) -> usize {
    let previous = budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| Some(left.saturating_sub(wanted)))
        .unwrap_or(0);
    previous.min(wanted)
}

fn join_output(stdout: (Vec<u8>, bool), stderr: (Vec<u8>, bool)) -> String {
    let mut output = decode(&stdout.0);
    if stdout.1 {
        output.push_str(TRUNCATION_MARKER);
    }
    let err = decode(&stderr.0);
    if !err.is_empty() {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&err);
        if stderr.1 {
            output.push_str(TRUNCATION_MARKER);
        }
    }
    output
}

/// Lossy UTF-8 decode. NUL bytes are dropped: WSL reports its own errors
/// in UTF-16.
fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).replace('\0', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> ProcessSpec {
        ProcessSpec::new("sh").arg("-c").arg(script)
    }

    #[tokio::test]
    async fn test_run_process_captures_stdout_and_stderr() {
        let log = run_process(
            &sh("echo out; echo err >&2"),
            "demo",
            Duration::from_secs(10),
            1024,
        )
        .await;
        assert_eq!(log.exit_code, 0);
        assert_eq!(log.command, "demo");
        assert!(log.output.contains("out"));
        assert!(log.output.contains("err"));
    }

    #[tokio::test]
    async fn test_run_process_exit_code() {
        let log = run_process(&sh("exit 3"), "exit 3", Duration::from_secs(10), 1024).await;
        assert_eq!(log.exit_code, 3);
        assert!(log.error.is_none());
    }

    #[tokio::test]
    async fn test_run_process_timeout() {
        let log = run_process(&sh("sleep 10"), "sleep 10", Duration::from_millis(100), 1024).await;
        assert_eq!(log.exit_code, 124);
        assert!(log.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_run_process_missing_program() {
        let spec = ProcessSpec::new("definitely-not-a-program-xyz123");
        let log = run_process(&spec, "x", Duration::from_secs(1), 1024).await;
        assert_eq!(log.exit_code, EXIT_LOCAL_FAILURE);
        assert!(log.error.unwrap().contains("not installed"));
    }

    #[tokio::test]
    async fn test_run_process_truncates_output() {
        let log = run_process(
            &sh("head -c 5000 /dev/zero | tr '\\0' a"),
            "big",
            Duration::from_secs(10),
            100,
        )
        .await;
        assert_eq!(log.exit_code, 0);
        assert!(log.output.starts_with(&"a".repeat(100)));
        assert!(log.output.contains("[output truncated]"));
    }

    #[tokio::test]
    async fn test_output_budget_shared_by_both_streams() {
        let log = run_process(
            &sh("head -c 3000 /dev/zero | tr '\\0' x; head -c 3000 /dev/zero | tr '\\0' y >&2"),
            "noisy",
            Duration::from_secs(10),
            1024,
        )
        .await;
        assert_eq!(log.exit_code, 0);
        let captured = log.output.chars().filter(|c| *c == 'x' || *c == 'y').count();
        assert_eq!(captured, 1024);
        assert!(log.output.len() <= 1024 + 2 * TRUNCATION_MARKER.len() + 1);
    }

    #[test]
    fn test_claim_never_exceeds_budget() {
        let budget = AtomicUsize::new(10);
        assert_eq!(claim(&budget, 4), 4);
        assert_eq!(claim(&budget, 8), 6);
        assert_eq!(claim(&budget, 8), 0);
    }

    #[tokio::test]
    async fn test_run_process_passes_env() {
        let spec = sh("printf %s \"$GREETING\"").env("GREETING", "hola");
        let log = run_process(&spec, "env", Duration::from_secs(10), 1024).await;
        assert_eq!(log.output, "hola");
    }

    #[test]
    fn test_decode_drops_nul_bytes() {
        assert_eq!(decode(b"W\0S\0L\0"), "WSL");
    }
}
