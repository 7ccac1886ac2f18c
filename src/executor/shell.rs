//! Shell quoting and the missing-shell fallback used by container-like backends.

use std::future::Future;

use crate::domain::ExecutionLog;
use crate::error::Result;

/// Quote `s` as a single POSIX shell word.
///
/// Wraps in single quotes, so `$`, backticks, `"` and `\` are all literal;
/// embedded single quotes become `'\''`.
pub fn quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'/' | b':' | b'=' | b'@' | b','))
    {
        return s.to_string();
    }
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('\'');
    for ch in s.chars() {
        if ch == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}

/// Whether a failed log says `shell` itself could not be started, as opposed
/// to a command inside it failing.
pub fn shell_missing(log: &ExecutionLog, shell: &str) -> bool {
    if log.exit_code == 0 {
        return false;
    }
    let output = log.output.to_lowercase();
    let shell = shell.to_lowercase();
    [
        format!("\"{}\": executable file not found", shell),
        format!("exec: {}: not found", shell),
        format!("/{}: no such file or directory", shell),
        format!("exec {}: no such file or directory", shell),
        format!("{}: no such file or directory", shell),
    ]
    .iter()
    .any(|sig| {
        let bare = sig.starts_with(|c: char| c.is_ascii_alphanumeric());
        output.match_indices(sig.as_str()).any(|(i, _)| {
            // `bash: no such file` must start the word, not end `mybash: ...`
            !bare || i == 0 || !output.as_bytes()[i - 1].is_ascii_alphanumeric()
        })
    })
}

/// Run `run(preferred)`; if the preferred shell is missing on the target,
/// retry exactly once with `fallback`.
pub async fn with_shell_fallback<F, Fut>(preferred: &str, fallback: &str, mut run: F) -> Result<ExecutionLog>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<ExecutionLog>>,
{
    let log = run(preferred.to_string()).await?;
    if preferred != fallback && shell_missing(&log, preferred) {
        log::info!("{} not available on target, retrying with {}", preferred, fallback);
        return run(fallback.to_string()).await;
    }
    Ok(log)
}
