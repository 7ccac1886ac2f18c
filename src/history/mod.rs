//! Command history store
//!
//! The agent loop hands every finished command log to a `HistoryStore`.
//! The loop never reads the history back; readers are for tooling and tests.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::domain::ExecutionLog;
use crate::error::{PilotError, Result};

/// One persisted command, tagged with the connection it ran on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub connection_id: String,
    pub timestamp: DateTime<Utc>,
    pub command: String,
    pub output: String,
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HistoryEntry {
    pub fn new(connection_id: &str, log: &ExecutionLog) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            timestamp: log.timestamp,
            command: log.command.clone(),
            output: log.output.clone(),
            exit_code: log.exit_code,
            error: log.error.clone(),
        }
    }
}

/// Append-only sink for executed commands.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn record_command(&self, connection_id: &str, log: &ExecutionLog) -> Result<()>;
}

/// Store that keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHistory;

#[async_trait]
impl HistoryStore for NoHistory {
    async fn record_command(&self, _connection_id: &str, _log: &ExecutionLog) -> Result<()> {
        Ok(())
    }
}

/// In-process store, mostly for tests.
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn record_command(&self, connection_id: &str, log: &ExecutionLog) -> Result<()> {
        self.entries
            .lock()
            .map_err(|e| PilotError::History(e.to_string()))?
            .push(HistoryEntry::new(connection_id, log));
        Ok(())
    }
}

/// One JSONL file per connection under a base directory.
pub struct JsonlHistoryStore {
    base_path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlHistoryStore {
    /// Create the store, creating `base_path` if needed.
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// File backing one connection's history.
    pub fn connection_path(&self, connection_id: &str) -> PathBuf {
        let safe: String = connection_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.base_path.join(format!("{}.jsonl", safe))
    }

    async fn append(&self, entry: &HistoryEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let path = self.connection_path(&entry.connection_id);

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// All entries recorded for a connection, oldest first.
    pub fn read(&self, connection_id: &str) -> Result<Vec<HistoryEntry>> {
        let path = self.connection_path(connection_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if !line.trim().is_empty() {
                entries.push(serde_json::from_str(&line)?);
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl HistoryStore for JsonlHistoryStore {
    async fn record_command(&self, connection_id: &str, log: &ExecutionLog) -> Result<()> {
        self.append(&HistoryEntry::new(connection_id, log)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_jsonl_append_and_read() {
        let temp = TempDir::new().unwrap();
        let store = JsonlHistoryStore::new(temp.path().join("history")).unwrap();

        store
            .record_command("web-1", &ExecutionLog::completed("which nginx", "", 1))
            .await
            .unwrap();
        store
            .record_command("web-1", &ExecutionLog::completed("apt-get install -y nginx", "done", 0))
            .await
            .unwrap();
        store
            .record_command("db", &ExecutionLog::completed("psql --version", "14", 0))
            .await
            .unwrap();

        let entries = store.read("web-1").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].command, "which nginx");
        assert_eq!(entries[1].exit_code, 0);
        assert_eq!(store.read("db").unwrap().len(), 1);
        assert!(store.read("unknown").unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_stay_line_delimited() {
        let temp = TempDir::new().unwrap();
        let store = std::sync::Arc::new(JsonlHistoryStore::new(temp.path()).unwrap());

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let output = "x".repeat(64 * 1024);
                store
                    .record_command("web-1", &ExecutionLog::completed(format!("echo {}", i), output, 0))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let entries = store.read("web-1").unwrap();
        assert_eq!(entries.len(), 16);
        assert!(entries.iter().all(|e| e.output.len() == 64 * 1024));
    }

    #[test]
    fn test_connection_path_is_sanitized() {
        let temp = TempDir::new().unwrap();
        let store = JsonlHistoryStore::new(temp.path()).unwrap();
        let path = store.connection_path("../etc/passwd");
        assert_eq!(path, temp.path().join("___etc_passwd.jsonl"));
    }

    #[tokio::test]
    async fn test_entry_keeps_error() {
        let store = InMemoryHistoryStore::new();
        store
            .record_command("pod", &ExecutionLog::failed("ls", "Pod 'api' is not ready", -1))
            .await
            .unwrap();
        let entries = store.entries();
        assert_eq!(entries[0].error.as_deref(), Some("Pod 'api' is not ready"));
        assert_eq!(entries[0].connection_id, "pod");
    }

    #[test]
    fn test_entry_serializes_camel_case() {
        let entry = HistoryEntry::new("c", &ExecutionLog::completed("ls", "", 0));
        let value = serde_json::to_value(&entry).unwrap();
        assert!(value.get("connectionId").is_some());
        assert!(value.get("exitCode").is_some());
        assert!(value.get("error").is_none());
    }
}
