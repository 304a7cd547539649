//! Append-only audit log
//!
//! Confirmation records, recovery decisions and terminal task outcomes are
//! written to a single injected sink shared by all tasks. A sink that fails
//! to write never aborts a task; the failure is logged and the task goes on.

use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::agent::TaskStatus;
use crate::core::{ConfirmationRecord, RecoveryDecision, Result, WardenError};

/// Final state of a task, as written to the audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcomeRecord {
    pub task_id: Uuid,
    pub goal: String,
    pub status: TaskStatus,
    /// Number of executed steps
    pub steps: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub elapsed_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// One line of the audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEntry {
    Confirmation(ConfirmationRecord),
    Recovery {
        task_id: Uuid,
        decision: RecoveryDecision,
        timestamp: DateTime<Utc>,
    },
    Outcome(TaskOutcomeRecord),
}

impl AuditEntry {
    pub fn recovery(task_id: Uuid, decision: RecoveryDecision) -> Self {
        AuditEntry::Recovery {
            task_id,
            decision,
            timestamp: Utc::now(),
        }
    }

    pub fn task_id(&self) -> Uuid {
        match self {
            AuditEntry::Confirmation(record) => record.task_id,
            AuditEntry::Recovery { task_id, .. } => *task_id,
            AuditEntry::Outcome(outcome) => outcome.task_id,
        }
    }
}

/// Append-only destination for audit entries. Implementations serialize
/// concurrent writes.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append one entry
    async fn record(&self, entry: &AuditEntry) -> Result<()>;

    /// Flush buffered entries to durable storage
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Record an entry, reporting but otherwise ignoring failures
pub async fn record_or_warn(sink: &dyn AuditSink, entry: AuditEntry) {
    if let Err(e) = sink.record(&entry).await {
        warn!(task_id = %entry.task_id(), error = %e, "audit write failed");
    }
}

/// JSON-lines file sink
pub struct JsonlAuditSink {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl JsonlAuditSink {
    /// Open (or create) the log file for appending
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and release the file. Later writes fail.
    pub async fn close(&self) -> Result<()> {
        let mut guard = self.writer.lock().await;
        if let Some(mut writer) = guard.take() {
            writer.flush().await?;
            writer.shutdown().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn record(&self, entry: &AuditEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| WardenError::Other(format!("audit log {} is closed", self.path.display())))?;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        if let Some(writer) = self.writer.lock().await.as_mut() {
            writer.flush().await?;
        }
        Ok(())
    }
}

/// In-memory sink, mostly for tests and embedding
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: StdMutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn confirmations(&self) -> Vec<ConfirmationRecord> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                AuditEntry::Confirmation(record) => Some(record),
                _ => None,
            })
            .collect()
    }

    pub fn recoveries(&self) -> Vec<RecoveryDecision> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                AuditEntry::Recovery { decision, .. } => Some(decision),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: &AuditEntry) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry.clone());
        Ok(())
    }
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

#[async_trait]
impl AuditSink for NullAuditSink {
    async fn record(&self, _entry: &AuditEntry) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ConfirmationResponse, FailureKind, RecoveryStrategy, RiskTier};

    fn record(seq: u64) -> ConfirmationRecord {
        ConfirmationRecord {
            seq,
            task_id: Uuid::new_v4(),
            action_id: Uuid::new_v4(),
            tier: RiskTier::Critical,
            prompt: "Pay $10?".to_string(),
            response: ConfirmationResponse::Denied,
            latency_ms: 12,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");
        let sink = JsonlAuditSink::open(&path).await.unwrap();

        sink.record(&AuditEntry::Confirmation(record(0))).await.unwrap();
        let decision = RecoveryDecision {
            step_seq: 0,
            failed_action: None,
            failure: FailureKind::Structural,
            strategy: RecoveryStrategy::RetryAlternate,
            attempt: 0,
            backoff_ms: None,
            reason: "element gone".to_string(),
        };
        sink.record(&AuditEntry::recovery(Uuid::new_v4(), decision))
            .await
            .unwrap();
        sink.close().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"type\":\"confirmation\""));
        let parsed: AuditEntry = serde_json::from_str(lines[1]).unwrap();
        assert!(matches!(parsed, AuditEntry::Recovery { .. }));
    }

    #[tokio::test]
    async fn test_closed_sink_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlAuditSink::open(dir.path().join("audit.jsonl"))
            .await
            .unwrap();
        sink.close().await.unwrap();
        assert!(sink.record(&AuditEntry::Confirmation(record(1))).await.is_err());
        // Reporting helper swallows the error
        record_or_warn(&sink, AuditEntry::Confirmation(record(2))).await;
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemoryAuditSink::new();
        tokio_test::block_on(sink.record(&AuditEntry::Confirmation(record(0)))).unwrap();
        assert_eq!(sink.entries().len(), 1);
        assert_eq!(sink.confirmations()[0].seq, 0);
        assert!(sink.recoveries().is_empty());
    }
}
