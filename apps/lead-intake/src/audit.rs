use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditStage {
    Validated,
    Persisted,
    Matched,
    Notified,
}

impl AuditStage {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validated => "validated",
            Self::Persisted => "persisted",
            Self::Matched => "matched",
            Self::Notified => "notified",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Accepted,
    Rejected,
    Primary,
    Fallback,
    Failed,
    Resolved,
    Delivered,
    PermanentFailure,
    RetriesExhausted,
    Abandoned,
    Notified,
    PartiallyNotified,
    Unnotified,
}

impl AuditOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Primary => "primary",
            Self::Fallback => "fallback",
            Self::Failed => "failed",
            Self::Resolved => "resolved",
            Self::Delivered => "delivered",
            Self::PermanentFailure => "permanent_failure",
            Self::RetriesExhausted => "retries_exhausted",
            Self::Abandoned => "abandoned",
            Self::Notified => "notified",
            Self::PartiallyNotified => "partially_notified",
            Self::Unnotified => "unnotified",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<String>,
    pub stage: AuditStage,
    pub outcome: AuditOutcome,
    #[serde(default)]
    pub detail: Value,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only destination for audit records. `append` must not block.
pub trait AuditSink: Send + Sync {
    fn append(&self, record: AuditRecord);
}

#[derive(Clone)]
pub struct AuditLog {
    sink: Arc<dyn AuditSink>,
}

impl AuditLog {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Fire-and-forget. Failures inside the sink never reach the caller.
    pub fn record(
        &self,
        lead_id: Option<&str>,
        stage: AuditStage,
        outcome: AuditOutcome,
        detail: Value,
    ) {
        tracing::info!(
            lead_id = lead_id.unwrap_or("-"),
            stage = stage.as_str(),
            outcome = outcome.as_str(),
            detail = %detail,
            "lead audit"
        );
        self.sink.append(AuditRecord {
            lead_id: lead_id.map(str::to_string),
            stage,
            outcome,
            detail,
            recorded_at: Utc::now(),
        });
    }
}

enum AuditCommand {
    Append(AuditRecord),
    Flush(oneshot::Sender<()>),
}

/// JSON-lines sink backed by a single writer task. Records are written in the
/// order they were appended.
#[derive(Clone)]
pub struct JsonlAuditSink {
    tx: mpsc::UnboundedSender<AuditCommand>,
}

impl JsonlAuditSink {
    /// The writer task exits once every clone of the sink has been dropped.
    pub fn spawn(path: impl Into<PathBuf>) -> (Self, JoinHandle<()>) {
        let path = path.into();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            let mut file = open_append(&path).await;
            while let Some(command) = rx.recv().await {
                match command {
                    AuditCommand::Append(record) => {
                        if file.is_none() {
                            file = open_append(&path).await;
                        }
                        let Some(opened) = file.as_mut() else {
                            continue;
                        };
                        let mut line = match serde_json::to_string(&record) {
                            Ok(line) => line,
                            Err(error) => {
                                tracing::warn!(reason = %error, "failed to encode audit record");
                                continue;
                            }
                        };
                        line.push('\n');
                        if let Err(error) = opened.write_all(line.as_bytes()).await {
                            tracing::warn!(reason = %error, path = %path.display(), "failed to write audit record");
                            file = None;
                            continue;
                        }
                        let _ = opened.flush().await;
                    }
                    AuditCommand::Flush(done) => {
                        if let Some(opened) = file.as_mut() {
                            let _ = opened.flush().await;
                        }
                        let _ = done.send(());
                    }
                }
            }
        });
        (Self { tx }, handle)
    }

    /// Waits until every record appended before this call has been written.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(AuditCommand::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn open_append(path: &Path) -> Option<tokio::fs::File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
    {
        Ok(file) => Some(file),
        Err(error) => {
            tracing::warn!(reason = %error, path = %path.display(), "failed to open audit log");
            None
        }
    }
}

impl AuditSink for JsonlAuditSink {
    fn append(&self, record: AuditRecord) {
        if self.tx.send(AuditCommand::Append(record)).is_err() {
            tracing::warn!("audit writer stopped, dropping record");
        }
    }
}

/// Keeps nothing. Records still reach the log through `AuditLog::record`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiscardAuditSink;

impl AuditSink for DiscardAuditSink {
    fn append(&self, _record: AuditRecord) {}
}

/// In-process sink for tests and embedding callers.
#[derive(Clone, Default)]
pub struct MemoryAuditSink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn records_for(&self, lead_id: &str) -> Vec<AuditRecord> {
        self.records()
            .into_iter()
            .filter(|record| record.lead_id.as_deref() == Some(lead_id))
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, record: AuditRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}
