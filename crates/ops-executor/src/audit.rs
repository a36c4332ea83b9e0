//! Append-only audit trail for command execution
//!
//! Every call into the executor emits exactly one audit record, whatever
//! the outcome. The sink is pluggable; the executor never reads history
//! back. Appends may be buffered but must not be lost on graceful
//! shutdown, which the file sink satisfies by flushing per append.

use crate::{ExecutionMode, ExecutionRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ops_common::{Error, Result};
use ops_validator::CommandRisk;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

/// One line of the audit log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub initiator: String,
    pub command: String,
    pub risk_level: CommandRisk,
    pub mode: ExecutionMode,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub requires_approval: bool,
}

impl AuditRecord {
    pub fn from_execution(record: &ExecutionRecord) -> Self {
        Self {
            timestamp: record.started_at,
            initiator: record.initiator.clone(),
            command: record.command.clone(),
            risk_level: record.risk,
            mode: record.mode,
            success: record.success,
            exit_code: record.exit_code,
            duration_ms: record.duration_ms,
            requires_approval: record.requires_approval,
        }
    }
}

/// Pluggable audit destination
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<()>;
}

/// Line-delimited JSON file sink
pub struct FileAuditSink {
    path: PathBuf,
    file: Mutex<Option<tokio::fs::File>>,
}

impl FileAuditSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(None),
        }
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut guard = self.file.lock().await;
        let file = match guard.as_mut() {
            Some(file) => file,
            None => {
                if let Some(parent) = self.path.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        Error::Execution(format!("failed to create audit log directory: {}", e))
                    })?;
                }
                let file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .await
                    .map_err(|e| {
                        Error::Execution(format!(
                            "failed to open audit log {}: {}",
                            self.path.display(),
                            e
                        ))
                    })?;
                guard.insert(file)
            }
        };
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Execution(format!("audit append failed: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| Error::Execution(format!("audit flush failed: {}", e)))?;
        Ok(())
    }
}

/// In-memory sink for tests and embedded use
#[derive(Default)]
pub struct MemoryAuditSink {
    records: parking_lot::Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Emit a record, logging rather than propagating sink failures so an
/// audit outage cannot change execution outcomes.
pub(crate) async fn emit(sink: &dyn AuditSink, record: &ExecutionRecord) {
    let audit = AuditRecord::from_execution(record);
    if let Err(e) = sink.append(&audit).await {
        warn!(error = %e, command = %record.command, "failed to append audit record");
    }
}
