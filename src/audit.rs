//! Append-only record of completed operations.
//!
//! Every successful seal or open adds one record. Records describe what was
//! processed and where it went; they never contain key material. Records can
//! be forwarded to pluggable sinks, for example a JSON-lines file.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A sink that receives audit records. Implement this to forward records
/// to a file, database, or other persistent store.
pub trait AuditSink: Send {
    /// Append a record. Called once per completed operation.
    fn append(&mut self, record: &OperationRecord);
}

/// Which direction of the pipeline ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Seal,
    Open,
}

/// A permanent record of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub operation: Operation,
    /// The path that was read.
    pub input: PathBuf,
    /// The blob written, or the directory restored into.
    pub output: PathBuf,
    /// Number of archive entries.
    pub entries: usize,
    /// Size of the archive stream in bytes.
    pub archive_bytes: usize,
    pub timestamp: DateTime<Utc>,
}

impl OperationRecord {
    pub fn new(
        operation: Operation,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        entries: usize,
        archive_bytes: usize,
    ) -> Self {
        Self {
            operation,
            input: input.into(),
            output: output.into(),
            entries,
            archive_bytes,
            timestamp: Utc::now(),
        }
    }
}

/// An append-only log of operations.
/// Can forward records to additional sinks via `add_forward_sink`.
#[derive(Default)]
pub struct AuditLog {
    records: Vec<OperationRecord>,
    forward_sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("records", &self.records)
            .field("forward_sinks", &self.forward_sinks.len())
            .finish()
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink to receive a copy of every record.
    pub fn add_forward_sink(&mut self, sink: Box<dyn AuditSink>) {
        self.forward_sinks.push(sink);
    }

    /// Append a new record to the log and forward to any attached sinks.
    pub fn append(&mut self, record: OperationRecord) {
        for sink in self.forward_sinks.iter_mut() {
            sink.append(&record);
        }
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, OperationRecord> {
        self.records.iter()
    }
}

// ---------------------------------------------------------------------------
// Built-in sink: file
// ---------------------------------------------------------------------------

/// Writes audit records as JSON lines (one per record) to a file.
/// Creates the file if it doesn't exist; appends if it does.
pub struct FileAuditSink {
    file: std::fs::File,
}

impl FileAuditSink {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl AuditSink for FileAuditSink {
    fn append(&mut self, record: &OperationRecord) {
        let written = serde_json::to_string(record)
            .map_err(std::io::Error::from)
            .and_then(|line| writeln!(self.file, "{line}"))
            .and_then(|()| self.file.flush());
        if let Err(err) = written {
            warn!(error = %err, "failed to write audit record");
        }
    }
}
