//! Audit sinks.
//!
//! A sink appends records and never rewrites or deletes them. An append never
//! waits on storage for longer than a short bounded time, so a stalled sink
//! cannot hold up authorization.

use crate::audit::record::AuditRecord;
use crate::error::{AuditError, AuditResult};
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info};

/// Tracing target used for audit records written to the log stream.
pub const AUDIT_TARGET: &str = "audit";

/// Append-only structured record store.
pub trait AuditSink: Send + Sync {
    /// Sink name for diagnostics.
    fn name(&self) -> &'static str;

    /// Append one record.
    fn append(&self, record: &AuditRecord) -> AuditResult<()>;
}

/// Emits records as structured `tracing` events under the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn append(&self, record: &AuditRecord) -> AuditResult<()> {
        let json = serde_json::to_string(record)?;
        info!(
            target: AUDIT_TARGET,
            attempt_id = record.attempt_id.0,
            operation = ?record.operation,
            record = %json,
            "AUDIT"
        );
        Ok(())
    }
}

/// In-memory sink, mainly for tests and embedding.
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
    write_timeout: Duration,
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            write_timeout: Duration::from_millis(50),
        }
    }

    /// Snapshot of all records in append order.
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

impl AuditSink for MemoryAuditSink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn append(&self, record: &AuditRecord) -> AuditResult<()> {
        let mut records = self
            .records
            .try_lock_for(self.write_timeout)
            .ok_or(AuditError::WriteTimeout(self.write_timeout))?;
        records.push(record.clone());
        Ok(())
    }
}

/// Appends one JSON document per line to a file.
///
/// Callers only enqueue serialized lines. A dedicated writer thread owns the
/// file and drains the queue, so a file that stops accepting writes fills the
/// queue instead of blocking `append`.
pub struct JsonFileAuditSink {
    path: PathBuf,
    queue: SyncSender<Vec<u8>>,
    worker: JoinHandle<()>,
}

impl JsonFileAuditSink {
    /// Open (or create) `path` for appending, queueing at most
    /// `queue_capacity` lines ahead of the writer.
    pub fn open(path: impl AsRef<Path>, queue_capacity: usize) -> AuditResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Self::from_writer(path, file, queue_capacity)
    }

    /// Drain lines into an arbitrary writer. `path` is only used for
    /// diagnostics.
    pub fn from_writer<W>(
        path: impl Into<PathBuf>,
        writer: W,
        queue_capacity: usize,
    ) -> AuditResult<Self>
    where
        W: Write + Send + 'static,
    {
        let path = path.into();
        let (queue, lines) = mpsc::sync_channel(queue_capacity.max(1));
        let label = path.display().to_string();
        let worker = thread::Builder::new()
            .name("audit-writer".to_string())
            .spawn(move || drain_lines(&label, lines, writer))?;

        Ok(Self {
            path,
            queue,
            worker,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop accepting records and wait until every queued line is written.
    pub fn close(self) {
        let Self { queue, worker, .. } = self;
        drop(queue);
        if worker.join().is_err() {
            error!(target: AUDIT_TARGET, "Audit writer thread panicked");
        }
    }
}

impl AuditSink for JsonFileAuditSink {
    fn name(&self) -> &'static str {
        "json_file"
    }

    fn append(&self, record: &AuditRecord) -> AuditResult<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        self.queue.try_send(line).map_err(|e| match e {
            TrySendError::Full(_) => AuditError::SinkUnavailable("audit write queue is full".into()),
            TrySendError::Disconnected(_) => {
                AuditError::SinkUnavailable("audit writer has stopped".into())
            }
        })
    }
}

/// Writer thread body. Runs until every sender is dropped.
fn drain_lines<W: Write>(label: &str, lines: Receiver<Vec<u8>>, inner: W) {
    let mut writer = BufWriter::new(inner);
    // A failed write may have left a partial line in the file.
    let mut torn = false;

    for line in lines {
        match write_line(&mut writer, &line, torn) {
            Ok(()) => torn = false,
            Err(e) => {
                // Drop the unwritten tail so it is not glued onto the next line.
                let (inner, _) = writer.into_parts();
                writer = BufWriter::new(inner);
                torn = true;
                error!(
                    target: AUDIT_TARGET,
                    path = label,
                    error = %e,
                    record = %String::from_utf8_lossy(&line).trim_end(),
                    "Audit file write failed"
                );
            }
        }
    }

    if let Err(e) = writer.flush() {
        error!(target: AUDIT_TARGET, path = label, error = %e, "Audit file flush failed");
    }
}

fn write_line<W: Write>(writer: &mut BufWriter<W>, line: &[u8], torn: bool) -> io::Result<()> {
    if torn {
        writer.write_all(b"\n")?;
    }
    writer.write_all(line)?;
    writer.flush()
}
