//! Audit recorder with local fallback.

use crate::audit::record::AuditRecord;
use crate::audit::sink::{AuditSink, JsonFileAuditSink, LogAuditSink};
use crate::config::AuditConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info, warn};

/// Writes every record to the primary sink, falling back to the log stream
/// when the sink fails. Never returns an error to the caller.
pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
    fallback: LogAuditSink,
    written: AtomicU64,
    fallbacks: AtomicU64,
}

impl AuditRecorder {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            fallback: LogAuditSink,
            written: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
        }
    }

    /// Build the sink described by `config`. A file sink that cannot be
    /// opened degrades to the log stream.
    pub fn from_config(config: &AuditConfig) -> Self {
        let sink: Arc<dyn AuditSink> = match &config.log_path {
            Some(path) => match JsonFileAuditSink::open(path, config.queue_capacity) {
                Ok(sink) => {
                    info!("Audit records will be appended to {}", path.display());
                    Arc::new(sink)
                }
                Err(e) => {
                    warn!(
                        "Cannot open audit log {}: {}. Falling back to log stream",
                        path.display(),
                        e
                    );
                    Arc::new(LogAuditSink)
                }
            },
            None => Arc::new(LogAuditSink),
        };
        Self::new(sink)
    }

    pub fn record(&self, record: AuditRecord) {
        self.written.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = self.sink.append(&record) {
            self.fallbacks.fetch_add(1, Ordering::Relaxed);
            warn!(
                sink = self.sink.name(),
                attempt_id = record.attempt_id.0,
                error = %e,
                "Audit sink unavailable, writing record to fallback"
            );
            if let Err(e) = self.fallback.append(&record) {
                error!(attempt_id = record.attempt_id.0, "Audit fallback failed: {}", e);
            }
        }
    }

    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    /// Records handed to the recorder.
    pub fn records_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Records that went to the fallback instead of the primary sink.
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::record::AttemptId;
    use crate::audit::sink::MemoryAuditSink;
    use crate::config::DatabaseTarget;
    use crate::error::{AuditError, AuditResult};
    use crate::security::{Decision, Identity};
    use std::path::PathBuf;

    struct BrokenSink;

    impl AuditSink for BrokenSink {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn append(&self, _record: &AuditRecord) -> AuditResult<()> {
            Err(AuditError::SinkUnavailable("disk full".into()))
        }
    }

    fn record() -> AuditRecord {
        AuditRecord::attempted(
            AttemptId(1),
            &Identity::new("alice", "s1"),
            &DatabaseTarget::default(),
            "SELECT 1",
            &Decision::allow(),
        )
    }

    #[test]
    fn test_records_to_primary_sink() {
        let sink = Arc::new(MemoryAuditSink::new());
        let recorder = AuditRecorder::new(sink.clone());
        recorder.record(record());
        assert_eq!(sink.len(), 1);
        assert_eq!(recorder.records_written(), 1);
        assert_eq!(recorder.fallback_count(), 0);
    }

    #[test]
    fn test_broken_sink_falls_back() {
        let recorder = AuditRecorder::new(Arc::new(BrokenSink));
        recorder.record(record());
        recorder.record(record());
        assert_eq!(recorder.records_written(), 2);
        assert_eq!(recorder.fallback_count(), 2);
    }

    #[test]
    fn test_unopenable_file_degrades_to_log() {
        let config = AuditConfig {
            log_path: Some(PathBuf::from("/dev/null/not-a-dir/audit.jsonl")),
            queue_capacity: 8,
        };
        let recorder = AuditRecorder::from_config(&config);
        assert_eq!(recorder.sink_name(), "log");
        recorder.record(record());
    }

    #[test]
    fn test_default_config_uses_log_sink() {
        let recorder = AuditRecorder::from_config(&AuditConfig::default());
        assert_eq!(recorder.sink_name(), "log");
    }
}
