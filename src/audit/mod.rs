//! Append-only audit trail for authorization attempts and executions.

pub mod record;
pub mod recorder;
pub mod sink;

pub use record::{
    AttemptId, AuditDetails, AuditOperation, AuditRecord, ExecutionDetails, OutcomeRejection,
};
pub use recorder::AuditRecorder;
pub use sink::{AUDIT_TARGET, AuditSink, JsonFileAuditSink, LogAuditSink, MemoryAuditSink};
