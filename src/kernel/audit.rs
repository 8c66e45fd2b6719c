//! Append-only audit trail of command resolutions.
//!
//! Every resolved command leaves exactly one record. Records are never
//! updated or deleted; a sink must refuse a second append with an
//! already-seen audit id.

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{CommandId, CommandType, CompanyId, RejectionCode, UserId, UserRole};

/// How a command resolved, from the audit trail's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditResult {
    /// The command was accepted.
    Accepted,
    /// The command was rejected.
    Rejected,
}

/// One immutable record of a command resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Unique record id, `audit_<uuid>`.
    pub audit_id: String,
    /// The resolved command.
    pub command_id: CommandId,
    /// Its type.
    pub command_type: CommandType,
    /// Tenant scope.
    pub company_id: CompanyId,
    /// Acting user.
    pub user_id: UserId,
    /// Role held by the actor at command creation.
    pub user_role: UserRole,
    /// Resolution.
    pub result: AuditResult,
    /// Rejection code, when rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_code: Option<RejectionCode>,
    /// Server clock at resolution.
    pub timestamp: DateTime<Utc>,
    /// Wall time the pipeline spent on the command.
    pub duration_ms: u64,
    /// Free-form diagnostic context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

/// Generate a fresh audit record id.
pub fn generate_audit_id() -> String {
    format!("audit_{}", Uuid::new_v4().simple())
}

/// Append-only audit sink.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append a record. Errors on a duplicate `audit_id`.
    async fn append(&self, record: &AuditRecord) -> anyhow::Result<()>;
}

/// Audit sink writing one JSON object per line to an append-only writer.
///
/// Duplicate detection is in-process: ids seen by this sink instance are
/// refused a second time.
pub struct JsonlAuditSink {
    writer: Mutex<Box<dyn Write + Send>>,
    seen: Mutex<HashSet<String>>,
}

impl JsonlAuditSink {
    /// Sink appending to the given file path.
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self::from_writer(Box::new(file)))
    }

    /// Sink over an arbitrary writer (for testing).
    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
            seen: Mutex::new(HashSet::new()),
        }
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn append(&self, record: &AuditRecord) -> anyhow::Result<()> {
        {
            let mut seen = self
                .seen
                .lock()
                .map_err(|_| anyhow::anyhow!("audit id set poisoned"))?;
            if !seen.insert(record.audit_id.clone()) {
                anyhow::bail!("duplicate audit id {}", record.audit_id);
            }
        }
        let line = serde_json::to_string(record)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("audit writer poisoned"))?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().map_or(Ok(0), |mut inner| inner.write(buf))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn record(audit_id: &str) -> AuditRecord {
        AuditRecord {
            audit_id: audit_id.to_owned(),
            command_id: "cmd-1".into(),
            command_type: CommandType::ShiftOpen,
            company_id: "co-1".into(),
            user_id: "user-1".into(),
            user_role: UserRole::Guard,
            result: AuditResult::Accepted,
            rejection_code: None,
            timestamp: Utc::now(),
            duration_ms: 12,
            context: None,
        }
    }

    #[tokio::test]
    async fn appends_one_json_line_per_record() {
        let buf = SharedBuf::default();
        let sink = JsonlAuditSink::from_writer(Box::new(buf.clone()));
        sink.append(&record("audit_a")).await.expect("append");
        sink.append(&record("audit_b")).await.expect("append");

        let bytes = buf.0.lock().expect("lock").clone();
        let text = String::from_utf8(bytes).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(first["auditId"], "audit_a");
        assert_eq!(first["commandType"], "shift.open");
        assert_eq!(first["result"], "ACCEPTED");
        assert!(first.get("rejectionCode").is_none());
    }

    #[tokio::test]
    async fn refuses_duplicate_audit_ids() {
        let sink = JsonlAuditSink::from_writer(Box::new(Vec::new()));
        sink.append(&record("audit_a")).await.expect("append");
        assert!(sink.append(&record("audit_a")).await.is_err());
    }

    #[tokio::test]
    async fn file_backed_sink_appends() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("audit.jsonl");
        let sink = JsonlAuditSink::new(&path).expect("sink");
        sink.append(&record("audit_a")).await.expect("append");

        let contents = std::fs::read_to_string(&path).expect("read");
        assert_eq!(contents.lines().count(), 1);
    }

    #[test]
    fn audit_ids_are_unique() {
        let a = generate_audit_id();
        let b = generate_audit_id();
        assert!(a.starts_with("audit_"));
        assert_ne!(a, b);
    }
}
