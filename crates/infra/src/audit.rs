//! Audit recording: best-effort, append-only, never in the control path.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use entrada_fel::audit::AuditEntry;

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuditSinkError {
    #[error("audit sink: {0}")]
    Sink(String),
}

/// Append-only destination for audit rows.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<(), AuditSinkError>;

    /// Retention sweep: drop rows older than `cutoff`. Returns the number
    /// removed.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditSinkError>;
}

/// Wraps a sink with the swallow-and-log policy: a failed audit write must
/// never fail the operation it describes.
#[derive(Clone)]
pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
}

impl AuditRecorder {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub async fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.sink.append(entry).await {
            warn!(error = %e, "audit write failed; continuing");
        }
    }

    pub fn sink(&self) -> Arc<dyn AuditSink> {
        self.sink.clone()
    }
}

/// In-memory sink for tests and dev.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    entries: RwLock<Vec<AuditEntry>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, entry: AuditEntry) -> Result<(), AuditSinkError> {
        self.entries.write().unwrap().push(entry);
        Ok(())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditSinkError> {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|e| e.created_at >= cutoff);
        Ok((before - entries.len()) as u64)
    }
}

/// Emits audit rows as structured log events. Used when no durable sink is
/// wired; retention is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn append(&self, entry: AuditEntry) -> Result<(), AuditSinkError> {
        info!(
            target: "fel_audit",
            operation = %entry.operation,
            result = ?entry.result,
            invoice_id = entry.invoice_id.map(|id| id.to_string()),
            document_id = entry.fel_document_id.map(|id| id.to_string()),
            error = entry.error_message.as_deref(),
            processing_time_ms = entry.processing_time_ms,
            "fel operation attempt"
        );
        Ok(())
    }

    async fn purge_before(&self, _cutoff: DateTime<Utc>) -> Result<u64, AuditSinkError> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use entrada_fel::audit::AuditResult;
    use entrada_fel::operation::FelOperation;

    #[tokio::test]
    async fn recorder_swallows_sink_failures() {
        struct FailingSink;

        #[async_trait]
        impl AuditSink for FailingSink {
            async fn append(&self, _entry: AuditEntry) -> Result<(), AuditSinkError> {
                Err(AuditSinkError::Sink("disk full".to_string()))
            }

            async fn purge_before(&self, _cutoff: DateTime<Utc>) -> Result<u64, AuditSinkError> {
                Err(AuditSinkError::Sink("disk full".to_string()))
            }
        }

        let recorder = AuditRecorder::new(Arc::new(FailingSink));
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
        // Must not panic or propagate.
        recorder
            .record(AuditEntry::new(
                FelOperation::Certification,
                AuditResult::Failure,
                now,
            ))
            .await;
    }

    #[tokio::test]
    async fn purge_removes_only_rows_past_cutoff() {
        let sink = InMemoryAuditSink::new();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();

        sink.append(AuditEntry::new(
            FelOperation::Certification,
            AuditResult::Success,
            now - Duration::days(6 * 365),
        ))
        .await
        .unwrap();
        sink.append(AuditEntry::new(
            FelOperation::Certification,
            AuditResult::Success,
            now,
        ))
        .await
        .unwrap();

        let removed = sink.purge_before(now - Duration::days(5 * 365)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(sink.entries().len(), 1);
    }
}
