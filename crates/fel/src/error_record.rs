//! FelError: the operator triage queue of unresolved problems.
//!
//! Separate from the audit trail: audit rows record every attempt, this table
//! holds only what still needs a human (or a later successful retry).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use entrada_core::{FelDocumentId, FelErrorId, InvoiceId};

use crate::operation::FelOperation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FelSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FelError {
    pub id: FelErrorId,
    pub operation: FelOperation,
    pub severity: FelSeverity,
    pub invoice_id: Option<InvoiceId>,
    pub document_id: Option<FelDocumentId>,
    pub message: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl FelError {
    pub fn new(
        operation: FelOperation,
        severity: FelSeverity,
        message: impl Into<String>,
        retry_count: u32,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: FelErrorId::new(),
            operation,
            severity,
            invoice_id: None,
            document_id: None,
            message: message.into(),
            retry_count,
            max_retries,
            resolved: false,
            resolved_at: None,
            created_at: now,
        }
    }

    pub fn for_invoice(mut self, invoice_id: InvoiceId) -> Self {
        self.invoice_id = Some(invoice_id);
        self
    }

    pub fn for_document(mut self, document_id: FelDocumentId) -> Self {
        self.document_id = Some(document_id);
        self
    }

    pub fn can_retry(&self) -> bool {
        !self.resolved && self.retry_count < self.max_retries
    }

    pub fn resolve(&mut self, now: DateTime<Utc>) {
        self.resolved = true;
        self.resolved_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn retryable_until_resolved_or_exhausted() {
        let now = test_time();
        let mut err = FelError::new(
            FelOperation::Certification,
            FelSeverity::Medium,
            "timeout",
            1,
            3,
            now,
        );
        assert!(err.can_retry());

        err.retry_count = 3;
        assert!(!err.can_retry());

        err.retry_count = 1;
        err.resolve(now);
        assert!(!err.can_retry());
        assert_eq!(err.resolved_at, Some(now));
    }

    #[test]
    fn severity_orders_for_triage() {
        assert!(FelSeverity::Critical > FelSeverity::High);
        assert!(FelSeverity::High > FelSeverity::Medium);
        assert!(FelSeverity::Medium > FelSeverity::Low);
    }
}
