use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use entrada_fel::document::FelDocument;
use entrada_fel::error_record::FelError;
use entrada_fel::invoice::Invoice;
use entrada_infra::SubmissionOutcome;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CancelDocumentRequest {
    pub reason: String,
}

// -------------------------
// Response DTOs
// -------------------------

/// Per-invoice certification status for the admin dashboard.
#[derive(Debug, Serialize)]
pub struct InvoiceFelStatusResponse {
    pub invoice_id: String,
    pub status: String,
    pub document_id: Option<String>,
    pub document_status: Option<String>,
    pub authorization_number: Option<String>,
    pub authorization_date: Option<DateTime<Utc>>,
    pub series: Option<String>,
    pub number: Option<i64>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub certified_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub cancellable: bool,
    pub processing_time_ms: i64,
}

impl InvoiceFelStatusResponse {
    pub fn from_records(
        invoice: &Invoice,
        document: Option<&FelDocument>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            invoice_id: invoice.id.to_string(),
            status: status_str(invoice),
            document_id: document.map(|d| d.id.to_string()),
            document_status: document.map(|d| format!("{:?}", d.status).to_lowercase()),
            authorization_number: invoice.authorization_number.clone(),
            authorization_date: invoice.authorization_date,
            series: invoice.series.clone(),
            number: invoice.number,
            retry_count: document.map(|d| d.retry_count).unwrap_or(invoice.retry_count),
            last_error: document
                .and_then(|d| d.error_message.clone())
                .or_else(|| invoice.error_message.clone()),
            certified_at: invoice.certified_at,
            expires_at: invoice.expires_at,
            cancellable: invoice.is_cancellable(now),
            processing_time_ms: invoice.processing_time(now).num_milliseconds(),
        }
    }
}

fn status_str(invoice: &Invoice) -> String {
    format!("{:?}", invoice.status).to_lowercase()
}

#[derive(Debug, Serialize)]
pub struct SubmissionResponse {
    pub outcome: String,
    pub authorization_number: Option<String>,
    pub retry_count: Option<u32>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub severity: Option<String>,
}

impl From<SubmissionOutcome> for SubmissionResponse {
    fn from(outcome: SubmissionOutcome) -> Self {
        match outcome {
            SubmissionOutcome::Certified {
                authorization_number,
            } => Self {
                outcome: "certified".to_string(),
                authorization_number: Some(authorization_number),
                retry_count: None,
                next_attempt_at: None,
                severity: None,
            },
            SubmissionOutcome::RetryScheduled {
                retry_count,
                next_attempt_at,
            } => Self {
                outcome: "retry_scheduled".to_string(),
                authorization_number: None,
                retry_count: Some(retry_count),
                next_attempt_at: Some(next_attempt_at),
                severity: None,
            },
            SubmissionOutcome::Escalated { severity } => Self {
                outcome: "escalated".to_string(),
                authorization_number: None,
                retry_count: None,
                next_attempt_at: None,
                severity: Some(format!("{severity:?}").to_lowercase()),
            },
            SubmissionOutcome::Skipped => Self {
                outcome: "skipped".to_string(),
                authorization_number: None,
                retry_count: None,
                next_attempt_at: None,
                severity: None,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FelErrorResponse {
    pub id: String,
    pub operation: String,
    pub severity: String,
    pub invoice_id: Option<String>,
    pub document_id: Option<String>,
    pub message: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub can_retry: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&FelError> for FelErrorResponse {
    fn from(e: &FelError) -> Self {
        Self {
            id: e.id.to_string(),
            operation: e.operation.to_string(),
            severity: format!("{:?}", e.severity).to_lowercase(),
            invoice_id: e.invoice_id.map(|id| id.to_string()),
            document_id: e.document_id.map(|id| id.to_string()),
            message: e.message.clone(),
            retry_count: e.retry_count,
            max_retries: e.max_retries,
            can_retry: e.can_retry(),
            created_at: e.created_at,
        }
    }
}
