//! Audit trail rows: one per operation attempt, append-only.
//!
//! Pure observability. Nothing in the pipeline reads these back for control
//! flow, and a failed audit write never fails the operation it describes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use entrada_core::{FelDocumentId, InvoiceId};

use crate::operation::FelOperation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Failure,
    Partial,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub operation: FelOperation,
    pub result: AuditResult,
    pub invoice_id: Option<InvoiceId>,
    pub fel_document_id: Option<FelDocumentId>,
    pub request_data: Option<JsonValue>,
    pub response_data: Option<JsonValue>,
    pub error_message: Option<String>,
    pub processing_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(operation: FelOperation, result: AuditResult, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            operation,
            result,
            invoice_id: None,
            fel_document_id: None,
            request_data: None,
            response_data: None,
            error_message: None,
            processing_time_ms: 0,
            created_at: now,
        }
    }

    pub fn for_invoice(mut self, invoice_id: InvoiceId) -> Self {
        self.invoice_id = Some(invoice_id);
        self
    }

    pub fn for_document(mut self, document_id: FelDocumentId) -> Self {
        self.fel_document_id = Some(document_id);
        self
    }

    pub fn with_request(mut self, data: JsonValue) -> Self {
        self.request_data = Some(data);
        self
    }

    pub fn with_response(mut self, data: JsonValue) -> Self {
        self.response_data = Some(data);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_processing_time(mut self, elapsed_ms: u64) -> Self {
        self.processing_time_ms = elapsed_ms;
        self
    }
}
