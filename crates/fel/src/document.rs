//! FelDocument: the certifiable XML artifact, one per invoice attempt chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use entrada_core::{DomainError, DomainResult, FelDocumentId, InvoiceId};

/// Hard ceiling on certification attempts per document. Above this the
/// operation refuses to run at all; only manual intervention remains.
pub const RETRY_CEILING: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Generated,
    Sent,
    Certified,
    Rejected,
    Cancelled,
    Expired,
}

impl DocumentStatus {
    /// Certified stays cancellable; Rejected stays retryable. Only Cancelled
    /// and Expired close the document for good, plus Certified for the
    /// submission path.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Certified | DocumentStatus::Cancelled | DocumentStatus::Expired
        )
    }
}

/// Certifier-assigned fields stored on successful certification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertifiedFields {
    pub authorization_number: String,
    pub authorization_date: DateTime<Utc>,
    pub certified_xml: String,
    pub qr_code: Option<String>,
    pub certificate_hash: Option<String>,
}

/// The certifiable artifact. `version` guards the compare-and-set that keeps
/// at most one certification attempt in flight per document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FelDocument {
    pub id: FelDocumentId,
    pub invoice_id: InvoiceId,
    pub status: DocumentStatus,

    pub xml_content: String,
    pub certified_xml: Option<String>,

    /// Set if and only if `status == Certified`.
    pub authorization_number: Option<String>,
    pub authorization_date: Option<DateTime<Utc>>,
    pub qr_code: Option<String>,
    pub certificate_hash: Option<String>,

    pub error_code: Option<String>,
    pub error_message: Option<String>,

    pub retry_count: u32,
    pub expires_at: Option<DateTime<Utc>>,

    /// Optimistic-concurrency version, bumped on every persisted update.
    pub version: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FelDocument {
    /// Create a freshly assembled document for an invoice entering the
    /// pipeline.
    pub fn generate(
        id: FelDocumentId,
        invoice_id: InvoiceId,
        xml_content: String,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            invoice_id,
            status: DocumentStatus::Generated,
            xml_content,
            certified_xml: None,
            authorization_number: None,
            authorization_date: None,
            qr_code: None,
            certificate_hash: None,
            error_code: None,
            error_message: None,
            retry_count: 0,
            expires_at,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == DocumentStatus::Expired
            || (!self.status.is_terminal()
                && self.expires_at.is_some_and(|at| at < now))
    }

    /// Precondition for `submit_for_certification`: a submittable status, not
    /// past the local deadline, and below the hard retry ceiling.
    pub fn is_certifiable(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            DocumentStatus::Generated | DocumentStatus::Sent | DocumentStatus::Rejected
        ) && !self.is_expired(now)
            && self.retry_count < RETRY_CEILING
    }

    /// Flip to Sent ahead of the network call. Callers must persist this via
    /// the version-guarded repository CAS; the loser of that race never calls
    /// the certifier.
    pub fn mark_sent(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if !matches!(
            self.status,
            DocumentStatus::Generated | DocumentStatus::Sent | DocumentStatus::Rejected
        ) {
            return Err(DomainError::invalid_state(format!(
                "document {} is {:?}, cannot submit",
                self.id, self.status
            )));
        }
        self.status = DocumentStatus::Sent;
        self.updated_at = now;
        Ok(())
    }

    /// Sent → Certified with everything the certifier returned.
    pub fn mark_certified(&mut self, fields: CertifiedFields, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != DocumentStatus::Sent {
            return Err(DomainError::invalid_state(format!(
                "document {} is {:?}, expected sent",
                self.id, self.status
            )));
        }
        self.status = DocumentStatus::Certified;
        self.authorization_number = Some(fields.authorization_number);
        self.authorization_date = Some(fields.authorization_date);
        self.certified_xml = Some(fields.certified_xml);
        self.qr_code = fields.qr_code;
        self.certificate_hash = fields.certificate_hash;
        self.error_code = None;
        self.error_message = None;
        self.updated_at = now;
        Ok(())
    }

    /// Sent → Rejected on a well-formed certifier rejection. Counts as an
    /// attempt.
    pub fn mark_rejected(
        &mut self,
        error_code: Option<String>,
        error_message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if self.status != DocumentStatus::Sent {
            return Err(DomainError::invalid_state(format!(
                "document {} is {:?}, expected sent",
                self.id, self.status
            )));
        }
        self.status = DocumentStatus::Rejected;
        self.error_code = error_code;
        self.error_message = Some(error_message.into());
        self.retry_count += 1;
        self.updated_at = now;
        Ok(())
    }

    /// Transport failure: status stays Sent (the certifier may have received
    /// the document), only the attempt is counted.
    pub fn record_transport_failure(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.error_message = Some(message.into());
        self.retry_count += 1;
        self.updated_at = now;
    }

    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if matches!(self.status, DocumentStatus::Cancelled | DocumentStatus::Expired) {
            return Err(DomainError::invalid_state(format!(
                "document {} is already {:?}",
                self.id, self.status
            )));
        }
        self.status = DocumentStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_expired(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(DomainError::invalid_state(format!(
                "document {} is already {:?}",
                self.id, self.status
            )));
        }
        self.status = DocumentStatus::Expired;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use entrada_core::InvoiceId;

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap()
    }

    fn generated(now: DateTime<Utc>) -> FelDocument {
        FelDocument::generate(
            FelDocumentId::new(),
            InvoiceId::new(),
            "<dte:GTDocumento/>".to_string(),
            Some(now + Duration::days(7)),
            now,
        )
    }

    fn certified_fields(now: DateTime<Utc>) -> CertifiedFields {
        CertifiedFields {
            authorization_number: "11111111-2222-3333-4444-555555555555".to_string(),
            authorization_date: now,
            certified_xml: "<dte:GTDocumento certified/>".to_string(),
            qr_code: Some("qr".to_string()),
            certificate_hash: Some("abc123".to_string()),
        }
    }

    #[test]
    fn authorization_present_iff_certified() {
        let now = test_time();
        let mut doc = generated(now);
        assert!(doc.authorization_number.is_none());

        doc.mark_sent(now).unwrap();
        assert!(doc.authorization_number.is_none());

        doc.mark_certified(certified_fields(now), now).unwrap();
        assert_eq!(doc.status, DocumentStatus::Certified);
        assert!(doc.authorization_number.is_some());
        assert!(doc.authorization_date.is_some());
    }

    #[test]
    fn rejection_counts_attempt_and_allows_resubmit() {
        let now = test_time();
        let mut doc = generated(now);
        doc.mark_sent(now).unwrap();
        doc.mark_rejected(Some("E-101".to_string()), "NIT invalido", now)
            .unwrap();

        assert_eq!(doc.status, DocumentStatus::Rejected);
        assert_eq!(doc.retry_count, 1);
        assert!(doc.is_certifiable(now));
        doc.mark_sent(now).unwrap();
        assert_eq!(doc.status, DocumentStatus::Sent);
    }

    #[test]
    fn retry_ceiling_makes_document_uncertifiable() {
        let now = test_time();
        let mut doc = generated(now);
        doc.retry_count = RETRY_CEILING;
        assert!(!doc.is_certifiable(now));

        doc.retry_count = RETRY_CEILING - 1;
        assert!(doc.is_certifiable(now));
    }

    #[test]
    fn transport_failure_keeps_status_sent() {
        let now = test_time();
        let mut doc = generated(now);
        doc.mark_sent(now).unwrap();
        doc.record_transport_failure("connection reset", now);

        assert_eq!(doc.status, DocumentStatus::Sent);
        assert_eq!(doc.retry_count, 1);
        assert!(doc.is_certifiable(now));
    }

    #[test]
    fn cannot_certify_from_generated() {
        let now = test_time();
        let mut doc = generated(now);
        let err = doc.mark_certified(certified_fields(now), now).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn expired_document_is_not_certifiable() {
        let now = test_time();
        let doc = generated(now);
        assert!(doc.is_certifiable(now));
        assert!(!doc.is_certifiable(now + Duration::days(8)));
    }
}
