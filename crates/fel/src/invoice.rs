//! Invoice: a tax document request bound to one registration.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use entrada_core::money;
use entrada_core::{DomainError, DomainResult, InvoiceId, RegistrationId};

/// Days after certification during which a cancellation is accepted.
pub const CANCELLATION_WINDOW_DAYS: i64 = 30;

/// Invoice status lifecycle.
///
/// Transitions only move forward, except that any non-terminal status may go
/// to `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Pending,
    Certified,
    Sent,
    Cancelled,
    Expired,
}

impl InvoiceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceStatus::Cancelled | InvoiceStatus::Expired)
    }

    fn rank(&self) -> u8 {
        match self {
            InvoiceStatus::Draft => 0,
            InvoiceStatus::Pending => 1,
            InvoiceStatus::Certified => 2,
            InvoiceStatus::Sent => 3,
            // Terminal states sit outside the forward ordering.
            InvoiceStatus::Cancelled | InvoiceStatus::Expired => u8::MAX,
        }
    }
}

/// Tax document kind recognized by the certifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    Factura,
    NotaCredito,
    NotaDebito,
}

impl DocumentType {
    /// Short code used on the wire and inside the XML payload.
    pub fn code(&self) -> &'static str {
        match self {
            DocumentType::Factura => "FACT",
            DocumentType::NotaCredito => "NCRE",
            DocumentType::NotaDebito => "NDEB",
        }
    }
}

/// Buyer identity required on every certifiable invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyerInfo {
    /// Tax identification number ("CF" for final consumer).
    pub nit: String,
    pub name: String,
    pub address: String,
}

/// Invoice line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub line_no: u32,
    pub description: String,
    pub quantity: i64,
    /// Price in centavos (smallest currency unit).
    pub unit_price_cents: i64,
}

impl InvoiceLine {
    pub fn total_cents(&self) -> i64 {
        self.quantity.saturating_mul(self.unit_price_cents)
    }
}

/// A tax document request. Mutated exclusively through the transition methods
/// below; persistence is the caller's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub registration_id: RegistrationId,
    pub status: InvoiceStatus,
    pub document_type: DocumentType,

    /// Series + number are assigned by the certifier on certification and are
    /// immutable afterwards. Unique together among non-deleted invoices.
    pub series: Option<String>,
    pub number: Option<i64>,

    pub buyer: BuyerInfo,

    pub subtotal_cents: i64,
    pub tax_rate_bps: u32,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub currency: String,

    pub lines: Vec<InvoiceLine>,

    pub authorization_number: Option<String>,
    pub authorization_date: Option<DateTime<Utc>>,

    pub retry_count: u32,
    pub error_message: Option<String>,

    pub certified_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,

    /// Soft delete. Every repository query filters this; rows are never
    /// physically removed.
    pub deleted_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Create a draft, the only entry point for the billing workflow.
    #[allow(clippy::too_many_arguments)]
    pub fn draft(
        id: InvoiceId,
        registration_id: RegistrationId,
        document_type: DocumentType,
        buyer: BuyerInfo,
        subtotal_cents: i64,
        tax_rate_bps: u32,
        total_cents: i64,
        currency: impl Into<String>,
        lines: Vec<InvoiceLine>,
        now: DateTime<Utc>,
    ) -> Self {
        let tax_cents = money::tax_for(subtotal_cents, tax_rate_bps);
        Self {
            id,
            registration_id,
            status: InvoiceStatus::Draft,
            document_type,
            series: None,
            number: None,
            buyer,
            subtotal_cents,
            tax_rate_bps,
            tax_cents,
            total_cents,
            currency: currency.into(),
            lines,
            authorization_number: None,
            authorization_date: None,
            retry_count: 0,
            error_message: None,
            certified_at: None,
            sent_at: None,
            cancelled_at: None,
            expires_at: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == InvoiceStatus::Expired
            || (!self.status.is_terminal()
                && self.expires_at.is_some_and(|at| at < now))
    }

    /// Cancellation is a certifier-side operation and only accepted for
    /// certified invoices within the 30-day window.
    pub fn is_cancellable(&self, now: DateTime<Utc>) -> bool {
        self.status == InvoiceStatus::Certified
            && !self.is_expired(now)
            && self
                .certified_at
                .is_some_and(|at| now - at <= Duration::days(CANCELLATION_WINDOW_DAYS))
    }

    /// Elapsed time from creation until certification (or until `now` while
    /// still in flight).
    pub fn processing_time(&self, now: DateTime<Utc>) -> Duration {
        self.certified_at.unwrap_or(now) - self.created_at
    }

    fn forward_to(&mut self, next: InvoiceStatus, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(DomainError::invalid_state(format!(
                "invoice {} is terminal ({:?})",
                self.id, self.status
            )));
        }
        if next.rank() <= self.status.rank() {
            return Err(DomainError::invalid_state(format!(
                "invoice {} cannot move {:?} -> {:?}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Draft → Pending, performed when the billing workflow hands the invoice
    /// to the certification pipeline. `expires_at` is the local deadline after
    /// which the sweeper demotes a still-uncertified invoice.
    pub fn mark_pending(&mut self, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != InvoiceStatus::Draft {
            return Err(DomainError::invalid_state(format!(
                "invoice {} is {:?}, expected draft",
                self.id, self.status
            )));
        }
        self.expires_at = Some(expires_at);
        self.forward_to(InvoiceStatus::Pending, now)
    }

    /// Pending → Certified with the certifier-assigned identity.
    ///
    /// Series + number are write-once; a second assignment with different
    /// values is an invariant violation.
    pub fn mark_certified(
        &mut self,
        authorization_number: impl Into<String>,
        authorization_date: DateTime<Utc>,
        series: impl Into<String>,
        number: i64,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        let series = series.into();
        if let (Some(existing_series), Some(existing_number)) = (&self.series, self.number) {
            if *existing_series != series || existing_number != number {
                return Err(DomainError::invariant(format!(
                    "invoice {} series/number already assigned ({existing_series}-{existing_number})",
                    self.id
                )));
            }
        }
        if self.status != InvoiceStatus::Pending {
            return Err(DomainError::invalid_state(format!(
                "invoice {} is {:?}, expected pending",
                self.id, self.status
            )));
        }
        self.series = Some(series);
        self.number = Some(number);
        self.authorization_number = Some(authorization_number.into());
        self.authorization_date = Some(authorization_date);
        self.certified_at = Some(now);
        self.error_message = None;
        self.forward_to(InvoiceStatus::Certified, now)
    }

    /// Certified → Sent, once the billing workflow has delivered the document
    /// to the buyer.
    pub fn mark_sent(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != InvoiceStatus::Certified {
            return Err(DomainError::invalid_state(format!(
                "invoice {} is {:?}, expected certified",
                self.id, self.status
            )));
        }
        self.sent_at = Some(now);
        self.forward_to(InvoiceStatus::Sent, now)
    }

    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(DomainError::invalid_state(format!(
                "invoice {} is already terminal ({:?})",
                self.id, self.status
            )));
        }
        self.status = InvoiceStatus::Cancelled;
        self.cancelled_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_expired(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(DomainError::invalid_state(format!(
                "invoice {} is already terminal ({:?})",
                self.id, self.status
            )));
        }
        self.status = InvoiceStatus::Expired;
        self.updated_at = now;
        Ok(())
    }

    /// Record a failed certification attempt without advancing status.
    pub fn record_attempt_failure(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.retry_count += 1;
        self.error_message = Some(message.into());
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap()
    }

    fn buyer() -> BuyerInfo {
        BuyerInfo {
            nit: "1234567-8".to_string(),
            name: "Comercial Quetzal, S.A.".to_string(),
            address: "4a Avenida 12-34 zona 1, Guatemala".to_string(),
        }
    }

    fn line() -> InvoiceLine {
        InvoiceLine {
            line_no: 1,
            description: "Entrada general".to_string(),
            quantity: 1,
            unit_price_cents: 8_759,
        }
    }

    fn pending_invoice(now: DateTime<Utc>) -> Invoice {
        let mut invoice = Invoice::draft(
            InvoiceId::new(),
            RegistrationId::new(),
            DocumentType::Factura,
            buyer(),
            8_759,
            1_200,
            9_810,
            "GTQ",
            vec![line()],
            now,
        );
        invoice
            .mark_pending(now + Duration::days(7), now)
            .unwrap();
        invoice
    }

    #[test]
    fn draft_computes_tax_from_rate() {
        let invoice = Invoice::draft(
            InvoiceId::new(),
            RegistrationId::new(),
            DocumentType::Factura,
            buyer(),
            8_759,
            1_200,
            9_810,
            "GTQ",
            vec![line()],
            test_time(),
        );
        assert_eq!(invoice.tax_cents, 1_051);
        assert_eq!(invoice.status, InvoiceStatus::Draft);
    }

    #[test]
    fn certification_assigns_identity_once() {
        let now = test_time();
        let mut invoice = pending_invoice(now);

        invoice
            .mark_certified("AUTH-001", now, "A", 42, now)
            .unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Certified);
        assert_eq!(invoice.series.as_deref(), Some("A"));
        assert_eq!(invoice.number, Some(42));
        assert!(invoice.authorization_number.is_some());
        assert!(invoice.authorization_date.is_some());

        // Re-certifying with a different identity violates immutability.
        let err = invoice
            .mark_certified("AUTH-002", now, "B", 43, now)
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn status_never_moves_backwards() {
        let now = test_time();
        let mut invoice = pending_invoice(now);
        invoice
            .mark_certified("AUTH-001", now, "A", 1, now)
            .unwrap();
        invoice.mark_sent(now).unwrap();

        let err = invoice.mark_pending(now + Duration::days(1), now).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn cancellable_within_thirty_days_only() {
        let now = test_time();
        let mut invoice = pending_invoice(now);
        invoice
            .mark_certified("AUTH-001", now, "A", 1, now)
            .unwrap();

        assert!(invoice.is_cancellable(now + Duration::days(30)));
        assert!(!invoice.is_cancellable(now + Duration::days(31)));
    }

    #[test]
    fn cancelled_is_terminal() {
        let now = test_time();
        let mut invoice = pending_invoice(now);
        invoice.mark_cancelled(now).unwrap();

        assert!(invoice.status.is_terminal());
        assert!(invoice.mark_expired(now).is_err());
        assert!(invoice.mark_cancelled(now).is_err());
    }

    #[test]
    fn pending_invoice_past_deadline_is_expired() {
        let now = test_time();
        let invoice = pending_invoice(now);
        assert!(!invoice.is_expired(now + Duration::days(7)));
        assert!(invoice.is_expired(now + Duration::days(8)));
    }
}
