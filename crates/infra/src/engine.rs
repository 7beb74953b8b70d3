//! The certification state machine.
//!
//! Drives a `FelDocument` through `generated → sent → {certified | rejected}`
//! against the external certifier, applies the retry/backoff policy, and
//! keeps the owning `Invoice` in lockstep. Every certifier-facing attempt
//! leaves exactly one audit row; audit failures never propagate.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use entrada_certifier::{
    CertifiedDocument, CertifierApi, CertifierError, CertifyOutcome, RemoteStatus, TokenError,
    TokenStore,
};
use entrada_core::{Clock, DomainError, FelDocumentId, InvoiceId};
use entrada_fel::assembler::{self, AssemblyError};
use entrada_fel::audit::{AuditEntry, AuditResult};
use entrada_fel::document::{CertifiedFields, DocumentStatus, FelDocument};
use entrada_fel::error_record::{FelError, FelSeverity};
use entrada_fel::invoice::Invoice;
use entrada_fel::operation::FelOperation;
use entrada_fel::repository::{
    CertificationStore, FelDocumentRepository, FelErrorRepository, InvoiceRepository,
    RepositoryError,
};
use entrada_fel::RETRY_CEILING;

use crate::audit::AuditRecorder;
use crate::retry::{RetryPolicy, RetryQueue};

#[derive(Debug, Error)]
pub enum CertificationError {
    #[error("document not found")]
    NotFound,

    /// Precondition violation: caller error, never retried.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Cancellation refused outside the valid-state/30-day window.
    #[error("NOT_CANCELLABLE: {0}")]
    NotCancellable(String),

    /// Cancellation reached the certifier and failed; never swallowed.
    #[error("cancellation failed: {0}")]
    CancellationFailed(CertifierError),

    #[error("assembly failed: {0}")]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("certifier: {0}")]
    Certifier(#[from] CertifierError),
}

/// What a submission attempt did. Transient failures never surface as errors
/// past the enqueue point; callers see the scheduled retry instead.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    Certified {
        authorization_number: String,
    },
    /// Attempt failed; a delayed retry is queued.
    RetryScheduled {
        retry_count: u32,
        next_attempt_at: DateTime<Utc>,
    },
    /// Retries exhausted or a non-retryable failure; a `FelError` is now in
    /// the triage queue and the document needs an operator.
    Escalated {
        severity: FelSeverity,
    },
    /// Lost the at-most-one-in-flight race; another caller owns the attempt.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Unchanged(DocumentStatus),
    Converged(DocumentStatus),
}

/// The state machine. All collaborators are injected; nothing here owns a
/// global.
pub struct CertificationEngine {
    invoices: Arc<dyn InvoiceRepository>,
    documents: Arc<dyn FelDocumentRepository>,
    fel_errors: Arc<dyn FelErrorRepository>,
    store: Arc<dyn CertificationStore>,
    certifier: Arc<dyn CertifierApi>,
    tokens: Arc<TokenStore>,
    audit: AuditRecorder,
    retries: Arc<dyn RetryQueue>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    /// Per-process in-flight guard. The repository CAS is the cross-process
    /// gate; this closes the window where a concurrent caller observes the
    /// already-flipped `Sent` status (which stays submittable for retries)
    /// while the first network call is still outstanding.
    in_flight: Mutex<HashSet<FelDocumentId>>,
}

impl CertificationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        invoices: Arc<dyn InvoiceRepository>,
        documents: Arc<dyn FelDocumentRepository>,
        fel_errors: Arc<dyn FelErrorRepository>,
        store: Arc<dyn CertificationStore>,
        certifier: Arc<dyn CertifierApi>,
        tokens: Arc<TokenStore>,
        audit: AuditRecorder,
        retries: Arc<dyn RetryQueue>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            invoices,
            documents,
            fel_errors,
            store,
            certifier,
            tokens,
            audit,
            retries,
            policy,
            clock,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Assemble the XML for a draft invoice and move it into the pipeline:
    /// invoice → `Pending`, a fresh document in `Generated`.
    pub async fn prepare_for_certification(
        &self,
        invoice_id: InvoiceId,
        expires_at: DateTime<Utc>,
    ) -> Result<FelDocument, CertificationError> {
        let now = self.clock.now();
        let mut invoice = self
            .invoices
            .get(invoice_id)
            .await?
            .ok_or(CertificationError::NotFound)?;

        let xml = assembler::assemble(&invoice)?;
        invoice.mark_pending(expires_at, now)?;

        let document = FelDocument::generate(
            FelDocumentId::new(),
            invoice.id,
            xml,
            Some(expires_at),
            now,
        );
        self.store.persist_pair(&invoice, &document).await?;

        info!(invoice_id = %invoice.id, document_id = %document.id, "document generated");
        Ok(document)
    }

    /// One certification attempt. At most one attempt is ever in flight per
    /// document: the `→ Sent` flip is a version-guarded compare-and-set, and
    /// only the winner talks to the certifier. Losers return
    /// [`SubmissionOutcome::Skipped`] with zero side effects.
    pub async fn submit_for_certification(
        &self,
        document_id: FelDocumentId,
    ) -> Result<SubmissionOutcome, CertificationError> {
        if !self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(document_id)
        {
            debug!(document_id = %document_id, "submission already in flight in this process");
            return Ok(SubmissionOutcome::Skipped);
        }
        let result = self.attempt_submission(document_id).await;
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&document_id);
        result
    }

    async fn attempt_submission(
        &self,
        document_id: FelDocumentId,
    ) -> Result<SubmissionOutcome, CertificationError> {
        let started = Instant::now();
        let now = self.clock.now();

        let document = self
            .documents
            .get(document_id)
            .await?
            .ok_or(CertificationError::NotFound)?;

        if !document.is_certifiable(now) {
            let reason = format!(
                "document {} not certifiable (status {:?}, retries {})",
                document.id, document.status, document.retry_count
            );
            self.audit
                .record(
                    AuditEntry::new(FelOperation::Certification, AuditResult::Failure, now)
                        .for_invoice(document.invoice_id)
                        .for_document(document.id)
                        .with_error(reason.clone())
                        .with_processing_time(elapsed_ms(started)),
                )
                .await;
            return Err(CertificationError::InvalidState(reason));
        }

        let Some(document) = self
            .documents
            .cas_mark_sent(document_id, document.version, now)
            .await?
        else {
            debug!(document_id = %document_id, "submission already in flight; skipping");
            return Ok(SubmissionOutcome::Skipped);
        };

        let invoice = self
            .invoices
            .get(document.invoice_id)
            .await?
            .ok_or_else(|| {
                CertificationError::InvalidState(format!(
                    "document {} references missing invoice {}",
                    document.id, document.invoice_id
                ))
            })?;

        let bearer = match self.tokens.bearer().await {
            Ok(bearer) => bearer,
            Err(TokenError::Certifier(CertifierError::Authentication(msg))) => {
                return self
                    .escalate_auth_failure(invoice, document, msg, started)
                    .await;
            }
            Err(TokenError::Certifier(e)) => {
                return self
                    .handle_transport_failure(invoice, document, e, started)
                    .await;
            }
            Err(TokenError::Storage(e)) => return Err(e.into()),
        };

        match self
            .certifier
            .certify(&bearer, &document.id.to_string(), &document.xml_content)
            .await
        {
            Ok(CertifyOutcome::Certified(certified)) => {
                self.apply_certified(
                    invoice,
                    document,
                    certified,
                    FelOperation::Certification,
                    started,
                )
                .await
            }
            Ok(CertifyOutcome::Rejected(rejection)) => {
                self.handle_rejection(
                    invoice,
                    document,
                    rejection.code,
                    rejection.message,
                    started,
                )
                .await
            }
            Err(CertifierError::Authentication(msg)) => {
                if let Err(e) = self.tokens.invalidate().await {
                    warn!(error = %e, "failed to revoke token after auth failure");
                }
                self.escalate_auth_failure(invoice, document, msg, started)
                    .await
            }
            Err(e) => {
                self.handle_transport_failure(invoice, document, e, started)
                    .await
            }
        }
    }

    /// Cancel a certified document within the 30-day window. Never retried:
    /// a failed cancellation has tax consequences and always surfaces.
    pub async fn cancel_document(
        &self,
        document_id: FelDocumentId,
        reason: &str,
    ) -> Result<(), CertificationError> {
        let started = Instant::now();
        let now = self.clock.now();

        let mut document = self
            .documents
            .get(document_id)
            .await?
            .ok_or(CertificationError::NotFound)?;
        let mut invoice = self
            .invoices
            .get(document.invoice_id)
            .await?
            .ok_or(CertificationError::NotFound)?;

        if !invoice.is_cancellable(now) {
            let detail = format!(
                "invoice {} is {:?}, certified_at {:?}; cancellation allowed only for certified invoices within 30 days",
                invoice.id, invoice.status, invoice.certified_at
            );
            self.audit
                .record(
                    AuditEntry::new(FelOperation::Cancellation, AuditResult::Failure, now)
                        .for_invoice(invoice.id)
                        .for_document(document.id)
                        .with_error(detail.clone())
                        .with_processing_time(elapsed_ms(started)),
                )
                .await;
            return Err(CertificationError::NotCancellable(detail));
        }

        let authorization = invoice.authorization_number.clone().ok_or_else(|| {
            CertificationError::InvalidState(format!(
                "certified invoice {} has no authorization number",
                invoice.id
            ))
        })?;

        let cancel_result = match self.tokens.bearer().await {
            Ok(bearer) => {
                self.certifier
                    .cancel(&bearer, &authorization, reason)
                    .await
            }
            Err(TokenError::Certifier(e)) => Err(e),
            Err(TokenError::Storage(e)) => return Err(e.into()),
        };

        if let Err(e) = cancel_result {
            let now = self.clock.now();
            self.fel_errors
                .insert(
                    FelError::new(
                        FelOperation::Cancellation,
                        FelSeverity::High,
                        format!("cancellation of {authorization} failed: {e}"),
                        0,
                        0,
                        now,
                    )
                    .for_invoice(invoice.id)
                    .for_document(document.id),
                )
                .await?;
            self.audit
                .record(
                    AuditEntry::new(FelOperation::Cancellation, AuditResult::Failure, now)
                        .for_invoice(invoice.id)
                        .for_document(document.id)
                        .with_error(e.to_string())
                        .with_processing_time(elapsed_ms(started)),
                )
                .await;
            return Err(CertificationError::CancellationFailed(e));
        }

        let now = self.clock.now();
        invoice.mark_cancelled(now)?;
        document.mark_cancelled(now)?;
        self.store.persist_pair(&invoice, &document).await?;

        self.audit
            .record(
                AuditEntry::new(FelOperation::Cancellation, AuditResult::Cancelled, now)
                    .for_invoice(invoice.id)
                    .for_document(document.id)
                    .with_response(json!({ "authorization_number": authorization }))
                    .with_processing_time(elapsed_ms(started)),
            )
            .await;
        info!(invoice_id = %invoice.id, document_id = %document.id, "document cancelled");
        Ok(())
    }

    /// Converge local state to the certifier's view of a document. This is
    /// the sole recovery path for a crash between submission and persisting
    /// its outcome; it never re-submits.
    pub async fn reconcile(
        &self,
        document_id: FelDocumentId,
    ) -> Result<ReconcileOutcome, CertificationError> {
        let started = Instant::now();
        let now = self.clock.now();

        let mut document = self
            .documents
            .get(document_id)
            .await?
            .ok_or(CertificationError::NotFound)?;

        if document.status.is_terminal() {
            return Ok(ReconcileOutcome::Unchanged(document.status));
        }

        let bearer = match self.tokens.bearer().await {
            Ok(bearer) => bearer,
            Err(TokenError::Certifier(e)) => return Err(e.into()),
            Err(TokenError::Storage(e)) => return Err(e.into()),
        };
        let remote = self
            .certifier
            .query_status(&bearer, &document.id.to_string())
            .await?;

        let mut invoice = self
            .invoices
            .get(document.invoice_id)
            .await?
            .ok_or(CertificationError::NotFound)?;

        let outcome = match remote {
            RemoteStatus::InProcess => ReconcileOutcome::Unchanged(document.status),
            RemoteStatus::Certified(certified) => {
                if document.status == DocumentStatus::Certified {
                    ReconcileOutcome::Unchanged(document.status)
                } else {
                    // A rejected-then-retried document may have crashed after
                    // the certifier accepted it; re-enter Sent before
                    // converging.
                    if document.status != DocumentStatus::Sent {
                        document.mark_sent(now)?;
                    }
                    let applied = self
                        .apply_certified(
                            invoice,
                            document,
                            certified,
                            FelOperation::Reconciliation,
                            started,
                        )
                        .await?;
                    debug_assert!(matches!(applied, SubmissionOutcome::Certified { .. }));
                    return Ok(ReconcileOutcome::Converged(DocumentStatus::Certified));
                }
            }
            RemoteStatus::Rejected(rejection) => {
                if document.status == DocumentStatus::Sent {
                    document.mark_rejected(rejection.code, rejection.message.clone(), now)?;
                    invoice.record_attempt_failure(rejection.message, now);
                    self.store.persist_pair(&invoice, &document).await?;
                    ReconcileOutcome::Converged(DocumentStatus::Rejected)
                } else {
                    ReconcileOutcome::Unchanged(document.status)
                }
            }
            RemoteStatus::Cancelled => {
                document.mark_cancelled(now)?;
                if !invoice.status.is_terminal() {
                    invoice.mark_cancelled(now)?;
                }
                self.store.persist_pair(&invoice, &document).await?;
                ReconcileOutcome::Converged(DocumentStatus::Cancelled)
            }
        };

        self.audit
            .record(
                AuditEntry::new(FelOperation::Reconciliation, AuditResult::Success, now)
                    .for_document(document_id)
                    .with_response(json!({ "outcome": format!("{outcome:?}") }))
                    .with_processing_time(elapsed_ms(started)),
            )
            .await;
        Ok(outcome)
    }

    /// Drain the retry queue. Queued intents are re-validated: a document
    /// that reached a terminal state first makes its retry a no-op.
    pub async fn run_due_retries(&self) -> Result<u32, CertificationError> {
        let now = self.clock.now();
        let due = self.retries.claim_due(now).await?;
        let mut submitted = 0;

        for entry in due {
            let Some(document) = self.documents.get(entry.document_id).await? else {
                continue;
            };
            if !document.is_certifiable(now) {
                debug!(
                    document_id = %entry.document_id,
                    status = ?document.status,
                    "scheduled retry is a no-op"
                );
                continue;
            }
            match self.submit_for_certification(entry.document_id).await {
                Ok(_) => submitted += 1,
                Err(CertificationError::InvalidState(_)) => {
                    // Lost a race to a terminal transition between the check
                    // and the attempt.
                }
                Err(e) => {
                    warn!(document_id = %entry.document_id, error = %e, "scheduled retry failed");
                }
            }
        }
        Ok(submitted)
    }

    // -------------------------
    // Attempt outcomes
    // -------------------------

    async fn apply_certified(
        &self,
        mut invoice: Invoice,
        mut document: FelDocument,
        certified: CertifiedDocument,
        operation: FelOperation,
        started: Instant,
    ) -> Result<SubmissionOutcome, CertificationError> {
        let now = self.clock.now();

        if self
            .invoices
            .series_number_taken(&certified.series, certified.number)
            .await?
        {
            let detail = format!(
                "certifier assigned duplicate series/number {}-{}",
                certified.series, certified.number
            );
            self.audit
                .record(
                    AuditEntry::new(operation, AuditResult::Partial, now)
                        .for_invoice(invoice.id)
                        .for_document(document.id)
                        .with_error(detail.clone())
                        .with_processing_time(elapsed_ms(started)),
                )
                .await;
            return Err(CertificationError::Repository(RepositoryError::Conflict(
                detail,
            )));
        }

        document.mark_certified(
            CertifiedFields {
                authorization_number: certified.authorization_number.clone(),
                authorization_date: certified.authorization_date,
                certified_xml: certified.certified_xml,
                qr_code: certified.qr_code,
                certificate_hash: certified.certificate_hash,
            },
            now,
        )?;
        invoice.mark_certified(
            certified.authorization_number.clone(),
            certified.authorization_date,
            certified.series.clone(),
            certified.number,
            now,
        )?;
        self.store.persist_pair(&invoice, &document).await?;

        self.audit
            .record(
                AuditEntry::new(operation, AuditResult::Success, now)
                    .for_invoice(invoice.id)
                    .for_document(document.id)
                    .with_response(json!({
                        "authorization_number": certified.authorization_number,
                        "series": certified.series,
                        "number": certified.number,
                    }))
                    .with_processing_time(elapsed_ms(started)),
            )
            .await;
        info!(
            invoice_id = %invoice.id,
            document_id = %document.id,
            authorization = %certified.authorization_number,
            "document certified"
        );
        Ok(SubmissionOutcome::Certified {
            authorization_number: certified.authorization_number,
        })
    }

    async fn handle_rejection(
        &self,
        mut invoice: Invoice,
        mut document: FelDocument,
        error_code: Option<String>,
        message: String,
        started: Instant,
    ) -> Result<SubmissionOutcome, CertificationError> {
        let now = self.clock.now();

        document.mark_rejected(error_code.clone(), message.clone(), now)?;
        invoice.record_attempt_failure(message.clone(), now);
        self.store.persist_pair(&invoice, &document).await?;

        self.audit
            .record(
                AuditEntry::new(FelOperation::Certification, AuditResult::Failure, now)
                    .for_invoice(invoice.id)
                    .for_document(document.id)
                    .with_response(json!({ "error_code": error_code }))
                    .with_error(message.clone())
                    .with_processing_time(elapsed_ms(started)),
            )
            .await;

        self.schedule_or_escalate(&invoice, &document, message, FelSeverity::High, now)
            .await
    }

    async fn handle_transport_failure(
        &self,
        mut invoice: Invoice,
        mut document: FelDocument,
        error: CertifierError,
        started: Instant,
    ) -> Result<SubmissionOutcome, CertificationError> {
        let now = self.clock.now();
        let message = error.to_string();

        // The certifier may have received the submission; the document stays
        // in Sent so reconciliation can close the gap.
        document.record_transport_failure(message.clone(), now);
        invoice.record_attempt_failure(message.clone(), now);
        self.store.persist_pair(&invoice, &document).await?;

        let result = if matches!(error, CertifierError::Timeout) {
            AuditResult::Timeout
        } else {
            AuditResult::Failure
        };
        self.audit
            .record(
                AuditEntry::new(FelOperation::Certification, result, now)
                    .for_invoice(invoice.id)
                    .for_document(document.id)
                    .with_error(message.clone())
                    .with_processing_time(elapsed_ms(started)),
            )
            .await;

        self.schedule_or_escalate(&invoice, &document, message, FelSeverity::Medium, now)
            .await
    }

    /// Shared tail of every failed attempt: queue a backoff retry while the
    /// caps allow it, otherwise park the document in the triage queue.
    async fn schedule_or_escalate(
        &self,
        invoice: &Invoice,
        document: &FelDocument,
        message: String,
        retryable_severity: FelSeverity,
        now: DateTime<Utc>,
    ) -> Result<SubmissionOutcome, CertificationError> {
        if self.policy.should_retry(document.retry_count) && document.retry_count < RETRY_CEILING {
            let delay = self.policy.delay_for(document.retry_count);
            let due_at = now
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            self.retries.schedule(document.id, due_at).await?;
            debug!(
                document_id = %document.id,
                retry_count = document.retry_count,
                due_at = %due_at,
                "retry scheduled"
            );
            return Ok(SubmissionOutcome::RetryScheduled {
                retry_count: document.retry_count,
                next_attempt_at: due_at,
            });
        }

        let severity = if document.retry_count >= RETRY_CEILING {
            FelSeverity::Critical
        } else {
            retryable_severity
        };
        self.fel_errors
            .insert(
                FelError::new(
                    FelOperation::Certification,
                    severity,
                    message,
                    document.retry_count,
                    self.policy.max_attempts,
                    now,
                )
                .for_invoice(invoice.id)
                .for_document(document.id),
            )
            .await?;
        warn!(
            document_id = %document.id,
            retry_count = document.retry_count,
            ?severity,
            "retries exhausted; escalated for manual intervention"
        );
        Ok(SubmissionOutcome::Escalated { severity })
    }

    async fn escalate_auth_failure(
        &self,
        invoice: Invoice,
        mut document: FelDocument,
        message: String,
        started: Instant,
    ) -> Result<SubmissionOutcome, CertificationError> {
        let now = self.clock.now();

        // Not an attempt against the document: the submission never went out.
        document.error_message = Some(message.clone());
        document.updated_at = now;
        self.documents.update(&document).await?;

        self.fel_errors
            .insert(
                FelError::new(
                    FelOperation::Authentication,
                    FelSeverity::Critical,
                    message.clone(),
                    document.retry_count,
                    self.policy.max_attempts,
                    now,
                )
                .for_invoice(invoice.id)
                .for_document(document.id),
            )
            .await?;

        self.audit
            .record(
                AuditEntry::new(FelOperation::Authentication, AuditResult::Failure, now)
                    .for_invoice(invoice.id)
                    .for_document(document.id)
                    .with_error(message)
                    .with_processing_time(elapsed_ms(started)),
            )
            .await;
        warn!(document_id = %document.id, "certifier rejected credentials; operator action required");
        Ok(SubmissionOutcome::Escalated {
            severity: FelSeverity::Critical,
        })
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
