//! Periodic reconciliation of everything left dangling: expired invoices,
//! documents and tokens, stuck submissions, and audit retention.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use entrada_core::Clock;
use entrada_fel::operation::FelOperation;
use entrada_fel::audit::{AuditEntry, AuditResult};
use entrada_fel::repository::{
    FelDocumentRepository, FelTokenRepository, InvoiceRepository,
};

use crate::audit::AuditRecorder;
use crate::engine::{CertificationEngine, CertificationError};

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Documents still in `Sent` with no progress for this long get
    /// reconciled against the certifier.
    pub stale_sent_after: ChronoDuration,
    /// Audit rows older than this are purged (regulatory horizon).
    pub audit_retention: ChronoDuration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            stale_sent_after: ChronoDuration::minutes(15),
            audit_retention: ChronoDuration::days(5 * 365),
        }
    }
}

/// What one sweep pass did.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SweepReport {
    pub invoices_expired: u32,
    pub documents_expired: u32,
    pub tokens_expired: u32,
    pub reconciled: u32,
    pub audit_purged: u64,
}

/// Idempotent sweep pass, runnable directly or on an interval loop.
pub struct ExpirySweeper {
    invoices: Arc<dyn InvoiceRepository>,
    documents: Arc<dyn FelDocumentRepository>,
    tokens: Arc<dyn FelTokenRepository>,
    engine: Arc<CertificationEngine>,
    audit: AuditRecorder,
    clock: Arc<dyn Clock>,
    config: SweeperConfig,
}

impl ExpirySweeper {
    pub fn new(
        invoices: Arc<dyn InvoiceRepository>,
        documents: Arc<dyn FelDocumentRepository>,
        tokens: Arc<dyn FelTokenRepository>,
        engine: Arc<CertificationEngine>,
        audit: AuditRecorder,
        clock: Arc<dyn Clock>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            invoices,
            documents,
            tokens,
            engine,
            audit,
            clock,
            config,
        }
    }

    /// One full pass. Individual item failures are logged and skipped so a
    /// single bad record never stalls the sweep.
    pub async fn run_once(&self) -> Result<SweepReport, CertificationError> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        // Local deadlines, no certifier involved.
        for mut document in self.documents.list_expiring(now).await? {
            match document.mark_expired(now) {
                Ok(()) => match self.documents.update(&document).await {
                    Ok(()) => report.documents_expired += 1,
                    Err(e) => warn!(document_id = %document.id, error = %e, "failed to expire document"),
                },
                Err(e) => debug!(document_id = %document.id, error = %e, "document already terminal"),
            }
        }

        for mut invoice in self.invoices.list_expiring(now).await? {
            match invoice.mark_expired(now) {
                Ok(()) => match self.invoices.update(&invoice).await {
                    Ok(()) => report.invoices_expired += 1,
                    Err(e) => warn!(invoice_id = %invoice.id, error = %e, "failed to expire invoice"),
                },
                Err(e) => debug!(invoice_id = %invoice.id, error = %e, "invoice already terminal"),
            }
        }

        for mut token in self.tokens.list_active_expired(now).await? {
            token.mark_expired(now);
            match self.tokens.update(&token).await {
                Ok(()) => report.tokens_expired += 1,
                Err(e) => warn!(token_id = %token.id, error = %e, "failed to expire token"),
            }
        }

        // Crash recovery: re-query documents stuck in Sent.
        let cutoff = now - self.config.stale_sent_after;
        for document in self.documents.list_stuck_sent(cutoff).await? {
            match self.engine.reconcile(document.id).await {
                Ok(_) => report.reconciled += 1,
                Err(e) => {
                    warn!(document_id = %document.id, error = %e, "reconciliation failed")
                }
            }
        }

        match self
            .audit
            .sink()
            .purge_before(now - self.config.audit_retention)
            .await
        {
            Ok(purged) => report.audit_purged = purged,
            Err(e) => warn!(error = %e, "audit retention sweep failed"),
        }

        self.audit
            .record(
                AuditEntry::new(FelOperation::ExpirySweep, AuditResult::Success, now)
                    .with_response(serde_json::to_value(report).unwrap_or_default()),
            )
            .await;
        info!(?report, "expiry sweep completed");
        Ok(report)
    }

    /// Run on an interval until shut down.
    pub fn spawn(self: Arc<Self>, every: Duration) -> SweeperHandle {
        let shutdown = Arc::new(Notify::new());
        let shutdown_rx = shutdown.clone();

        let handle = tokio::spawn(async move {
            info!("expiry sweeper started");
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown_rx.notified() => {
                        info!("expiry sweeper received shutdown signal");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = self.run_once().await {
                            warn!(error = %e, "sweep pass failed");
                        }
                    }
                }
            }
        });

        SweeperHandle { shutdown, handle }
    }
}

/// Handle to stop a spawned sweeper loop.
pub struct SweeperHandle {
    shutdown: Arc<Notify>,
    handle: tokio::task::JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        let _ = self.handle.await;
    }
}
