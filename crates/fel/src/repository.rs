//! Repository ports consumed by the certification pipeline.
//!
//! One typed interface per entity, exposing only the queries the state
//! machine and the sweeper actually need (by id, by status, by expiry
//! window). Implementations live in the infrastructure crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use entrada_core::{FelDocumentId, FelErrorId, InvoiceId};

use crate::document::FelDocument;
use crate::error_record::FelError;
use crate::invoice::Invoice;
use crate::token::FelToken;

#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
}

pub type RepoResult<T> = Result<T, RepositoryError>;

/// Invoices. All queries exclude soft-deleted rows.
#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    async fn get(&self, id: InvoiceId) -> RepoResult<Option<Invoice>>;

    async fn insert(&self, invoice: Invoice) -> RepoResult<()>;

    async fn update(&self, invoice: &Invoice) -> RepoResult<()>;

    /// Uniqueness probe for the certifier-assigned identity.
    async fn series_number_taken(&self, series: &str, number: i64) -> RepoResult<bool>;

    /// Non-terminal invoices whose local deadline has passed.
    async fn list_expiring(&self, now: DateTime<Utc>) -> RepoResult<Vec<Invoice>>;
}

/// Certifiable documents. Updates are version-guarded.
#[async_trait]
pub trait FelDocumentRepository: Send + Sync {
    async fn get(&self, id: FelDocumentId) -> RepoResult<Option<FelDocument>>;

    /// Latest document for an invoice (admin surface).
    async fn find_by_invoice(&self, invoice_id: InvoiceId) -> RepoResult<Option<FelDocument>>;

    async fn insert(&self, document: FelDocument) -> RepoResult<()>;

    /// Persist, bumping `version`. Fails with `Conflict` on a stale version.
    async fn update(&self, document: &FelDocument) -> RepoResult<()>;

    /// Compare-and-set the submission flip: persists `Sent` only if the
    /// stored version still equals `expected_version`. Returns the updated
    /// document on success, `None` when the CAS was lost. Exactly one of any
    /// set of concurrent callers wins.
    async fn cas_mark_sent(
        &self,
        id: FelDocumentId,
        expected_version: u64,
        now: DateTime<Utc>,
    ) -> RepoResult<Option<FelDocument>>;

    /// Non-terminal documents whose local deadline has passed.
    async fn list_expiring(&self, now: DateTime<Utc>) -> RepoResult<Vec<FelDocument>>;

    /// Documents sitting in `Sent` with no progress since `cutoff` —
    /// candidates for reconciliation after a crash or timeout.
    async fn list_stuck_sent(&self, cutoff: DateTime<Utc>) -> RepoResult<Vec<FelDocument>>;
}

/// Cached certifier credentials.
#[async_trait]
pub trait FelTokenRepository: Send + Sync {
    async fn find_active(&self, certifier_name: &str) -> RepoResult<Option<FelToken>>;

    async fn save(&self, token: FelToken) -> RepoResult<()>;

    async fn update(&self, token: &FelToken) -> RepoResult<()>;

    /// Active tokens already past expiry (sweeper input).
    async fn list_active_expired(&self, now: DateTime<Utc>) -> RepoResult<Vec<FelToken>>;
}

/// Operator triage queue.
#[async_trait]
pub trait FelErrorRepository: Send + Sync {
    async fn insert(&self, error: FelError) -> RepoResult<()>;

    async fn get(&self, id: FelErrorId) -> RepoResult<Option<FelError>>;

    async fn list_unresolved(&self) -> RepoResult<Vec<FelError>>;

    async fn resolve(&self, id: FelErrorId, now: DateTime<Utc>) -> RepoResult<()>;
}

/// Atomic dual-write of an invoice and its document.
///
/// Every certification outcome mutates both records together or not at all;
/// implementations must make this a single transaction (the in-memory store
/// holds both tables behind one lock).
#[async_trait]
pub trait CertificationStore: Send + Sync {
    async fn persist_pair(&self, invoice: &Invoice, document: &FelDocument) -> RepoResult<()>;
}
