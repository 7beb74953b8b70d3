//! In-memory store for tests/dev.
//!
//! All four entity tables live behind one lock, which is what makes
//! `persist_pair` genuinely atomic: an invoice and its document change
//! together or not at all.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use entrada_core::{FelDocumentId, FelErrorId, InvoiceId};
use entrada_fel::document::{DocumentStatus, FelDocument};
use entrada_fel::error_record::FelError;
use entrada_fel::invoice::Invoice;
use entrada_fel::repository::{
    CertificationStore, FelDocumentRepository, FelErrorRepository, FelTokenRepository,
    InvoiceRepository, RepoResult, RepositoryError,
};
use entrada_fel::token::{FelToken, TokenStatus};

#[derive(Debug, Default)]
struct StoreState {
    invoices: HashMap<InvoiceId, Invoice>,
    documents: HashMap<FelDocumentId, FelDocument>,
    tokens: HashMap<entrada_core::FelTokenId, FelToken>,
    errors: HashMap<FelErrorId, FelError>,
}

/// In-memory implementation of every repository port.
#[derive(Debug, Default)]
pub struct InMemoryFelStore {
    inner: RwLock<StoreState>,
}

impl InMemoryFelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::new())
    }

    fn read(&self) -> RepoResult<std::sync::RwLockReadGuard<'_, StoreState>> {
        self.inner
            .read()
            .map_err(|_| RepositoryError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> RepoResult<std::sync::RwLockWriteGuard<'_, StoreState>> {
        self.inner
            .write()
            .map_err(|_| RepositoryError::Storage("lock poisoned".to_string()))
    }
}

fn store_document(state: &mut StoreState, document: &FelDocument) -> RepoResult<()> {
    match state.documents.get(&document.id) {
        Some(stored) if stored.version != document.version => Err(RepositoryError::Conflict(
            format!(
                "document {} version {} is stale (stored {})",
                document.id, document.version, stored.version
            ),
        )),
        _ => {
            let mut next = document.clone();
            next.version += 1;
            state.documents.insert(next.id, next);
            Ok(())
        }
    }
}

#[async_trait]
impl InvoiceRepository for InMemoryFelStore {
    async fn get(&self, id: InvoiceId) -> RepoResult<Option<Invoice>> {
        let state = self.read()?;
        Ok(state
            .invoices
            .get(&id)
            .filter(|i| !i.is_deleted())
            .cloned())
    }

    async fn insert(&self, invoice: Invoice) -> RepoResult<()> {
        let mut state = self.write()?;
        if state.invoices.contains_key(&invoice.id) {
            return Err(RepositoryError::Conflict(format!(
                "invoice {} already exists",
                invoice.id
            )));
        }
        state.invoices.insert(invoice.id, invoice);
        Ok(())
    }

    async fn update(&self, invoice: &Invoice) -> RepoResult<()> {
        let mut state = self.write()?;
        if !state.invoices.contains_key(&invoice.id) {
            return Err(RepositoryError::NotFound);
        }
        state.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn series_number_taken(&self, series: &str, number: i64) -> RepoResult<bool> {
        let state = self.read()?;
        Ok(state.invoices.values().any(|i| {
            !i.is_deleted()
                && i.series.as_deref() == Some(series)
                && i.number == Some(number)
        }))
    }

    async fn list_expiring(&self, now: DateTime<Utc>) -> RepoResult<Vec<Invoice>> {
        let state = self.read()?;
        Ok(state
            .invoices
            .values()
            .filter(|i| !i.is_deleted() && !i.status.is_terminal() && i.is_expired(now))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl FelDocumentRepository for InMemoryFelStore {
    async fn get(&self, id: FelDocumentId) -> RepoResult<Option<FelDocument>> {
        let state = self.read()?;
        Ok(state.documents.get(&id).cloned())
    }

    async fn find_by_invoice(&self, invoice_id: InvoiceId) -> RepoResult<Option<FelDocument>> {
        let state = self.read()?;
        Ok(state
            .documents
            .values()
            .filter(|d| d.invoice_id == invoice_id)
            .max_by_key(|d| d.created_at)
            .cloned())
    }

    async fn insert(&self, document: FelDocument) -> RepoResult<()> {
        let mut state = self.write()?;
        if state.documents.contains_key(&document.id) {
            return Err(RepositoryError::Conflict(format!(
                "document {} already exists",
                document.id
            )));
        }
        state.documents.insert(document.id, document);
        Ok(())
    }

    async fn update(&self, document: &FelDocument) -> RepoResult<()> {
        let mut state = self.write()?;
        if !state.documents.contains_key(&document.id) {
            return Err(RepositoryError::NotFound);
        }
        store_document(&mut state, document)
    }

    async fn cas_mark_sent(
        &self,
        id: FelDocumentId,
        expected_version: u64,
        now: DateTime<Utc>,
    ) -> RepoResult<Option<FelDocument>> {
        let mut state = self.write()?;
        let Some(stored) = state.documents.get(&id) else {
            return Err(RepositoryError::NotFound);
        };
        if stored.version != expected_version {
            return Ok(None);
        }
        let mut next = stored.clone();
        if next.mark_sent(now).is_err() {
            // Status advanced to something non-submittable under the same
            // version; treat as a lost race.
            return Ok(None);
        }
        next.version += 1;
        state.documents.insert(next.id, next.clone());
        Ok(Some(next))
    }

    async fn list_expiring(&self, now: DateTime<Utc>) -> RepoResult<Vec<FelDocument>> {
        let state = self.read()?;
        Ok(state
            .documents
            .values()
            .filter(|d| !d.status.is_terminal() && d.is_expired(now))
            .cloned()
            .collect())
    }

    async fn list_stuck_sent(&self, cutoff: DateTime<Utc>) -> RepoResult<Vec<FelDocument>> {
        let state = self.read()?;
        Ok(state
            .documents
            .values()
            .filter(|d| d.status == DocumentStatus::Sent && d.updated_at < cutoff)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl FelTokenRepository for InMemoryFelStore {
    async fn find_active(&self, certifier_name: &str) -> RepoResult<Option<FelToken>> {
        let state = self.read()?;
        Ok(state
            .tokens
            .values()
            .find(|t| t.certifier_name == certifier_name && t.status == TokenStatus::Active)
            .cloned())
    }

    async fn save(&self, token: FelToken) -> RepoResult<()> {
        let mut state = self.write()?;
        state.tokens.insert(token.id, token);
        Ok(())
    }

    async fn update(&self, token: &FelToken) -> RepoResult<()> {
        let mut state = self.write()?;
        if !state.tokens.contains_key(&token.id) {
            return Err(RepositoryError::NotFound);
        }
        state.tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn list_active_expired(&self, now: DateTime<Utc>) -> RepoResult<Vec<FelToken>> {
        let state = self.read()?;
        Ok(state
            .tokens
            .values()
            .filter(|t| t.status == TokenStatus::Active && t.is_expired(now))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl FelErrorRepository for InMemoryFelStore {
    async fn insert(&self, error: FelError) -> RepoResult<()> {
        let mut state = self.write()?;
        state.errors.insert(error.id, error);
        Ok(())
    }

    async fn get(&self, id: FelErrorId) -> RepoResult<Option<FelError>> {
        let state = self.read()?;
        Ok(state.errors.get(&id).cloned())
    }

    async fn list_unresolved(&self) -> RepoResult<Vec<FelError>> {
        let state = self.read()?;
        let mut unresolved: Vec<FelError> = state
            .errors
            .values()
            .filter(|e| !e.resolved)
            .cloned()
            .collect();
        // Most severe first, newest within a severity.
        unresolved.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(unresolved)
    }

    async fn resolve(&self, id: FelErrorId, now: DateTime<Utc>) -> RepoResult<()> {
        let mut state = self.write()?;
        let error = state.errors.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        error.resolve(now);
        Ok(())
    }
}

#[async_trait]
impl CertificationStore for InMemoryFelStore {
    async fn persist_pair(&self, invoice: &Invoice, document: &FelDocument) -> RepoResult<()> {
        let mut state = self.write()?;
        // Both writes happen under one lock; a failed version check leaves
        // the invoice untouched as well.
        store_document(&mut state, document)?;
        state.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }
}
