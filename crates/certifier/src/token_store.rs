//! Token lifecycle: cache, refresh margin, and refresh coalescing.

use std::sync::Arc;

use chrono::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use entrada_core::{Clock, FelTokenId};
use entrada_fel::repository::{FelTokenRepository, RepositoryError};
use entrada_fel::token::FelToken;

use crate::client::{CertifierApi, CertifierError};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error(transparent)]
    Certifier(#[from] CertifierError),
    #[error("token storage: {0}")]
    Storage(#[from] RepositoryError),
}

/// Hands out a currently-valid bearer credential for one certifier,
/// refreshing ahead of expiry.
///
/// Concurrent callers that all see a stale token coalesce behind one mutex:
/// a single network authentication runs, and every waiter picks up its
/// result instead of issuing another.
pub struct TokenStore {
    certifier: Arc<dyn CertifierApi>,
    tokens: Arc<dyn FelTokenRepository>,
    clock: Arc<dyn Clock>,
    certifier_name: String,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl TokenStore {
    pub fn new(
        certifier: Arc<dyn CertifierApi>,
        tokens: Arc<dyn FelTokenRepository>,
        clock: Arc<dyn Clock>,
        certifier_name: impl Into<String>,
    ) -> Self {
        Self {
            certifier,
            tokens,
            clock,
            certifier_name: certifier_name.into(),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Return a bearer token that is valid for at least the refresh margin.
    pub async fn bearer(&self) -> Result<String, TokenError> {
        let now = self.clock.now();
        if let Some(token) = self.tokens.find_active(&self.certifier_name).await? {
            if !token.needs_refresh(now) {
                return Ok(token.access_token);
            }
        }

        // Suspension point: one refresh in flight per certifier.
        let _guard = self.refresh_lock.lock().await;

        // Re-check under the lock; a concurrent caller may have refreshed
        // while this one was waiting.
        let now = self.clock.now();
        if let Some(token) = self.tokens.find_active(&self.certifier_name).await? {
            if !token.needs_refresh(now) {
                debug!(certifier = %self.certifier_name, "token refreshed by concurrent caller");
                return Ok(token.access_token);
            }
        }

        self.refresh_locked().await
    }

    /// Drop the active token after a certifier-reported auth failure so the
    /// next caller re-authenticates from scratch.
    pub async fn invalidate(&self) -> Result<(), TokenError> {
        let now = self.clock.now();
        if let Some(mut token) = self.tokens.find_active(&self.certifier_name).await? {
            token.mark_revoked(now);
            self.tokens.update(&token).await?;
            warn!(certifier = %self.certifier_name, "active token revoked");
        }
        Ok(())
    }

    async fn refresh_locked(&self) -> Result<String, TokenError> {
        let now = self.clock.now();
        let previous = self.tokens.find_active(&self.certifier_name).await?;
        if let Some(mut old) = previous.clone() {
            old.mark_refreshing(now);
            self.tokens.update(&old).await?;
        }

        match self.certifier.authenticate().await {
            Ok(credential) => {
                let now = self.clock.now();
                if let Some(mut old) = previous {
                    old.mark_expired(now);
                    self.tokens.update(&old).await?;
                }
                let token = FelToken::issue(
                    FelTokenId::new(),
                    self.certifier_name.clone(),
                    credential.access_token.clone(),
                    credential.refresh_token,
                    now + Duration::seconds(credential.expires_in_secs as i64),
                    now,
                );
                self.tokens.save(token).await?;
                info!(certifier = %self.certifier_name, "issued fresh certifier token");
                Ok(credential.access_token)
            }
            Err(CertifierError::Authentication(msg)) => {
                if let Some(mut old) = previous {
                    old.mark_revoked(self.clock.now());
                    self.tokens.update(&old).await?;
                }
                warn!(certifier = %self.certifier_name, error = %msg, "certifier rejected credentials");
                Err(CertifierError::Authentication(msg).into())
            }
            Err(e) => {
                // Transient failure: restore the old token so a later call
                // can retry the refresh.
                if let Some(mut old) = previous {
                    old.status = entrada_fel::token::TokenStatus::Active;
                    old.updated_at = self.clock.now();
                    self.tokens.update(&old).await?;
                }
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::RwLock;
    use std::sync::atomic::{AtomicU32, Ordering};

    use entrada_core::FixedClock;
    use entrada_fel::token::TokenStatus;

    use crate::client::{CertifyOutcome, IssuedCredential, RemoteStatus};

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap()
    }

    #[derive(Default)]
    struct MemoryTokens {
        by_id: RwLock<HashMap<FelTokenId, FelToken>>,
    }

    #[async_trait]
    impl FelTokenRepository for MemoryTokens {
        async fn find_active(&self, certifier_name: &str) -> Result<Option<FelToken>, RepositoryError> {
            let tokens = self.by_id.read().unwrap();
            Ok(tokens
                .values()
                .find(|t| t.certifier_name == certifier_name && t.status == TokenStatus::Active)
                .cloned())
        }

        async fn save(&self, token: FelToken) -> Result<(), RepositoryError> {
            self.by_id.write().unwrap().insert(token.id, token);
            Ok(())
        }

        async fn update(&self, token: &FelToken) -> Result<(), RepositoryError> {
            self.by_id.write().unwrap().insert(token.id, token.clone());
            Ok(())
        }

        async fn list_active_expired(
            &self,
            now: DateTime<Utc>,
        ) -> Result<Vec<FelToken>, RepositoryError> {
            let tokens = self.by_id.read().unwrap();
            Ok(tokens
                .values()
                .filter(|t| t.status == TokenStatus::Active && t.is_expired(now))
                .cloned()
                .collect())
        }
    }

    /// Counts authentications; optionally slow so concurrent callers overlap.
    struct CountingCertifier {
        auth_calls: AtomicU32,
        auth_delay_ms: u64,
    }

    impl CountingCertifier {
        fn new(auth_delay_ms: u64) -> Self {
            Self {
                auth_calls: AtomicU32::new(0),
                auth_delay_ms,
            }
        }
    }

    #[async_trait]
    impl CertifierApi for CountingCertifier {
        async fn authenticate(&self) -> Result<IssuedCredential, CertifierError> {
            self.auth_calls.fetch_add(1, Ordering::SeqCst);
            if self.auth_delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.auth_delay_ms)).await;
            }
            Ok(IssuedCredential {
                access_token: "fresh-token".to_string(),
                refresh_token: None,
                expires_in_secs: 3_600,
            })
        }

        async fn certify(
            &self,
            _bearer: &str,
            _document_ref: &str,
            _xml: &str,
        ) -> Result<CertifyOutcome, CertifierError> {
            unimplemented!("not used by token tests")
        }

        async fn query_status(
            &self,
            _bearer: &str,
            _document_ref: &str,
        ) -> Result<RemoteStatus, CertifierError> {
            unimplemented!("not used by token tests")
        }

        async fn cancel(
            &self,
            _bearer: &str,
            _authorization_number: &str,
            _reason: &str,
        ) -> Result<(), CertifierError> {
            unimplemented!("not used by token tests")
        }
    }

    fn store(
        certifier: Arc<CountingCertifier>,
        tokens: Arc<MemoryTokens>,
        clock: Arc<FixedClock>,
    ) -> TokenStore {
        TokenStore::new(certifier, tokens, clock, "megaprint")
    }

    #[tokio::test]
    async fn token_within_margin_is_refreshed_once_and_reused() {
        let now = test_time();
        let clock = Arc::new(FixedClock::new(now));
        let tokens = Arc::new(MemoryTokens::default());
        let certifier = Arc::new(CountingCertifier::new(0));

        // Seed a token that expires in 4 minutes — inside the 5-minute margin.
        tokens
            .save(FelToken::issue(
                FelTokenId::new(),
                "megaprint",
                "stale-token",
                None,
                now + Duration::minutes(4),
                now,
            ))
            .await
            .unwrap();

        let store = store(certifier.clone(), tokens.clone(), clock);

        let bearer = store.bearer().await.unwrap();
        assert_eq!(bearer, "fresh-token");
        assert_eq!(certifier.auth_calls.load(Ordering::SeqCst), 1);

        // Second call reuses the fresh token, no new authentication.
        let bearer = store.bearer().await.unwrap();
        assert_eq!(bearer, "fresh-token");
        assert_eq!(certifier.auth_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_a_single_refresh() {
        let now = test_time();
        let clock = Arc::new(FixedClock::new(now));
        let tokens = Arc::new(MemoryTokens::default());
        let certifier = Arc::new(CountingCertifier::new(50));

        let store = Arc::new(store(certifier.clone(), tokens, clock));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.bearer().await.unwrap() }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), "fresh-token");
        }

        assert_eq!(certifier.auth_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_revokes_the_active_token() {
        let now = test_time();
        let clock = Arc::new(FixedClock::new(now));
        let tokens = Arc::new(MemoryTokens::default());
        let certifier = Arc::new(CountingCertifier::new(0));

        tokens
            .save(FelToken::issue(
                FelTokenId::new(),
                "megaprint",
                "live-token",
                None,
                now + Duration::hours(1),
                now,
            ))
            .await
            .unwrap();

        let store = store(certifier.clone(), tokens.clone(), clock);
        store.invalidate().await.unwrap();

        assert!(tokens.find_active("megaprint").await.unwrap().is_none());

        // Next bearer re-authenticates from scratch.
        let bearer = store.bearer().await.unwrap();
        assert_eq!(bearer, "fresh-token");
        assert_eq!(certifier.auth_calls.load(Ordering::SeqCst), 1);
    }
}
