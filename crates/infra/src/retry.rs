//! Retry policy and the delayed-retry queue.
//!
//! Failed attempts are scheduled, never spun: the state machine enqueues a
//! `(document, due_at)` pair and a periodic caller drains what has come due,
//! re-checking preconditions before acting.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use entrada_core::FelDocumentId;
use entrada_fel::repository::{RepoResult, RepositoryError};

/// Exponential backoff policy for certification retries.
///
/// `max_attempts` is the business-level cap (invoice layer); the document
/// layer's hard ceiling of 10 lives on the document itself.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(3_600),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Delay before the next attempt given the failures so far:
    /// `base × 2^retry_count`, capped at `max_delay`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let factor = 2u64.saturating_pow(retry_count.min(32));
        Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
    }

    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_attempts
    }
}

/// A delayed retry intent. Intents are hints, not commands: the consumer
/// re-validates the document before acting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledRetry {
    pub document_id: FelDocumentId,
    pub due_at: DateTime<Utc>,
}

#[async_trait]
pub trait RetryQueue: Send + Sync {
    async fn schedule(&self, document_id: FelDocumentId, due_at: DateTime<Utc>) -> RepoResult<()>;

    /// Remove and return everything due at or before `now`, oldest first.
    async fn claim_due(&self, now: DateTime<Utc>) -> RepoResult<Vec<ScheduledRetry>>;

    async fn len(&self) -> RepoResult<usize>;
}

/// In-memory queue for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryRetryQueue {
    entries: RwLock<Vec<ScheduledRetry>>,
}

impl InMemoryRetryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RetryQueue for InMemoryRetryQueue {
    async fn schedule(&self, document_id: FelDocumentId, due_at: DateTime<Utc>) -> RepoResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| RepositoryError::Storage("lock poisoned".to_string()))?;
        entries.push(ScheduledRetry {
            document_id,
            due_at,
        });
        Ok(())
    }

    async fn claim_due(&self, now: DateTime<Utc>) -> RepoResult<Vec<ScheduledRetry>> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| RepositoryError::Storage("lock poisoned".to_string()))?;
        let mut due: Vec<ScheduledRetry> = entries.iter().copied().filter(|e| e.due_at <= now).collect();
        entries.retain(|e| e.due_at > now);
        due.sort_by_key(|e| e.due_at);
        Ok(due)
    }

    async fn len(&self) -> RepoResult<usize> {
        Ok(self.entries.read().unwrap().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    #[test]
    fn backoff_doubles_per_retry_and_caps() {
        let policy = RetryPolicy::new(3, Duration::from_secs(30), Duration::from_secs(120));

        assert_eq!(policy.delay_for(0), Duration::from_secs(30));
        assert_eq!(policy.delay_for(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for(2), Duration::from_secs(120));
        // Capped from here on.
        assert_eq!(policy.delay_for(3), Duration::from_secs(120));
        assert_eq!(policy.delay_for(20), Duration::from_secs(120));
    }

    #[test]
    fn should_retry_respects_cap() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[tokio::test]
    async fn claim_due_returns_only_mature_entries_in_order() {
        let queue = InMemoryRetryQueue::new();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();

        let early = FelDocumentId::new();
        let later = FelDocumentId::new();
        let future = FelDocumentId::new();

        queue
            .schedule(later, now - ChronoDuration::minutes(1))
            .await
            .unwrap();
        queue
            .schedule(early, now - ChronoDuration::minutes(5))
            .await
            .unwrap();
        queue
            .schedule(future, now + ChronoDuration::minutes(5))
            .await
            .unwrap();

        let due = queue.claim_due(now).await.unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].document_id, early);
        assert_eq!(due[1].document_id, later);

        // Claimed entries are gone; the future one remains.
        assert_eq!(queue.len().await.unwrap(), 1);
        assert!(queue.claim_due(now).await.unwrap().is_empty());
    }
}
