//! FelToken: a cached bearer credential for one certifier endpoint.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use entrada_core::FelTokenId;

/// Remaining lifetime below which a token should be refreshed ahead of use.
pub const REFRESH_MARGIN_MINUTES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Active,
    Expired,
    Revoked,
    Refreshing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FelToken {
    pub id: FelTokenId,
    pub certifier_name: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub status: TokenStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FelToken {
    pub fn issue(
        id: FelTokenId,
        certifier_name: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            certifier_name: certifier_name.into(),
            access_token: access_token.into(),
            refresh_token,
            status: TokenStatus::Active,
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// True when the remaining lifetime is under the refresh margin (this
    /// includes tokens already past expiry).
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.status != TokenStatus::Active
            || self.expires_at - now < Duration::minutes(REFRESH_MARGIN_MINUTES)
    }

    pub fn mark_refreshing(&mut self, now: DateTime<Utc>) {
        self.status = TokenStatus::Refreshing;
        self.updated_at = now;
    }

    pub fn mark_expired(&mut self, now: DateTime<Utc>) {
        self.status = TokenStatus::Expired;
        self.updated_at = now;
    }

    /// Certifier reported the credential invalid; it must not be reused.
    pub fn mark_revoked(&mut self, now: DateTime<Utc>) {
        self.status = TokenStatus::Revoked;
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

    fn active_token(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> FelToken {
        FelToken::issue(FelTokenId::new(), "megaprint", "tok", None, expires_at, now)
    }

    #[test]
    fn token_expiring_in_four_minutes_needs_refresh() {
        let now = test_time();
        let token = active_token(now + Duration::minutes(4), now);
        assert!(token.needs_refresh(now));
    }

    #[test]
    fn token_with_comfortable_lifetime_does_not_need_refresh() {
        let now = test_time();
        let token = active_token(now + Duration::minutes(30), now);
        assert!(!token.needs_refresh(now));
        assert!(!token.is_expired(now));
    }

    #[test]
    fn non_active_token_always_needs_refresh() {
        let now = test_time();
        let mut token = active_token(now + Duration::hours(1), now);
        token.mark_revoked(now);
        assert!(token.needs_refresh(now));
    }
}
