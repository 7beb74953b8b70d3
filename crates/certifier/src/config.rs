//! Certifier endpoint configuration.

use std::time::Duration;

/// Connection settings for one certifier endpoint.
#[derive(Debug, Clone)]
pub struct CertifierConfig {
    /// Base URL of the certifier REST API.
    pub base_url: String,
    /// Name used to key cached tokens (one active token per certifier).
    pub certifier_name: String,
    pub username: String,
    pub api_key: String,
    /// Bound on every certifier call. A timeout is classified as a transport
    /// failure, never as a rejection.
    pub timeout: Duration,
}

impl CertifierConfig {
    pub fn new(
        base_url: impl Into<String>,
        certifier_name: impl Into<String>,
        username: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            certifier_name: certifier_name.into(),
            username: username.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
