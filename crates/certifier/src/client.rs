//! Client for the certification authority's REST API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CertifierConfig;

/// Transport/credential failures. A well-formed business rejection is NOT an
/// error — it comes back as [`CertifyOutcome::Rejected`].
#[derive(Debug, Error, Clone)]
pub enum CertifierError {
    #[error("authentication rejected: {0}")]
    Authentication(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("certifier call timed out")]
    Timeout,
    #[error("unexpected certifier response: {0}")]
    Protocol(String),
}

impl CertifierError {
    /// Transient failures are retried with backoff; the rest escalate.
    pub fn is_transient(&self) -> bool {
        matches!(self, CertifierError::Network(_) | CertifierError::Timeout)
    }
}

/// Freshly issued bearer credential. The caller anchors `expires_in_secs`
/// against its own clock.
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in_secs: u64,
}

/// Everything the certifier returns on a successful certification.
#[derive(Debug, Clone, PartialEq)]
pub struct CertifiedDocument {
    pub authorization_number: String,
    pub authorization_date: DateTime<Utc>,
    pub series: String,
    pub number: i64,
    pub certified_xml: String,
    pub qr_code: Option<String>,
    pub certificate_hash: Option<String>,
}

/// A well-formed business rejection (4xx with a certifier error code).
#[derive(Debug, Clone, PartialEq)]
pub struct RejectionDetail {
    pub code: Option<String>,
    pub message: String,
}

/// Outcome of a certification submission.
#[derive(Debug, Clone, PartialEq)]
pub enum CertifyOutcome {
    Certified(CertifiedDocument),
    Rejected(RejectionDetail),
}

/// Certifier-side view of a previously submitted document, used during
/// reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteStatus {
    InProcess,
    Certified(CertifiedDocument),
    Rejected(RejectionDetail),
    Cancelled,
}

/// Operations offered by the certification authority.
///
/// `document_ref` is the DTE id embedded in the submitted XML (the FEL
/// document UUID); the certifier indexes submissions by it, which is what
/// makes status queries possible even when the local record never saw the
/// authorization number.
#[async_trait]
pub trait CertifierApi: Send + Sync {
    async fn authenticate(&self) -> Result<IssuedCredential, CertifierError>;

    async fn certify(
        &self,
        bearer: &str,
        document_ref: &str,
        xml: &str,
    ) -> Result<CertifyOutcome, CertifierError>;

    /// Idempotent.
    async fn query_status(
        &self,
        bearer: &str,
        document_ref: &str,
    ) -> Result<RemoteStatus, CertifierError>;

    async fn cancel(
        &self,
        bearer: &str,
        authorization_number: &str,
        reason: &str,
    ) -> Result<(), CertifierError>;
}

// -------------------------
// Wire DTOs
// -------------------------

#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    username: &'a str,
    api_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: u64,
}

#[derive(Debug, Serialize)]
struct CertifyRequest<'a> {
    document_id: &'a str,
    xml: &'a str,
}

#[derive(Debug, Deserialize)]
struct CertifyResponse {
    authorization_number: String,
    authorization_date: DateTime<Utc>,
    series: String,
    number: i64,
    certified_xml: String,
    qr_code: Option<String>,
    certificate_hash: Option<String>,
}

impl From<CertifyResponse> for CertifiedDocument {
    fn from(r: CertifyResponse) -> Self {
        Self {
            authorization_number: r.authorization_number,
            authorization_date: r.authorization_date,
            series: r.series,
            number: r.number,
            certified_xml: r.certified_xml,
            qr_code: r.qr_code,
            certificate_hash: r.certificate_hash,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RejectionResponse {
    error_code: Option<String>,
    message: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(flatten)]
    certified: Option<CertifyResponse>,
    error_code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct CancelRequest<'a> {
    reason: &'a str,
}

/// reqwest-backed implementation of [`CertifierApi`].
pub struct HttpCertifierClient {
    http: reqwest::Client,
    config: CertifierConfig,
}

impl HttpCertifierClient {
    pub fn new(config: CertifierConfig) -> Result<Self, CertifierError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CertifierError::Network(e.to_string()))?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

fn transport_error(e: reqwest::Error) -> CertifierError {
    if e.is_timeout() {
        CertifierError::Timeout
    } else {
        CertifierError::Network(e.to_string())
    }
}

#[async_trait]
impl CertifierApi for HttpCertifierClient {
    async fn authenticate(&self) -> Result<IssuedCredential, CertifierError> {
        let resp = self
            .http
            .post(self.url("auth"))
            .json(&AuthRequest {
                username: &self.config.username,
                api_key: &self.config.api_key,
            })
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let body = resp.text().await.unwrap_or_default();
            return Err(CertifierError::Authentication(body));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CertifierError::Network(format!("{status}: {body}")));
        }

        let auth: AuthResponse = resp
            .json()
            .await
            .map_err(|e| CertifierError::Protocol(e.to_string()))?;
        Ok(IssuedCredential {
            access_token: auth.access_token,
            refresh_token: auth.refresh_token,
            expires_in_secs: auth.expires_in,
        })
    }

    async fn certify(
        &self,
        bearer: &str,
        document_ref: &str,
        xml: &str,
    ) -> Result<CertifyOutcome, CertifierError> {
        let resp = self
            .http
            .post(self.url("documents"))
            .bearer_auth(bearer)
            .json(&CertifyRequest {
                document_id: document_ref,
                xml,
            })
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if status.is_success() {
            let body: CertifyResponse = resp
                .json()
                .await
                .map_err(|e| CertifierError::Protocol(e.to_string()))?;
            return Ok(CertifyOutcome::Certified(body.into()));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let body = resp.text().await.unwrap_or_default();
            return Err(CertifierError::Authentication(body));
        }
        if status.is_client_error() {
            // A structured 4xx is a normal business outcome, not a failure.
            let rejection: RejectionResponse = resp
                .json()
                .await
                .map_err(|e| CertifierError::Protocol(e.to_string()))?;
            return Ok(CertifyOutcome::Rejected(RejectionDetail {
                code: rejection.error_code,
                message: rejection.message,
            }));
        }

        let body = resp.text().await.unwrap_or_default();
        Err(CertifierError::Network(format!("{status}: {body}")))
    }

    async fn query_status(
        &self,
        bearer: &str,
        document_ref: &str,
    ) -> Result<RemoteStatus, CertifierError> {
        let resp = self
            .http
            .get(self.url(&format!("documents/{document_ref}")))
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let body = resp.text().await.unwrap_or_default();
            return Err(CertifierError::Authentication(body));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CertifierError::Network(format!("{status}: {body}")));
        }

        let body: StatusResponse = resp
            .json()
            .await
            .map_err(|e| CertifierError::Protocol(e.to_string()))?;
        match body.status.as_str() {
            "in_process" => Ok(RemoteStatus::InProcess),
            "certified" => {
                let certified = body.certified.ok_or_else(|| {
                    CertifierError::Protocol("certified status without document fields".to_string())
                })?;
                Ok(RemoteStatus::Certified(certified.into()))
            }
            "rejected" => Ok(RemoteStatus::Rejected(RejectionDetail {
                code: body.error_code,
                message: body.message.unwrap_or_default(),
            })),
            "cancelled" => Ok(RemoteStatus::Cancelled),
            other => Err(CertifierError::Protocol(format!(
                "unknown document status '{other}'"
            ))),
        }
    }

    async fn cancel(
        &self,
        bearer: &str,
        authorization_number: &str,
        reason: &str,
    ) -> Result<(), CertifierError> {
        let resp = self
            .http
            .post(self.url(&format!("documents/{authorization_number}/cancel")))
            .bearer_auth(bearer)
            .json(&CancelRequest { reason })
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let body = resp.text().await.unwrap_or_default();
            return Err(CertifierError::Authentication(body));
        }
        let body = resp.text().await.unwrap_or_default();
        if status.is_client_error() {
            return Err(CertifierError::Protocol(format!(
                "cancellation refused ({status}): {body}"
            )));
        }
        Err(CertifierError::Network(format!("{status}: {body}")))
    }
}
