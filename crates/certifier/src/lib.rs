//! `entrada-certifier` — HTTP client to the external certification authority
//! and the token lifecycle around it.

pub mod client;
pub mod config;
pub mod token_store;

pub use client::{
    CertifiedDocument, CertifierApi, CertifierError, CertifyOutcome, HttpCertifierClient,
    IssuedCredential, RejectionDetail, RemoteStatus,
};
pub use config::CertifierConfig;
pub use token_store::{TokenError, TokenStore};
