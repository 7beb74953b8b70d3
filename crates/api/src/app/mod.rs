//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};

use entrada_core::Clock;
use entrada_fel::repository::{FelDocumentRepository, FelErrorRepository, InvoiceRepository};
use entrada_infra::CertificationEngine;

pub mod dto;
pub mod errors;
pub mod routes;

/// Everything the handlers need, injected once at startup.
pub struct AppServices {
    pub engine: Arc<CertificationEngine>,
    pub invoices: Arc<dyn InvoiceRepository>,
    pub documents: Arc<dyn FelDocumentRepository>,
    pub fel_errors: Arc<dyn FelErrorRepository>,
    pub clock: Arc<dyn Clock>,
}

/// Build the full HTTP router (public entrypoint used by `main.rs` and the
/// black-box tests).
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(Extension(services))
}
