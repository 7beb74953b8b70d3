use axum::Router;

pub mod fel;
pub mod system;

pub fn router() -> Router {
    Router::new()
        .nest("/invoices", fel::invoice_router())
        .nest("/documents", fel::document_router())
        .nest("/fel", fel::triage_router())
}
