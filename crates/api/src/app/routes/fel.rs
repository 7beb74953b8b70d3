use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use entrada_core::{FelDocumentId, FelErrorId, InvoiceId};

use crate::app::{AppServices, dto, errors};

pub fn invoice_router() -> Router {
    Router::new().route("/:id/fel", get(invoice_fel_status))
}

pub fn document_router() -> Router {
    Router::new()
        .route("/:id/submit", post(submit_document))
        .route("/:id/cancel", post(cancel_document))
        .route("/:id/reconcile", post(reconcile_document))
}

pub fn triage_router() -> Router {
    Router::new()
        .route("/errors", get(list_errors))
        .route("/errors/:id/resolve", post(resolve_error))
}

pub async fn invoice_fel_status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let invoice_id: InvoiceId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid invoice id");
        }
    };

    let invoice = match services.invoices.get(invoice_id).await {
        Ok(Some(invoice)) => invoice,
        Ok(None) => {
            return errors::json_error(StatusCode::NOT_FOUND, "not_found", "invoice not found");
        }
        Err(e) => return errors::repository_error_to_response(e),
    };
    let document = match services.documents.find_by_invoice(invoice_id).await {
        Ok(document) => document,
        Err(e) => return errors::repository_error_to_response(e),
    };

    let now = services.clock.now();
    Json(dto::InvoiceFelStatusResponse::from_records(
        &invoice,
        document.as_ref(),
        now,
    ))
    .into_response()
}

pub async fn submit_document(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let document_id: FelDocumentId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid document id");
        }
    };

    match services.engine.submit_for_certification(document_id).await {
        Ok(outcome) => Json(dto::SubmissionResponse::from(outcome)).into_response(),
        Err(e) => errors::certification_error_to_response(e),
    }
}

pub async fn cancel_document(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::CancelDocumentRequest>,
) -> axum::response::Response {
    let document_id: FelDocumentId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid document id");
        }
    };
    if body.reason.trim().is_empty() {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_reason",
            "cancellation reason must not be empty",
        );
    }

    match services
        .engine
        .cancel_document(document_id, body.reason.trim())
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::certification_error_to_response(e),
    }
}

pub async fn reconcile_document(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let document_id: FelDocumentId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid document id");
        }
    };

    match services.engine.reconcile(document_id).await {
        Ok(outcome) => Json(serde_json::json!({ "outcome": format!("{outcome:?}") })).into_response(),
        Err(e) => errors::certification_error_to_response(e),
    }
}

pub async fn list_errors(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.fel_errors.list_unresolved().await {
        Ok(unresolved) => {
            let body: Vec<dto::FelErrorResponse> =
                unresolved.iter().map(dto::FelErrorResponse::from).collect();
            Json(body).into_response()
        }
        Err(e) => errors::repository_error_to_response(e),
    }
}

pub async fn resolve_error(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let error_id: FelErrorId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid error id");
        }
    };

    let now = services.clock.now();
    match services.fel_errors.resolve(error_id, now).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::repository_error_to_response(e),
    }
}
