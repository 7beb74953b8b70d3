use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use entrada_fel::repository::RepositoryError;
use entrada_infra::CertificationError;

pub fn certification_error_to_response(err: CertificationError) -> axum::response::Response {
    match err {
        CertificationError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        CertificationError::NotCancellable(msg) => {
            json_error(StatusCode::CONFLICT, "not_cancellable", msg)
        }
        CertificationError::InvalidState(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_state", msg)
        }
        CertificationError::Assembly(e) => {
            json_error(StatusCode::BAD_REQUEST, "assembly_error", e.to_string())
        }
        CertificationError::Domain(e) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "domain_error", e.to_string())
        }
        CertificationError::CancellationFailed(e) => {
            json_error(StatusCode::BAD_GATEWAY, "cancellation_failed", e.to_string())
        }
        CertificationError::Certifier(e) => {
            json_error(StatusCode::BAD_GATEWAY, "certifier_error", e.to_string())
        }
        CertificationError::Repository(RepositoryError::Conflict(msg)) => {
            json_error(StatusCode::CONFLICT, "conflict", msg)
        }
        CertificationError::Repository(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            e.to_string(),
        ),
    }
}

pub fn repository_error_to_response(err: RepositoryError) -> axum::response::Response {
    match err {
        RepositoryError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        RepositoryError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        RepositoryError::Storage(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
