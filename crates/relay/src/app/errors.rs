use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use supplyreg_infra::outbox::OutboxStoreError;

pub fn store_error_to_response(err: OutboxStoreError) -> axum::response::Response {
    match err {
        OutboxStoreError::NotFound(id) => json_error(StatusCode::NOT_FOUND, "not_found", format!("{id} not found")),
        OutboxStoreError::IllegalTransition { .. } => json_error(StatusCode::CONFLICT, "conflict", err.to_string()),
        OutboxStoreError::Duplicate(_) => json_error(StatusCode::CONFLICT, "duplicate", err.to_string()),
        OutboxStoreError::Corrupt(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "corrupt_record", msg),
        OutboxStoreError::Storage(msg) => json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", msg),
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
