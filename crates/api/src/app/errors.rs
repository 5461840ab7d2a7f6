use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::warn;

use docflow_infra::intake::IntakeError;
use docflow_infra::jobs::{EnqueueError, StatusError};
use docflow_infra::queries::QueryError;
use docflow_infra::records::RecordStoreError;

pub fn enqueue_error_to_response(err: EnqueueError) -> axum::response::Response {
    match err {
        EnqueueError::Intake(e) => intake_error_to_response(e),
        EnqueueError::QueryTooLong { .. } => json_error(StatusCode::BAD_REQUEST, "query_too_long", err.to_string()),
        EnqueueError::QueueUnavailable(_) => unavailable("queue_unavailable", err),
        EnqueueError::StoreUnavailable(_) => unavailable("store_unavailable", err),
    }
}

pub fn intake_error_to_response(err: IntakeError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        IntakeError::Unsupported(_) => json_error(StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_file_type", message),
        IntakeError::TooLarge { .. } => json_error(StatusCode::PAYLOAD_TOO_LARGE, "file_too_large", message),
        IntakeError::Corrupted(_) => json_error(StatusCode::UNPROCESSABLE_ENTITY, "file_corrupted", message),
        IntakeError::Unreadable(_) => json_error(StatusCode::UNPROCESSABLE_ENTITY, "file_unreadable", message),
        IntakeError::Storage(_) => unavailable("store_unavailable", err),
    }
}

pub fn status_error_to_response(err: StatusError) -> axum::response::Response {
    match err {
        StatusError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", "job not found"),
        StatusError::Unavailable(_) => unavailable("store_unavailable", err),
    }
}

pub fn query_error_to_response(err: QueryError) -> axum::response::Response {
    match err {
        QueryError::NotFound { kind } => json_error(StatusCode::NOT_FOUND, "not_found", format!("{kind} not found")),
        QueryError::Store(RecordStoreError::Unavailable(_)) => unavailable("store_unavailable", err),
        QueryError::Store(RecordStoreError::AlreadyExists(msg)) => json_error(StatusCode::CONFLICT, "conflict", msg),
        QueryError::Store(RecordStoreError::Corrupt(msg)) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "corrupt_record", msg)
        }
    }
}

pub fn multipart_error_to_response(err: MultipartError) -> axum::response::Response {
    let status = err.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        return json_error(status, "file_too_large", err.body_text());
    }
    json_error(status, "invalid_multipart", err.body_text())
}

fn unavailable(code: &'static str, err: impl std::fmt::Display) -> axum::response::Response {
    warn!(error = %err, "backing service unavailable");
    json_error(StatusCode::SERVICE_UNAVAILABLE, code, err.to_string())
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
