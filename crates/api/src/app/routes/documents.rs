use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, DefaultBodyLimit, Extension, Multipart, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use docflow_core::DocumentId;
use docflow_infra::intake::Upload;
use docflow_infra::ratelimit::RateLimiter;

use super::parse_id;
use crate::app::dto::{AnalyzeAccepted, DocumentView, ListParams};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;
use crate::middleware;

/// Headroom over the file limit for multipart framing and the query field.
const MULTIPART_SLACK: u64 = 1024 * 1024;

pub fn router(limiter: RateLimiter, max_upload_bytes: u64) -> Router {
    let body_limit = usize::try_from(max_upload_bytes.saturating_add(MULTIPART_SLACK)).unwrap_or(usize::MAX);
    Router::new()
        .route(
            "/analyze",
            post(analyze_document)
                .layer(DefaultBodyLimit::max(body_limit))
                .layer(axum::middleware::from_fn_with_state(limiter, middleware::rate_limit_middleware)),
        )
        .route("/", get(list_documents))
        .route("/:id", get(get_document).delete(delete_document))
}

/// Multipart upload: a `file` part and an optional `query` text part.
pub async fn analyze_document(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    mut multipart: Multipart,
) -> axum::response::Response {
    let mut upload: Option<Upload> = None;
    let mut query: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(e) => return errors::multipart_error_to_response(e),
        };
        match field.name() {
            Some("file") => {
                let filename = field.file_name().unwrap_or("upload.pdf").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes: Bytes = match field.bytes().await {
                    Ok(b) => b,
                    Err(e) => return errors::multipart_error_to_response(e),
                };
                upload = Some(Upload {
                    filename,
                    content_type,
                    bytes,
                });
            }
            Some("query") => match field.text().await {
                Ok(t) => query = Some(t),
                Err(e) => return errors::multipart_error_to_response(e),
            },
            _ => {}
        }
    }

    let Some(upload) = upload else {
        return errors::json_error(StatusCode::BAD_REQUEST, "missing_file", "multipart field `file` is required");
    };

    match services
        .producer
        .enqueue(upload, query.as_deref(), principal.user_id())
        .await
    {
        Ok(out) => (
            StatusCode::ACCEPTED,
            Json(AnalyzeAccepted {
                status: "queued",
                query: out.query,
                file_processed: out.filename,
                document_id: out.document_id,
                job_id: out.job_id,
            }),
        )
            .into_response(),
        Err(e) => errors::enqueue_error_to_response(e),
    }
}

pub async fn list_documents(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> axum::response::Response {
    let Query(params) = match params {
        Ok(p) => p,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_query", e.body_text()),
    };

    match services.queries.list_documents(principal.user_id(), params.page()).await {
        Ok(docs) => Json(docs.into_iter().map(DocumentView::from).collect::<Vec<_>>()).into_response(),
        Err(e) => errors::query_error_to_response(e),
    }
}

pub async fn get_document(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: DocumentId = match parse_id(&id, "document") {
        Ok(v) => v,
        Err(res) => return res,
    };

    match services.queries.get_document(id, principal.user_id()).await {
        Ok(doc) => Json(DocumentView::from(doc)).into_response(),
        Err(e) => errors::query_error_to_response(e),
    }
}

pub async fn delete_document(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: DocumentId = match parse_id(&id, "document") {
        Ok(v) => v,
        Err(res) => return res,
    };

    match services.queries.delete_document(id, principal.user_id()).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::query_error_to_response(e),
    }
}
