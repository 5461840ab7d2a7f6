use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use docflow_core::{AnalysisId, DocumentId};

use super::parse_id;
use crate::app::dto::AnalysisListParams;
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_analyses))
        .route("/:id", get(get_analysis))
}

pub async fn list_analyses(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    params: Result<Query<AnalysisListParams>, QueryRejection>,
) -> axum::response::Response {
    let Query(params) = match params {
        Ok(p) => p,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_query", e.body_text()),
    };
    let document = match params.document_id.as_deref().filter(|s| !s.is_empty()) {
        None => None,
        Some(raw) => match parse_id::<DocumentId>(raw, "document") {
            Ok(id) => Some(id),
            Err(res) => return res,
        },
    };

    match services
        .queries
        .list_analyses(principal.user_id(), document, params.page())
        .await
    {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => errors::query_error_to_response(e),
    }
}

pub async fn get_analysis(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: AnalysisId = match parse_id(&id, "analysis") {
        Ok(v) => v,
        Err(res) => return res,
    };

    match services.queries.get_analysis(id, principal.user_id()).await {
        Ok(row) => Json(row).into_response(),
        Err(e) => errors::query_error_to_response(e),
    }
}
