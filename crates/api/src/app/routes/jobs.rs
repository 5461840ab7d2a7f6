use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use docflow_core::JobId;

use super::parse_id;
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new().route("/:id", get(get_job))
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: JobId = match parse_id(&id, "job") {
        Ok(v) => v,
        Err(res) => return res,
    };

    match services.status.get(id, principal.user_id()).await {
        Ok(job) => Json(job).into_response(),
        Err(e) => errors::status_error_to_response(e),
    }
}
