use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use simbridge_catalog::AuditFixes;
use simbridge_core::SyncRunId;

use crate::app::services::Services;
use crate::app::{dto, errors};

const DEFAULT_RUNS_LIMIT: usize = 20;
const MAX_RUNS_LIMIT: usize = 200;

/// Mounted under `/admin/catalog`.
pub fn router() -> Router {
    Router::new()
        .route("/sync", post(sync))
        .route("/reconcile", post(reconcile))
        .route("/audit", post(audit))
}

/// Run history, mounted at the admin root.
pub fn runs_router() -> Router {
    Router::new()
        .route("/sync-runs", get(list_runs))
        .route("/sync-runs/:id", get(get_run))
}

pub async fn sync(Extension(services): Extension<Arc<Services>>) -> axum::response::Response {
    match services.sync.run().await {
        Ok(run) => (StatusCode::OK, Json(run)).into_response(),
        Err(e) => errors::sync_error_to_response(e),
    }
}

pub async fn reconcile(Extension(services): Extension<Arc<Services>>) -> axum::response::Response {
    match services.sync.reconcile().await {
        Ok(run) => (StatusCode::OK, Json(run)).into_response(),
        Err(e) => errors::sync_error_to_response(e),
    }
}

/// Report-only unless the body enables fixes.
pub async fn audit(
    Extension(services): Extension<Arc<Services>>,
    body: Option<Json<AuditFixes>>,
) -> axum::response::Response {
    let fixes = body.map(|Json(f)| f).unwrap_or_default();
    match services.audit.run(fixes).await {
        Ok(run) => (StatusCode::OK, Json(run)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn list_runs(
    Extension(services): Extension<Arc<Services>>,
    Query(query): Query<dto::RunsQuery>,
) -> axum::response::Response {
    let limit = query.limit.unwrap_or(DEFAULT_RUNS_LIMIT).clamp(1, MAX_RUNS_LIMIT);
    match services.runs.list_runs(limit).await {
        Ok(runs) => (StatusCode::OK, Json(runs)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn get_run(Extension(services): Extension<Arc<Services>>, Path(id): Path<String>) -> axum::response::Response {
    let id = match SyncRunId::from_str(&id) {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid sync run id"),
    };
    match services.runs.get_run(id).await {
        Ok(Some(run)) => (StatusCode::OK, Json(run)).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "sync run not found"),
        Err(e) => errors::store_error_to_response(e),
    }
}
