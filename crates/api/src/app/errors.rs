use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use simbridge_infra::store::StoreError;
use simbridge_infra::{FulfillmentError, OfferError, SyncError};

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        StoreError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        StoreError::AlreadyRunning(msg) => json_error(StatusCode::CONFLICT, "already_running", msg),
        StoreError::Storage(msg) => {
            tracing::error!(error = %msg, "storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "storage failure")
        }
    }
}

pub fn sync_error_to_response(err: SyncError) -> axum::response::Response {
    match err {
        SyncError::AlreadyRunning => json_error(StatusCode::CONFLICT, "already_running", err.to_string()),
        SyncError::EmptyFeed { .. } => json_error(StatusCode::BAD_GATEWAY, "empty_feed", err.to_string()),
        SyncError::Provider(e) => json_error(StatusCode::BAD_GATEWAY, "provider_error", e.to_string()),
        SyncError::Store(e) => store_error_to_response(e),
    }
}

pub fn offer_error_to_response(err: OfferError) -> axum::response::Response {
    match err {
        OfferError::UnknownPackage(_) => json_error(StatusCode::NOT_FOUND, "unknown_package", err.to_string()),
        OfferError::Domain(e) => json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_offer", e.to_string()),
        OfferError::Store(e) => store_error_to_response(e),
    }
}

pub fn fulfillment_error_to_response(err: FulfillmentError) -> axum::response::Response {
    match err {
        FulfillmentError::Store(e) => store_error_to_response(e),
        FulfillmentError::Inconsistent(msg) => {
            tracing::error!(error = %msg, "fulfillment ledger is inconsistent");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error")
        }
    }
}
