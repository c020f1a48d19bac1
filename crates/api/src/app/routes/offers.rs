use std::sync::Arc;

use axum::{Json, Router, extract::Extension, http::StatusCode, response::IntoResponse, routing::post};

use simbridge_core::ProviderId;

use crate::app::services::Services;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/", post(create_offer).get(list_offers))
}

pub async fn create_offer(
    Extension(services): Extension<Arc<Services>>,
    Json(body): Json<dto::CreateOfferRequest>,
) -> axum::response::Response {
    let provider_id = match ProviderId::parse(body.provider_id) {
        Ok(v) => v,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_provider_id", e.to_string()),
    };
    match services.offers.create_from_package(&provider_id, body.markup_bps).await {
        Ok(offer) => (StatusCode::CREATED, Json(offer)).into_response(),
        Err(e) => errors::offer_error_to_response(e),
    }
}

pub async fn list_offers(Extension(services): Extension<Arc<Services>>) -> axum::response::Response {
    match services.offers.list().await {
        Ok(offers) => (StatusCode::OK, Json(offers)).into_response(),
        Err(e) => errors::offer_error_to_response(e),
    }
}
