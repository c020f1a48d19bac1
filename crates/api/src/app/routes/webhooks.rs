use std::str::FromStr;
use std::sync::Arc;

use axum::{Json, Router, extract::Extension, http::StatusCode, response::IntoResponse, routing::post};
use serde_json::json;
use tracing::info;

use simbridge_core::{EventId, OfferId, UserId};
use simbridge_fulfillment::{Buyer, CUSTOMER_FAILURE_MESSAGE, FulfillmentOutcome, FulfillmentRequest};

use crate::app::services::Services;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/fulfillment", post(fulfillment))
}

/// Payment-succeeded webhook.
///
/// 200 with the entitlement once fulfilled (also on redelivery), 202 while
/// another delivery owns the event, 422 on terminal failure, 503 when the
/// provider is temporarily unavailable and the caller should redeliver.
pub async fn fulfillment(
    Extension(services): Extension<Arc<Services>>,
    Json(body): Json<dto::FulfillmentWebhook>,
) -> axum::response::Response {
    let request = match parse_request(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let outcome = match services.coordinator.handle(request).await {
        Ok(o) => o,
        Err(e) => return errors::fulfillment_error_to_response(e),
    };

    match outcome {
        FulfillmentOutcome::Completed { entitlement, replayed } => {
            info!(entitlement_id = %entitlement.id, replayed, "fulfillment delivered");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "completed",
                    "replayed": replayed,
                    "entitlement": dto::EntitlementResponse::from(entitlement),
                })),
            )
                .into_response()
        }
        FulfillmentOutcome::InProgress => (StatusCode::ACCEPTED, Json(json!({ "status": "in_progress" }))).into_response(),
        FulfillmentOutcome::Failed { replayed, .. } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "status": "failed",
                "replayed": replayed,
                "message": CUSTOMER_FAILURE_MESSAGE,
            })),
        )
            .into_response(),
        FulfillmentOutcome::RetryLater => {
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "retry_later" }))).into_response()
        }
    }
}

fn parse_request(body: dto::FulfillmentWebhook) -> Result<FulfillmentRequest, axum::response::Response> {
    let event_id = EventId::parse(body.event_id)
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_event_id", e.to_string()))?;
    let offer_id = OfferId::from_str(&body.offer_id)
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_offer_id", e.to_string()))?;
    let user_id = match body.buyer_id.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            UserId::from_str(raw)
                .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_buyer_id", e.to_string()))?,
        ),
    };
    Ok(FulfillmentRequest {
        event_id,
        offer_id,
        buyer: Buyer::from_optional(user_id),
    })
}
