use serde::{Deserialize, Serialize};

use simbridge_core::{EntitlementId, OfferId, UserId};
use simbridge_fulfillment::{ActivationDetails, Entitlement};

// -------------------------
// Request DTOs
// -------------------------

/// Payment-succeeded notification. Ids arrive as strings and are parsed in
/// the handler so malformed input gets a 400 instead of a generic rejection.
#[derive(Debug, Deserialize)]
pub struct FulfillmentWebhook {
    pub event_id: String,
    pub offer_id: String,
    #[serde(default)]
    pub buyer_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateOfferRequest {
    pub provider_id: String,
    #[serde(default)]
    pub markup_bps: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<usize>,
}

// -------------------------
// Response DTOs
// -------------------------

/// What a buyer-facing caller learns about a completed fulfillment.
#[derive(Debug, Serialize)]
pub struct EntitlementResponse {
    pub entitlement_id: EntitlementId,
    pub offer_id: OfferId,
    pub user_id: UserId,
    pub package_id: String,
    pub iccid: Option<String>,
    pub activation: ActivationDetails,
}

impl From<Entitlement> for EntitlementResponse {
    fn from(e: Entitlement) -> Self {
        Self {
            entitlement_id: e.id,
            offer_id: e.offer_id,
            user_id: e.user_id,
            package_id: e.canonical_id.to_string(),
            iccid: e.iccid,
            activation: e.activation,
        }
    }
}
