//! Entitlements: what a buyer receives after a successful provider order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use simbridge_catalog::{CanonicalId, EntitlementRef};
use simbridge_core::{EntitlementId, EventId, OfferId, UserId};

use crate::event::ProviderOrder;

/// Activation credentials returned by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationDetails {
    pub lpa_code: Option<String>,
    pub qr_code_url: Option<String>,
    pub activation_code: Option<String>,
    pub ios_quick_install: Option<String>,
}

/// Result of one fulfilled event. 1:1 with its `event_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub id: EntitlementId,
    pub event_id: EventId,
    pub offer_id: OfferId,
    pub user_id: UserId,
    pub canonical_id: CanonicalId,
    pub provider_order_id: String,
    pub esim_id: Option<String>,
    pub iccid: Option<String>,
    pub activation: ActivationDetails,
    pub created_at: DateTime<Utc>,
}

impl Entitlement {
    pub fn new(
        event_id: EventId,
        offer_id: OfferId,
        user_id: UserId,
        canonical_id: CanonicalId,
        order: &ProviderOrder,
        activation: ActivationDetails,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EntitlementId::new(),
            event_id,
            offer_id,
            user_id,
            canonical_id,
            provider_order_id: order.order_id.clone(),
            esim_id: order.esim_id.clone(),
            iccid: order.iccid.clone(),
            activation,
            created_at: now,
        }
    }

    /// The view the integrity auditor works with.
    pub fn to_ref(&self) -> EntitlementRef {
        EntitlementRef {
            entitlement_id: self.id,
            event_id: self.event_id.clone(),
            offer_id: self.offer_id,
            canonical_id: self.canonical_id.clone(),
            created_at: self.created_at,
        }
    }
}
