//! Requests into and outcomes out of the fulfillment coordinator.

use serde::{Deserialize, Serialize};

use simbridge_core::{EventId, OfferId};

use crate::entitlement::Entitlement;
use crate::event::{Buyer, FailureReason};

/// Message shown to customers for every failure. Internal details stay in
/// logs and the ledger.
pub const CUSTOMER_FAILURE_MESSAGE: &str = "could not complete automatically, support notified";

/// A validated payment-succeeded notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentRequest {
    pub event_id: EventId,
    pub offer_id: OfferId,
    pub buyer: Buyer,
}

/// What happened to one delivery of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FulfillmentOutcome {
    Completed {
        entitlement: Entitlement,
        /// True when this delivery was a duplicate and the cached result was returned.
        replayed: bool,
    },
    /// Another attempt owns the event right now.
    InProgress,
    Failed {
        reason: FailureReason,
        replayed: bool,
    },
    /// Transient provider trouble; the event stays `processing` and a
    /// redelivery will re-attempt it.
    RetryLater,
}

impl FulfillmentOutcome {
    pub fn is_replay(&self) -> bool {
        matches!(
            self,
            FulfillmentOutcome::Completed { replayed: true, .. } | FulfillmentOutcome::Failed { replayed: true, .. }
        )
    }
}
