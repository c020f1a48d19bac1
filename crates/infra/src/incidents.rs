//! Operator-facing incident reporting.
//!
//! Incidents are not part of any workflow's result: they are how support
//! learns that a customer needs manual help or the catalog needs attention.

use std::sync::Mutex;

use serde::Serialize;
use tracing::{error, warn};

use simbridge_catalog::audit::EntitlementIncident;
use simbridge_core::{EventId, OfferId, SyncRunId};
use simbridge_fulfillment::FailureReason;

/// Something an operator must look at.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "incident", rename_all = "snake_case")]
pub enum Incident {
    /// A paid order could not be fulfilled automatically.
    FulfillmentFailed {
        event_id: EventId,
        offer_id: OfferId,
        reason: FailureReason,
    },
    /// An offer lost its provider package and is no longer sellable.
    OfferUnresolved { offer_id: OfferId, reason: String },
    SyncFailed { run_id: SyncRunId, error: String },
    Entitlement(EntitlementIncident),
}

/// Sink for incidents.
pub trait IncidentSink: Send + Sync + 'static {
    fn report(&self, incident: Incident);
}

/// Writes incidents to the log at `error`/`warn` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingIncidentSink;

impl IncidentSink for TracingIncidentSink {
    fn report(&self, incident: Incident) {
        match &incident {
            Incident::FulfillmentFailed {
                event_id,
                offer_id,
                reason,
            } => error!(
                event_id = %event_id,
                offer_id = %offer_id,
                code = reason.code(),
                detail = reason.detail(),
                "fulfillment needs manual follow-up"
            ),
            Incident::OfferUnresolved { offer_id, reason } => {
                warn!(offer_id = %offer_id, reason = %reason, "offer has no provider package")
            }
            Incident::SyncFailed { run_id, error } => {
                error!(run_id = %run_id, error = %error, "catalog sync failed")
            }
            Incident::Entitlement(found) => error!(
                entitlement_id = %found.entitlement_id,
                event_id = %found.event_id,
                canonical_id = %found.canonical_id,
                kind = ?found.kind,
                "entitlement references a missing catalog row"
            ),
        }
    }
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryIncidentSink {
    inner: Mutex<Vec<Incident>>,
}

impl InMemoryIncidentSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Incident> {
        self.inner.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl IncidentSink for InMemoryIncidentSink {
    fn report(&self, incident: Incident) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.push(incident);
        }
    }
}
