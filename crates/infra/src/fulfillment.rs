//! Idempotent fulfillment coordinator.
//!
//! Turns payment notifications into provider orders and entitlements. Each
//! `event_id` produces at most one entitlement and at most one provider
//! order no matter how often (or how concurrently) it is delivered:
//!
//! - the ledger row is inserted atomically before any side effect;
//! - ownership is a lease plus attempt number, checked on every write;
//! - the provider order is checkpointed before activation, and order
//!   creation carries the `event_id` as its idempotency key.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use simbridge_catalog::CanonicalId;
use simbridge_core::{EventId, OfferId};
use simbridge_fulfillment::{
    Entitlement, FailureReason, FulfillmentEvent, FulfillmentOutcome, FulfillmentRequest, FulfillmentState,
    PlacedOrder,
};

use crate::incidents::{Incident, IncidentSink};
use crate::provider::{OrderRequest, ProviderApi, ProviderError};
use crate::store::{BeginOutcome, CatalogStore, FulfillmentLedger, StoreError};

#[derive(Debug, Error)]
pub enum FulfillmentError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("ledger is inconsistent: {0}")]
    Inconsistent(String),
}

/// Whether the current attempt still owns the event after a ledger write.
enum Ownership {
    Held,
    Lost,
}

fn ownership(event_id: &EventId, result: Result<(), StoreError>) -> Result<Ownership, FulfillmentError> {
    match result {
        Ok(()) => Ok(Ownership::Held),
        Err(StoreError::Conflict(detail)) => {
            warn!(event_id = %event_id, detail = %detail, "event taken over by another attempt");
            Ok(Ownership::Lost)
        }
        Err(e) => Err(e.into()),
    }
}

pub struct FulfillmentCoordinator {
    catalog: Arc<dyn CatalogStore>,
    ledger: Arc<dyn FulfillmentLedger>,
    provider: Arc<dyn ProviderApi>,
    incidents: Arc<dyn IncidentSink>,
    lease: Duration,
}

impl FulfillmentCoordinator {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        ledger: Arc<dyn FulfillmentLedger>,
        provider: Arc<dyn ProviderApi>,
        incidents: Arc<dyn IncidentSink>,
        lease: Duration,
    ) -> Self {
        Self {
            catalog,
            ledger,
            provider,
            incidents,
            lease,
        }
    }

    fn chrono_lease(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.lease).unwrap_or(chrono::Duration::MAX)
    }

    /// Handle one delivery of a payment notification.
    #[instrument(
        skip(self, request),
        fields(event_id = %request.event_id, offer_id = %request.offer_id),
        err
    )]
    pub async fn handle(&self, request: FulfillmentRequest) -> Result<FulfillmentOutcome, FulfillmentError> {
        let fresh = FulfillmentEvent::begin(
            request.event_id,
            request.offer_id,
            request.buyer,
            Utc::now(),
            self.chrono_lease(),
        );

        let event = match self.ledger.begin(&fresh).await? {
            BeginOutcome::Started(event) => event,
            BeginOutcome::Duplicate(existing) => {
                if existing.offer_id != fresh.offer_id {
                    warn!(
                        stored_offer_id = %existing.offer_id,
                        "duplicate delivery names a different offer; the stored one wins"
                    );
                }
                match self.claim_duplicate(existing).await? {
                    Ok(event) => event,
                    Err(settled) => return Ok(settled),
                }
            }
        };

        self.process(event).await
    }

    /// Replay a settled event, or take over one whose lease expired.
    async fn claim_duplicate(
        &self,
        existing: FulfillmentEvent,
    ) -> Result<Result<FulfillmentEvent, FulfillmentOutcome>, FulfillmentError> {
        match &existing.state {
            FulfillmentState::Completed => {
                let entitlement = self.ledger.entitlement_for(&existing.event_id).await?.ok_or_else(|| {
                    FulfillmentError::Inconsistent(format!(
                        "event {} is completed without an entitlement",
                        existing.event_id
                    ))
                })?;
                info!(event_id = %existing.event_id, "replaying completed fulfillment");
                Ok(Err(FulfillmentOutcome::Completed {
                    entitlement,
                    replayed: true,
                }))
            }
            FulfillmentState::Failed { reason } => Ok(Err(FulfillmentOutcome::Failed {
                reason: reason.clone(),
                replayed: true,
            })),
            FulfillmentState::Processing if existing.lease_active(Utc::now()) => Ok(Err(FulfillmentOutcome::InProgress)),
            FulfillmentState::Processing => {
                match self
                    .ledger
                    .reclaim(&existing.event_id, existing.attempts, self.lease)
                    .await?
                {
                    Some(event) => {
                        info!(event_id = %event.event_id, attempt = event.attempts, "reclaimed expired fulfillment");
                        Ok(Ok(event))
                    }
                    None => Ok(Err(FulfillmentOutcome::InProgress)),
                }
            }
        }
    }

    async fn process(&self, event: FulfillmentEvent) -> Result<FulfillmentOutcome, FulfillmentError> {
        // An order already placed is finished as ordered; the live catalog no
        // longer matters for it.
        if let Some(placed) = event.provider_order.clone() {
            info!(event_id = %event.event_id, order_id = %placed.order.order_id, "resuming from placed order");
            return self.activate(&event, placed).await;
        }

        let canonical_id = match self.resolve(event.offer_id).await? {
            Ok(id) => id,
            Err(detail) => return self.fail(&event, FailureReason::MissingCatalogMapping { detail }).await,
        };

        let request = OrderRequest::single(canonical_id.clone());
        let order = match self.provider.create_order(&request, event.event_id.as_str()).await {
            Ok(order) => order,
            Err(e) => return self.provider_failure(&event, e).await,
        };
        let placed = PlacedOrder { canonical_id, order };
        let recorded = self.ledger.record_order(&event.event_id, event.attempts, &placed).await;
        if let Ownership::Lost = ownership(&event.event_id, recorded)? {
            return Ok(FulfillmentOutcome::InProgress);
        }
        info!(event_id = %event.event_id, order_id = %placed.order.order_id, "provider order placed");

        self.activate(&event, placed).await
    }

    async fn activate(&self, event: &FulfillmentEvent, placed: PlacedOrder) -> Result<FulfillmentOutcome, FulfillmentError> {
        let PlacedOrder { canonical_id, order } = placed;
        let Some(esim_id) = order.esim_id.as_deref() else {
            let e = ProviderError::InvalidResponse(format!("order {} has no eSIM id", order.order_id));
            return self.provider_failure(event, e).await;
        };
        let activation = match self.provider.activate(esim_id).await {
            Ok(activation) => activation,
            Err(e) => return self.provider_failure(event, e).await,
        };

        let entitlement = Entitlement::new(
            event.event_id.clone(),
            event.offer_id,
            event.buyer.user_id(),
            canonical_id,
            &order,
            activation,
            Utc::now(),
        );
        let completed = self.ledger.complete(&event.event_id, event.attempts, &entitlement).await;
        if let Ownership::Lost = ownership(&event.event_id, completed)? {
            return Ok(FulfillmentOutcome::InProgress);
        }

        info!(
            event_id = %event.event_id,
            entitlement_id = %entitlement.id,
            canonical_id = %entitlement.canonical_id,
            "fulfillment completed"
        );
        Ok(FulfillmentOutcome::Completed {
            entitlement,
            replayed: false,
        })
    }

    /// The canonical id to order, or why the offer cannot be fulfilled.
    /// Never falls back to a similar package.
    async fn resolve(&self, offer_id: OfferId) -> Result<Result<CanonicalId, String>, FulfillmentError> {
        let Some(offer) = self.catalog.get_offer(offer_id).await? else {
            return Ok(Err(format!("offer {offer_id} does not exist")));
        };
        if !offer.is_fulfillment_eligible() {
            return Ok(Err(format!(
                "offer {offer_id} mapping is {}",
                offer.mapping.status.as_str()
            )));
        }
        let (Some(canonical_id), Some(provider_id)) = (offer.mapping.canonical_id, offer.mapping.provider_id) else {
            return Ok(Err(format!("offer {offer_id} has no canonical id")));
        };
        match self.catalog.live_package(&provider_id).await? {
            Some(package) if package.canonical_id == canonical_id => Ok(Ok(canonical_id)),
            Some(package) => Ok(Err(format!(
                "offer {offer_id} points at {canonical_id} but provider package {provider_id} is now {}",
                package.canonical_id
            ))),
            None => Ok(Err(format!(
                "provider package {provider_id} for {canonical_id} is not in the live catalog"
            ))),
        }
    }

    async fn provider_failure(
        &self,
        event: &FulfillmentEvent,
        error: ProviderError,
    ) -> Result<FulfillmentOutcome, FulfillmentError> {
        if !error.is_transient() {
            let detail = error.to_string();
            return self.fail(event, FailureReason::ProviderRejected { detail }).await;
        }

        warn!(
            event_id = %event.event_id,
            attempt = event.attempts,
            error = %error,
            "transient provider failure; releasing event for redelivery"
        );
        let released = self
            .ledger
            .release(&event.event_id, event.attempts, &error.to_string())
            .await;
        match ownership(&event.event_id, released)? {
            Ownership::Held => Ok(FulfillmentOutcome::RetryLater),
            Ownership::Lost => Ok(FulfillmentOutcome::InProgress),
        }
    }

    async fn fail(&self, event: &FulfillmentEvent, reason: FailureReason) -> Result<FulfillmentOutcome, FulfillmentError> {
        let failed = self.ledger.fail(&event.event_id, event.attempts, &reason).await;
        if let Ownership::Lost = ownership(&event.event_id, failed)? {
            return Ok(FulfillmentOutcome::InProgress);
        }
        self.incidents.report(Incident::FulfillmentFailed {
            event_id: event.event_id.clone(),
            offer_id: event.offer_id,
            reason: reason.clone(),
        });
        Ok(FulfillmentOutcome::Failed {
            reason,
            replayed: false,
        })
    }
}
