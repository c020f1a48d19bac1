//! Fulfillment events: the idempotency ledger entry per payment notification.
//!
//! State machine: `processing -> {completed | failed}`. Terminal states never
//! change. A `processing` event is owned by one attempt while its lease is
//! active; a released or expired lease lets a redelivery of the same
//! `event_id` take over.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use simbridge_catalog::CanonicalId;
use simbridge_core::{DomainError, DomainResult, EventId, OfferId, UserId};

/// Well-known identity that unauthenticated purchases are attributed to.
pub const GUEST_USER_ID: UserId = UserId::from_uuid(Uuid::nil());

/// End of a lease starting at `now`; saturates instead of overflowing.
pub fn lease_expiry(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    now.checked_add_signed(lease).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Who paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "user_id", rename_all = "snake_case")]
pub enum Buyer {
    Registered(UserId),
    Guest,
}

impl Buyer {
    pub fn from_optional(user_id: Option<UserId>) -> Self {
        match user_id {
            Some(id) if id != GUEST_USER_ID => Buyer::Registered(id),
            _ => Buyer::Guest,
        }
    }

    pub fn user_id(&self) -> UserId {
        match self {
            Buyer::Registered(id) => *id,
            Buyer::Guest => GUEST_USER_ID,
        }
    }
}

/// Why an event ended in `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "kebab-case")]
pub enum FailureReason {
    /// The offer has no resolvable canonical id.
    MissingCatalogMapping { detail: String },
    /// The provider refused the order (non-retryable).
    ProviderRejected { detail: String },
}

impl FailureReason {
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::MissingCatalogMapping { .. } => "missing-catalog-mapping",
            FailureReason::ProviderRejected { .. } => "provider-rejected",
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            FailureReason::MissingCatalogMapping { detail } | FailureReason::ProviderRejected { detail } => detail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FulfillmentState {
    Processing,
    Completed,
    Failed { reason: FailureReason },
}

impl FulfillmentState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FulfillmentState::Processing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentState::Processing => "processing",
            FulfillmentState::Completed => "completed",
            FulfillmentState::Failed { .. } => "failed",
        }
    }
}

/// Order as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderOrder {
    pub order_id: String,
    pub esim_id: Option<String>,
    pub iccid: Option<String>,
}

/// Checkpoint written right after the provider accepted an order.
///
/// Carries the canonical id that was actually ordered. A retry finishes
/// from here without consulting the catalog again, so a later sync that
/// retires or repoints the package cannot strand a paid order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub canonical_id: CanonicalId,
    #[serde(flatten)]
    pub order: ProviderOrder,
}

/// One inbound payment notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentEvent {
    pub event_id: EventId,
    pub offer_id: OfferId,
    pub buyer: Buyer,
    #[serde(flatten)]
    pub state: FulfillmentState,
    /// Number of attempts that claimed this event.
    pub attempts: u32,
    pub lease_until: DateTime<Utc>,
    pub provider_order: Option<PlacedOrder>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FulfillmentEvent {
    /// First sighting of an event: `processing`, owned by attempt 1.
    pub fn begin(event_id: EventId, offer_id: OfferId, buyer: Buyer, now: DateTime<Utc>, lease: Duration) -> Self {
        Self {
            event_id,
            offer_id,
            buyer,
            state: FulfillmentState::Processing,
            attempts: 1,
            lease_until: lease_expiry(now, lease),
            provider_order: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether an attempt currently owns this event.
    pub fn lease_active(&self, now: DateTime<Utc>) -> bool {
        matches!(self.state, FulfillmentState::Processing) && self.lease_until > now
    }

    /// Take over a `processing` event whose lease ran out.
    ///
    /// `expected_attempts` must match, so only one of several concurrent
    /// redeliveries wins.
    pub fn reclaim(&mut self, expected_attempts: u32, now: DateTime<Utc>, lease: Duration) -> DomainResult<()> {
        self.ensure_processing()?;
        if self.lease_active(now) {
            return Err(DomainError::conflict(format!("event {} is leased", self.event_id)));
        }
        if self.attempts != expected_attempts {
            return Err(DomainError::conflict(format!(
                "event {} was reclaimed concurrently",
                self.event_id
            )));
        }
        self.attempts += 1;
        self.lease_until = lease_expiry(now, lease);
        self.updated_at = now;
        Ok(())
    }

    pub fn record_order(&mut self, placed: PlacedOrder, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_processing()?;
        if let Some(existing) = &self.provider_order {
            if existing != &placed {
                return Err(DomainError::conflict(format!(
                    "event {} already has order {}",
                    self.event_id, existing.order.order_id
                )));
            }
        }
        self.provider_order = Some(placed);
        self.updated_at = now;
        Ok(())
    }

    /// Give up the lease after a transient failure; stays `processing`.
    pub fn release(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_processing()?;
        self.last_error = Some(error.into());
        self.lease_until = now;
        self.updated_at = now;
        Ok(())
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_processing()?;
        self.state = FulfillmentState::Completed;
        self.last_error = None;
        self.updated_at = now;
        Ok(())
    }

    pub fn fail(&mut self, reason: FailureReason, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_processing()?;
        self.last_error = Some(reason.detail().to_string());
        self.state = FulfillmentState::Failed { reason };
        self.updated_at = now;
        Ok(())
    }

    fn ensure_processing(&self) -> DomainResult<()> {
        if self.is_terminal() {
            return Err(DomainError::conflict(format!(
                "event {} is already {}",
                self.event_id,
                self.state.as_str()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(now: DateTime<Utc>) -> FulfillmentEvent {
        FulfillmentEvent::begin(
            EventId::parse("evt_123").unwrap(),
            OfferId::new(),
            Buyer::Guest,
            now,
            Duration::seconds(120),
        )
    }

    #[test]
    fn guest_buyer_maps_to_nil_user() {
        assert_eq!(Buyer::Guest.user_id(), GUEST_USER_ID);
        assert_eq!(GUEST_USER_ID.to_string(), "00000000-0000-0000-0000-000000000000");
        assert_eq!(Buyer::from_optional(Some(GUEST_USER_ID)), Buyer::Guest);
        let id = UserId::new();
        assert_eq!(Buyer::from_optional(Some(id)), Buyer::Registered(id));
    }

    #[test]
    fn terminal_states_never_change() {
        let now = Utc::now();
        let mut e = event(now);
        e.complete(now).unwrap();
        assert!(e.complete(now).is_err());
        assert!(e.fail(FailureReason::ProviderRejected { detail: "x".into() }, now).is_err());
        assert!(e.release("timeout", now).is_err());
        assert_eq!(e.state, FulfillmentState::Completed);
    }

    #[test]
    fn oversized_lease_saturates() {
        let now = Utc::now();
        let e = FulfillmentEvent::begin(
            EventId::parse("evt_big").unwrap(),
            OfferId::new(),
            Buyer::Guest,
            now,
            Duration::MAX,
        );
        assert_eq!(e.lease_until, DateTime::<Utc>::MAX_UTC);
        assert!(e.lease_active(now));
    }

    #[test]
    fn active_lease_blocks_reclaim() {
        let now = Utc::now();
        let mut e = event(now);
        assert!(e.lease_active(now));
        assert!(e.reclaim(1, now, Duration::seconds(120)).is_err());
    }

    #[test]
    fn released_event_can_be_reclaimed_exactly_once() {
        let now = Utc::now();
        let mut e = event(now);
        e.release("provider timeout", now).unwrap();
        assert!(!e.lease_active(now));
        assert_eq!(e.last_error.as_deref(), Some("provider timeout"));

        e.reclaim(1, now, Duration::seconds(120)).unwrap();
        assert_eq!(e.attempts, 2);
        assert!(e.reclaim(1, now + Duration::seconds(500), Duration::seconds(120)).is_err());
    }

    fn placed(order_id: &str) -> PlacedOrder {
        PlacedOrder {
            canonical_id: CanonicalId::parse("esim-de-30days-5gb-all").unwrap(),
            order: ProviderOrder {
                order_id: order_id.to_string(),
                esim_id: Some("esim-1".into()),
                iccid: None,
            },
        }
    }

    #[test]
    fn placed_order_is_recorded_once() {
        let now = Utc::now();
        let mut e = event(now);
        e.record_order(placed("ord-1"), now).unwrap();
        e.record_order(placed("ord-1"), now).unwrap();
        assert!(e.record_order(placed("ord-2"), now).is_err());
        assert_eq!(e.provider_order.unwrap().order.order_id, "ord-1");
    }

    #[test]
    fn placed_order_payload_keeps_order_fields_flat() {
        let json = serde_json::to_value(placed("ord-1")).unwrap();
        assert_eq!(json["canonical_id"], "esim-de-30days-5gb-all");
        assert_eq!(json["order_id"], "ord-1");
    }

    #[test]
    fn failure_reason_codes() {
        let reason = FailureReason::MissingCatalogMapping { detail: "offer unresolved".into() };
        assert_eq!(reason.code(), "missing-catalog-mapping");
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["code"], "missing-catalog-mapping");
    }
}
