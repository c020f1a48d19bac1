//! In-memory stores for tests/dev.
//!
//! Each store keeps all of its state behind one `RwLock`, so every trait
//! method is atomic with respect to the others.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use simbridge_catalog::{Generation, OfferMapping, ProviderPackage, ResaleOffer};
use simbridge_core::{EventId, OfferId, ProviderId, SyncRunId, UserId};
use simbridge_fulfillment::{
    Entitlement, FailureReason, FulfillmentEvent, FulfillmentState, GUEST_USER_ID, PlacedOrder,
};

use super::{
    BeginOutcome, CatalogStore, FulfillmentLedger, IdentityStore, PublishedSnapshot, StoreError, SyncRunStore,
};
use crate::sync::run::{SyncRun, SyncStatus};

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Storage("lock poisoned".to_string())
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

/// Runs that started before this are considered abandoned.
fn stale_cutoff(stale_after: Duration) -> DateTime<Utc> {
    Utc::now()
        .checked_sub_signed(chrono_duration(stale_after))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Debug, Default)]
struct CatalogState {
    packages: HashMap<ProviderId, ProviderPackage>,
    current: Option<Generation>,
    offers: HashMap<OfferId, ResaleOffer>,
}

/// In-memory provider mirror + resale catalog.
#[derive(Debug, Default)]
pub struct InMemoryCatalogStore {
    inner: RwLock<CatalogState>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn current_generation(&self) -> Result<Option<Generation>, StoreError> {
        Ok(self.inner.read().map_err(poisoned)?.current)
    }

    async fn publish_snapshot(
        &self,
        generation: Generation,
        packages: &[ProviderPackage],
    ) -> Result<PublishedSnapshot, StoreError> {
        let mut state = self.inner.write().map_err(poisoned)?;
        if state.current.is_some_and(|current| generation <= current) {
            return Err(StoreError::Conflict(format!(
                "generation {generation} is not newer than the live snapshot"
            )));
        }

        let incoming: HashSet<&ProviderId> = packages.iter().map(|p| &p.provider_id).collect();
        let retired = match state.current {
            Some(current) => state
                .packages
                .values()
                .filter(|p| p.generation == current && !incoming.contains(&p.provider_id))
                .count(),
            None => 0,
        };

        for package in packages {
            let mut stored = package.clone();
            stored.generation = generation;
            state.packages.insert(stored.provider_id.clone(), stored);
        }
        state.current = Some(generation);

        Ok(PublishedSnapshot {
            generation,
            upserted: packages.len(),
            retired,
        })
    }

    async fn live_packages(&self) -> Result<Vec<ProviderPackage>, StoreError> {
        let state = self.inner.read().map_err(poisoned)?;
        let Some(current) = state.current else {
            return Ok(Vec::new());
        };
        let mut live: Vec<ProviderPackage> = state
            .packages
            .values()
            .filter(|p| p.generation == current)
            .cloned()
            .collect();
        live.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        Ok(live)
    }

    async fn live_package(&self, provider_id: &ProviderId) -> Result<Option<ProviderPackage>, StoreError> {
        let state = self.inner.read().map_err(poisoned)?;
        Ok(state
            .packages
            .get(provider_id)
            .filter(|p| Some(p.generation) == state.current)
            .cloned())
    }

    async fn insert_offer(&self, offer: &ResaleOffer) -> Result<(), StoreError> {
        let mut state = self.inner.write().map_err(poisoned)?;
        if state.offers.contains_key(&offer.id) {
            return Err(StoreError::Conflict(format!("offer {} already exists", offer.id)));
        }
        state.offers.insert(offer.id, offer.clone());
        Ok(())
    }

    async fn get_offer(&self, id: OfferId) -> Result<Option<ResaleOffer>, StoreError> {
        Ok(self.inner.read().map_err(poisoned)?.offers.get(&id).cloned())
    }

    async fn list_offers(&self) -> Result<Vec<ResaleOffer>, StoreError> {
        let state = self.inner.read().map_err(poisoned)?;
        let mut offers: Vec<ResaleOffer> = state.offers.values().cloned().collect();
        offers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(offers)
    }

    async fn update_offer_mapping(
        &self,
        id: OfferId,
        expected: &OfferMapping,
        next: &OfferMapping,
    ) -> Result<(), StoreError> {
        let mut state = self.inner.write().map_err(poisoned)?;
        let offer = state
            .offers
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("offer {id}")))?;
        if &offer.mapping != expected {
            return Err(StoreError::Conflict(format!("offer {id} mapping changed concurrently")));
        }
        offer.mapping = next.clone();
        offer.updated_at = Utc::now();
        Ok(())
    }

    async fn save_offer(&self, offer: &ResaleOffer, expected_updated_at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.inner.write().map_err(poisoned)?;
        let stored = state
            .offers
            .get_mut(&offer.id)
            .ok_or_else(|| StoreError::NotFound(format!("offer {}", offer.id)))?;
        if stored.updated_at != expected_updated_at {
            return Err(StoreError::Conflict(format!("offer {} changed concurrently", offer.id)));
        }
        *stored = offer.clone();
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    events: HashMap<EventId, FulfillmentEvent>,
    entitlements: HashMap<EventId, Entitlement>,
}

/// In-memory fulfillment ledger.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    inner: RwLock<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

fn owned_event<'a>(
    state: &'a mut LedgerState,
    event_id: &EventId,
    attempt: u32,
) -> Result<&'a mut FulfillmentEvent, StoreError> {
    let event = state
        .events
        .get_mut(event_id)
        .ok_or_else(|| StoreError::NotFound(format!("event {event_id}")))?;
    if event.state != FulfillmentState::Processing || event.attempts != attempt {
        return Err(StoreError::Conflict(format!(
            "event {event_id} is not owned by attempt {attempt}"
        )));
    }
    Ok(event)
}

#[async_trait]
impl FulfillmentLedger for InMemoryLedger {
    async fn begin(&self, event: &FulfillmentEvent) -> Result<BeginOutcome, StoreError> {
        let mut state = self.inner.write().map_err(poisoned)?;
        match state.events.entry(event.event_id.clone()) {
            std::collections::hash_map::Entry::Occupied(existing) => Ok(BeginOutcome::Duplicate(existing.get().clone())),
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(event.clone());
                Ok(BeginOutcome::Started(event.clone()))
            }
        }
    }

    async fn reclaim(
        &self,
        event_id: &EventId,
        expected_attempts: u32,
        lease: Duration,
    ) -> Result<Option<FulfillmentEvent>, StoreError> {
        let mut state = self.inner.write().map_err(poisoned)?;
        let event = state
            .events
            .get_mut(event_id)
            .ok_or_else(|| StoreError::NotFound(format!("event {event_id}")))?;
        match event.reclaim(expected_attempts, Utc::now(), chrono_duration(lease)) {
            Ok(()) => Ok(Some(event.clone())),
            Err(_) => Ok(None),
        }
    }

    async fn record_order(&self, event_id: &EventId, attempt: u32, placed: &PlacedOrder) -> Result<(), StoreError> {
        let mut state = self.inner.write().map_err(poisoned)?;
        let event = owned_event(&mut state, event_id, attempt)?;
        event
            .record_order(placed.clone(), Utc::now())
            .map_err(|e| StoreError::Conflict(e.to_string()))
    }

    async fn release(&self, event_id: &EventId, attempt: u32, error: &str) -> Result<(), StoreError> {
        let mut state = self.inner.write().map_err(poisoned)?;
        let event = owned_event(&mut state, event_id, attempt)?;
        event
            .release(error, Utc::now())
            .map_err(|e| StoreError::Conflict(e.to_string()))
    }

    async fn complete(&self, event_id: &EventId, attempt: u32, entitlement: &Entitlement) -> Result<(), StoreError> {
        let mut state = self.inner.write().map_err(poisoned)?;
        if state.entitlements.contains_key(event_id) {
            return Err(StoreError::Conflict(format!("event {event_id} already has an entitlement")));
        }
        owned_event(&mut state, event_id, attempt)?
            .complete(Utc::now())
            .map_err(|e| StoreError::Conflict(e.to_string()))?;
        state.entitlements.insert(event_id.clone(), entitlement.clone());
        Ok(())
    }

    async fn fail(&self, event_id: &EventId, attempt: u32, reason: &FailureReason) -> Result<(), StoreError> {
        let mut state = self.inner.write().map_err(poisoned)?;
        owned_event(&mut state, event_id, attempt)?
            .fail(reason.clone(), Utc::now())
            .map_err(|e| StoreError::Conflict(e.to_string()))
    }

    async fn get_event(&self, event_id: &EventId) -> Result<Option<FulfillmentEvent>, StoreError> {
        Ok(self.inner.read().map_err(poisoned)?.events.get(event_id).cloned())
    }

    async fn entitlement_for(&self, event_id: &EventId) -> Result<Option<Entitlement>, StoreError> {
        Ok(self.inner.read().map_err(poisoned)?.entitlements.get(event_id).cloned())
    }

    async fn list_entitlements(&self) -> Result<Vec<Entitlement>, StoreError> {
        let state = self.inner.read().map_err(poisoned)?;
        let mut all: Vec<Entitlement> = state.entitlements.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }
}

/// In-memory sync run history.
#[derive(Debug, Default)]
pub struct InMemorySyncRunStore {
    runs: RwLock<Vec<SyncRun>>,
}

impl InMemorySyncRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncRunStore for InMemorySyncRunStore {
    async fn begin_run(&self, run: &SyncRun, stale_after: Duration) -> Result<(), StoreError> {
        let mut runs = self.runs.write().map_err(poisoned)?;
        let cutoff = stale_cutoff(stale_after);
        for existing in runs.iter_mut().filter(|r| r.status == SyncStatus::Running) {
            if existing.started_at < cutoff {
                existing.mark_failed("abandoned: exceeded the maximum run time");
            } else {
                return Err(StoreError::AlreadyRunning(existing.id.to_string()));
            }
        }
        runs.push(run.clone());
        Ok(())
    }

    async fn finish_run(&self, run: &SyncRun) -> Result<(), StoreError> {
        let mut runs = self.runs.write().map_err(poisoned)?;
        let stored = runs
            .iter_mut()
            .find(|r| r.id == run.id)
            .ok_or_else(|| StoreError::NotFound(format!("sync run {}", run.id)))?;
        *stored = run.clone();
        Ok(())
    }

    async fn get_run(&self, id: SyncRunId) -> Result<Option<SyncRun>, StoreError> {
        Ok(self.runs.read().map_err(poisoned)?.iter().find(|r| r.id == id).cloned())
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<SyncRun>, StoreError> {
        let runs = self.runs.read().map_err(poisoned)?;
        Ok(runs.iter().rev().take(limit).cloned().collect())
    }
}

/// In-memory identity directory.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    users: RwLock<HashSet<UserId>>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: UserId) -> bool {
        self.users.read().map(|u| u.contains(&id)).unwrap_or(false)
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn ensure_guest(&self) -> Result<(), StoreError> {
        self.users.write().map_err(poisoned)?.insert(GUEST_USER_ID);
        Ok(())
    }
}
