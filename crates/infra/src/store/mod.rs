//! Persistence ports and their in-memory / Postgres implementations.
//!
//! Every uniqueness rule that matters for correctness (one ledger row per
//! `event_id`, one running sync at a time, one entitlement per event) is
//! enforced inside the store, never by check-then-insert in callers.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use simbridge_catalog::{Generation, OfferMapping, ProviderPackage, ResaleOffer};
use simbridge_core::{EventId, OfferId, ProviderId, SyncRunId};
use simbridge_fulfillment::{Entitlement, FailureReason, FulfillmentEvent, PlacedOrder};

use crate::sync::run::SyncRun;

pub mod in_memory;
pub mod postgres;

pub use in_memory::{InMemoryCatalogStore, InMemoryIdentityStore, InMemoryLedger, InMemorySyncRunStore};
pub use postgres::PostgresStores;

/// Store error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// A compare-and-set or uniqueness rule rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("a sync run is already in progress: {0}")]
    AlreadyRunning(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Outcome of publishing a new package snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishedSnapshot {
    pub generation: Generation,
    pub upserted: usize,
    /// Previously live packages absent from this snapshot.
    pub retired: usize,
}

/// Provider mirror and resale catalog.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Generation of the live snapshot, `None` before the first sync.
    async fn current_generation(&self) -> Result<Option<Generation>, StoreError>;

    /// Upsert packages by `provider_id` and make `generation` live, atomically.
    ///
    /// Readers observe either the previous snapshot or the new one, never a
    /// partial or empty catalog. Packages missing from the batch are kept
    /// but are no longer live. Fails with `Conflict` unless `generation` is
    /// newer than the current one.
    async fn publish_snapshot(
        &self,
        generation: Generation,
        packages: &[ProviderPackage],
    ) -> Result<PublishedSnapshot, StoreError>;

    /// Packages of the live generation.
    async fn live_packages(&self) -> Result<Vec<ProviderPackage>, StoreError>;

    /// One package, if it belongs to the live generation.
    async fn live_package(&self, provider_id: &ProviderId) -> Result<Option<ProviderPackage>, StoreError>;

    async fn insert_offer(&self, offer: &ResaleOffer) -> Result<(), StoreError>;

    async fn get_offer(&self, id: OfferId) -> Result<Option<ResaleOffer>, StoreError>;

    async fn list_offers(&self) -> Result<Vec<ResaleOffer>, StoreError>;

    /// Compare-and-set an offer's mapping; `Conflict` when the stored
    /// mapping is no longer `expected`.
    async fn update_offer_mapping(
        &self,
        id: OfferId,
        expected: &OfferMapping,
        next: &OfferMapping,
    ) -> Result<(), StoreError>;

    /// Overwrite the mutable fields of an offer (visibility, volume, mapping)
    /// if the stored row is still the one read at `expected_updated_at`;
    /// `Conflict` when anything wrote to it since.
    async fn save_offer(&self, offer: &ResaleOffer, expected_updated_at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Result of trying to insert a fresh ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginOutcome {
    Started(FulfillmentEvent),
    /// The `event_id` was already present; carries the stored row.
    Duplicate(FulfillmentEvent),
}

/// Idempotency ledger of fulfillment events plus their entitlements.
///
/// Mutations take the `attempt` that owns the event; a stale attempt gets
/// `Conflict` instead of overwriting a newer one.
#[async_trait]
pub trait FulfillmentLedger: Send + Sync {
    /// Atomically insert `event` (state `processing`).
    async fn begin(&self, event: &FulfillmentEvent) -> Result<BeginOutcome, StoreError>;

    /// Take over a `processing` event whose lease expired. `Ok(None)` when
    /// another delivery won or the lease is still held.
    async fn reclaim(
        &self,
        event_id: &EventId,
        expected_attempts: u32,
        lease: Duration,
    ) -> Result<Option<FulfillmentEvent>, StoreError>;

    /// Checkpoint the accepted provider order before activation.
    async fn record_order(&self, event_id: &EventId, attempt: u32, placed: &PlacedOrder) -> Result<(), StoreError>;

    /// Keep `processing` but drop the lease so a redelivery can retry.
    async fn release(&self, event_id: &EventId, attempt: u32, error: &str) -> Result<(), StoreError>;

    /// Persist the entitlement and mark the event `completed` in one step.
    async fn complete(&self, event_id: &EventId, attempt: u32, entitlement: &Entitlement) -> Result<(), StoreError>;

    async fn fail(&self, event_id: &EventId, attempt: u32, reason: &FailureReason) -> Result<(), StoreError>;

    async fn get_event(&self, event_id: &EventId) -> Result<Option<FulfillmentEvent>, StoreError>;

    async fn entitlement_for(&self, event_id: &EventId) -> Result<Option<Entitlement>, StoreError>;

    async fn list_entitlements(&self) -> Result<Vec<Entitlement>, StoreError>;
}

/// Sync run records (single-flight guard + history).
#[async_trait]
pub trait SyncRunStore: Send + Sync {
    /// Record `run` as running. Fails with `AlreadyRunning` while another
    /// run is in progress; a running record older than `stale_after` is
    /// marked failed and replaced.
    async fn begin_run(&self, run: &SyncRun, stale_after: Duration) -> Result<(), StoreError>;

    async fn finish_run(&self, run: &SyncRun) -> Result<(), StoreError>;

    async fn get_run(&self, id: SyncRunId) -> Result<Option<SyncRun>, StoreError>;

    /// Most recent first.
    async fn list_runs(&self, limit: usize) -> Result<Vec<SyncRun>, StoreError>;
}

/// Buyer identities.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Make sure the guest placeholder identity exists.
    async fn ensure_guest(&self) -> Result<(), StoreError>;
}
