//! Postgres-backed stores.
//!
//! Rows keep their queryable keys in columns and the full record in a JSONB
//! `payload`. State transitions load the row `FOR UPDATE`, apply the domain
//! method and write it back in the same transaction, so the rules in
//! `FulfillmentEvent` and `SyncRun` are the only rules.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / other | N/A | `Storage` |

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};
use tracing::instrument;

use simbridge_catalog::{Generation, OfferMapping, ProviderPackage, ResaleOffer};
use simbridge_core::{DomainResult, EventId, OfferId, ProviderId, SyncRunId};
use simbridge_fulfillment::{
    Entitlement, FailureReason, FulfillmentEvent, FulfillmentState, GUEST_USER_ID, PlacedOrder,
};

use super::{
    BeginOutcome, CatalogStore, FulfillmentLedger, IdentityStore, PublishedSnapshot, StoreError, SyncRunStore,
};
use crate::sync::run::SyncRun;

const MIGRATION: &str = include_str!("../../migrations/0001_init.sql");

/// All stores over one connection pool.
#[derive(Debug, Clone)]
pub struct PostgresStores {
    pool: PgPool,
}

impl PostgresStores {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the schema. Safe to run on every start.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(MIGRATION)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn tx(&self, operation: &str) -> Result<sqlx::Transaction<'static, sqlx::Postgres>, StoreError> {
        self.pool.begin().await.map_err(|e| map_sqlx_error(operation, e))
    }

    /// Load an event under a row lock, check ownership, apply `change`, write back.
    async fn transition<F>(
        &self,
        operation: &'static str,
        event_id: &EventId,
        attempt: u32,
        change: F,
    ) -> Result<(), StoreError>
    where
        F: FnOnce(&mut FulfillmentEvent) -> DomainResult<()> + Send,
    {
        let mut tx = self.tx(operation).await?;
        let mut event = lock_event(&mut tx, operation, event_id).await?;
        ensure_owner(&event, attempt)?;
        change(&mut event).map_err(|e| StoreError::Conflict(e.to_string()))?;
        write_event(&mut tx, operation, &event).await?;
        tx.commit().await.map_err(|e| map_sqlx_error(operation, e))
    }
}

fn to_payload<T: Serialize>(value: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Storage(format!("failed to encode row: {e}")))
}

fn from_row<T: DeserializeOwned>(row: &PgRow) -> Result<T, StoreError> {
    let payload: serde_json::Value = row
        .try_get("payload")
        .map_err(|e| StoreError::Storage(format!("failed to read payload: {e}")))?;
    serde_json::from_value(payload).map_err(|e| StoreError::Storage(format!("failed to decode row: {e}")))
}

fn from_rows<T: DeserializeOwned>(rows: &[PgRow]) -> Result<Vec<T>, StoreError> {
    rows.iter().map(from_row).collect()
}

fn ensure_owner(event: &FulfillmentEvent, attempt: u32) -> Result<(), StoreError> {
    if event.state != FulfillmentState::Processing || event.attempts != attempt {
        return Err(StoreError::Conflict(format!(
            "event {} is not owned by attempt {attempt}",
            event.event_id
        )));
    }
    Ok(())
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

async fn lock_event(
    conn: &mut PgConnection,
    operation: &str,
    event_id: &EventId,
) -> Result<FulfillmentEvent, StoreError> {
    let row = sqlx::query("SELECT payload FROM fulfillment_events WHERE event_id = $1 FOR UPDATE")
        .bind(event_id.as_str())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?
        .ok_or_else(|| StoreError::NotFound(format!("event {event_id}")))?;
    from_row(&row)
}

async fn write_event(conn: &mut PgConnection, operation: &str, event: &FulfillmentEvent) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE fulfillment_events
        SET status = $2, attempts = $3, lease_until = $4, payload = $5, updated_at = $6
        WHERE event_id = $1
        "#,
    )
    .bind(event.event_id.as_str())
    .bind(event.state.as_str())
    .bind(event.attempts as i32)
    .bind(event.lease_until)
    .bind(to_payload(event)?)
    .bind(event.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error(operation, e))?;
    Ok(())
}

#[async_trait]
impl CatalogStore for PostgresStores {
    #[instrument(skip(self), err)]
    async fn current_generation(&self) -> Result<Option<Generation>, StoreError> {
        let row = sqlx::query("SELECT generation FROM catalog_generations WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("current_generation", e))?;
        row.map(|r| {
            r.try_get::<i64, _>("generation")
                .map(|g| Generation(g as u64))
                .map_err(|e| map_sqlx_error("current_generation", e))
        })
        .transpose()
    }

    #[instrument(skip(self, packages), fields(generation = %generation, packages = packages.len()), err)]
    async fn publish_snapshot(
        &self,
        generation: Generation,
        packages: &[ProviderPackage],
    ) -> Result<PublishedSnapshot, StoreError> {
        let op = "publish_snapshot";
        let mut tx = self.tx(op).await?;

        // Promote first: the conditional upsert doubles as the lock that
        // serializes concurrent publishers.
        let promoted = sqlx::query(
            r#"
            INSERT INTO catalog_generations (id, generation, promoted_at)
            VALUES (1, $1, $2)
            ON CONFLICT (id) DO UPDATE
            SET generation = EXCLUDED.generation, promoted_at = EXCLUDED.promoted_at
            WHERE catalog_generations.generation < EXCLUDED.generation
            RETURNING (SELECT generation FROM catalog_generations WHERE id = 1) AS previous
            "#,
        )
        .bind(generation.0 as i64)
        .bind(Utc::now())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(op, e))?;

        let Some(promoted) = promoted else {
            return Err(StoreError::Conflict(format!(
                "generation {generation} is not newer than the live snapshot"
            )));
        };
        let previous: Option<i64> = promoted.try_get("previous").map_err(|e| map_sqlx_error(op, e))?;

        let ids: Vec<String> = packages.iter().map(|p| p.provider_id.as_str().to_string()).collect();
        let retired = match previous {
            Some(prev) => {
                let row = sqlx::query(
                    "SELECT COUNT(*) AS n FROM provider_packages WHERE generation = $1 AND NOT (provider_id = ANY($2))",
                )
                .bind(prev)
                .bind(&ids)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error(op, e))?;
                row.try_get::<i64, _>("n").map_err(|e| map_sqlx_error(op, e))? as usize
            }
            None => 0,
        };

        for package in packages {
            let mut stored = package.clone();
            stored.generation = generation;
            sqlx::query(
                r#"
                INSERT INTO provider_packages (provider_id, canonical_id, country_code, generation, payload, synced_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (provider_id) DO UPDATE
                SET canonical_id = EXCLUDED.canonical_id,
                    country_code = EXCLUDED.country_code,
                    generation = EXCLUDED.generation,
                    payload = EXCLUDED.payload,
                    synced_at = EXCLUDED.synced_at
                "#,
            )
            .bind(stored.provider_id.as_str())
            .bind(stored.canonical_id.as_str())
            .bind(&stored.country_code)
            .bind(generation.0 as i64)
            .bind(to_payload(&stored)?)
            .bind(stored.synced_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(op, e))?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error(op, e))?;
        Ok(PublishedSnapshot {
            generation,
            upserted: packages.len(),
            retired,
        })
    }

    #[instrument(skip(self), err)]
    async fn live_packages(&self) -> Result<Vec<ProviderPackage>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT p.payload
            FROM provider_packages p
            JOIN catalog_generations g ON g.id = 1 AND p.generation = g.generation
            ORDER BY p.provider_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("live_packages", e))?;
        from_rows(&rows)
    }

    #[instrument(skip(self), fields(provider_id = %provider_id), err)]
    async fn live_package(&self, provider_id: &ProviderId) -> Result<Option<ProviderPackage>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT p.payload
            FROM provider_packages p
            JOIN catalog_generations g ON g.id = 1 AND p.generation = g.generation
            WHERE p.provider_id = $1
            "#,
        )
        .bind(provider_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("live_package", e))?;
        row.as_ref().map(from_row).transpose()
    }

    #[instrument(skip(self, offer), fields(offer_id = %offer.id), err)]
    async fn insert_offer(&self, offer: &ResaleOffer) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO resale_offers (id, country_code, visible, payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(offer.id.as_uuid())
        .bind(&offer.country_code)
        .bind(offer.visible)
        .bind(to_payload(offer)?)
        .bind(offer.created_at)
        .bind(offer.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_offer", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(offer_id = %id), err)]
    async fn get_offer(&self, id: OfferId) -> Result<Option<ResaleOffer>, StoreError> {
        let row = sqlx::query("SELECT payload FROM resale_offers WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_offer", e))?;
        row.as_ref().map(from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_offers(&self) -> Result<Vec<ResaleOffer>, StoreError> {
        let rows = sqlx::query("SELECT payload FROM resale_offers ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_offers", e))?;
        from_rows(&rows)
    }

    #[instrument(skip(self, expected, next), fields(offer_id = %id, status = next.status.as_str()), err)]
    async fn update_offer_mapping(
        &self,
        id: OfferId,
        expected: &OfferMapping,
        next: &OfferMapping,
    ) -> Result<(), StoreError> {
        let op = "update_offer_mapping";
        let mut tx = self.tx(op).await?;
        let row = sqlx::query("SELECT payload FROM resale_offers WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(op, e))?
            .ok_or_else(|| StoreError::NotFound(format!("offer {id}")))?;
        let mut offer: ResaleOffer = from_row(&row)?;
        if &offer.mapping != expected {
            return Err(StoreError::Conflict(format!("offer {id} mapping changed concurrently")));
        }
        offer.mapping = next.clone();
        offer.updated_at = Utc::now();
        sqlx::query("UPDATE resale_offers SET payload = $2, updated_at = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(to_payload(&offer)?)
            .bind(offer.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(op, e))?;
        tx.commit().await.map_err(|e| map_sqlx_error(op, e))
    }

    #[instrument(skip(self, offer, expected_updated_at), fields(offer_id = %offer.id), err)]
    async fn save_offer(&self, offer: &ResaleOffer, expected_updated_at: DateTime<Utc>) -> Result<(), StoreError> {
        let op = "save_offer";
        let mut tx = self.tx(op).await?;
        let row = sqlx::query("SELECT payload FROM resale_offers WHERE id = $1 FOR UPDATE")
            .bind(offer.id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(op, e))?
            .ok_or_else(|| StoreError::NotFound(format!("offer {}", offer.id)))?;
        // Compared on the payload copy, which keeps full timestamp precision.
        let stored: ResaleOffer = from_row(&row)?;
        if stored.updated_at != expected_updated_at {
            return Err(StoreError::Conflict(format!("offer {} changed concurrently", offer.id)));
        }
        sqlx::query(
            "UPDATE resale_offers SET country_code = $2, visible = $3, payload = $4, updated_at = $5 WHERE id = $1",
        )
        .bind(offer.id.as_uuid())
        .bind(&offer.country_code)
        .bind(offer.visible)
        .bind(to_payload(offer)?)
        .bind(offer.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(op, e))?;
        tx.commit().await.map_err(|e| map_sqlx_error(op, e))
    }
}

#[async_trait]
impl FulfillmentLedger for PostgresStores {
    #[instrument(skip(self, event), fields(event_id = %event.event_id), err)]
    async fn begin(&self, event: &FulfillmentEvent) -> Result<BeginOutcome, StoreError> {
        let op = "ledger_begin";
        let inserted = sqlx::query(
            r#"
            INSERT INTO fulfillment_events (event_id, offer_id, status, attempts, lease_until, payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event.event_id.as_str())
        .bind(event.offer_id.as_uuid())
        .bind(event.state.as_str())
        .bind(event.attempts as i32)
        .bind(event.lease_until)
        .bind(to_payload(event)?)
        .bind(event.created_at)
        .bind(event.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(op, e))?;

        if inserted.rows_affected() == 1 {
            return Ok(BeginOutcome::Started(event.clone()));
        }
        let existing = self
            .get_event(&event.event_id)
            .await?
            .ok_or_else(|| StoreError::Storage(format!("event {} vanished after conflict", event.event_id)))?;
        Ok(BeginOutcome::Duplicate(existing))
    }

    #[instrument(skip(self, lease), fields(event_id = %event_id), err)]
    async fn reclaim(
        &self,
        event_id: &EventId,
        expected_attempts: u32,
        lease: Duration,
    ) -> Result<Option<FulfillmentEvent>, StoreError> {
        let op = "ledger_reclaim";
        let mut tx = self.tx(op).await?;
        let mut event = lock_event(&mut tx, op, event_id).await?;
        if event.reclaim(expected_attempts, Utc::now(), chrono_duration(lease)).is_err() {
            return Ok(None);
        }
        write_event(&mut tx, op, &event).await?;
        tx.commit().await.map_err(|e| map_sqlx_error(op, e))?;
        Ok(Some(event))
    }

    #[instrument(skip(self, placed), fields(event_id = %event_id, order_id = %placed.order.order_id), err)]
    async fn record_order(&self, event_id: &EventId, attempt: u32, placed: &PlacedOrder) -> Result<(), StoreError> {
        let placed = placed.clone();
        self.transition("ledger_record_order", event_id, attempt, move |e| {
            e.record_order(placed, Utc::now())
        })
        .await
    }

    #[instrument(skip(self), fields(event_id = %event_id), err)]
    async fn release(&self, event_id: &EventId, attempt: u32, error: &str) -> Result<(), StoreError> {
        let error = error.to_string();
        self.transition("ledger_release", event_id, attempt, move |e| e.release(error, Utc::now()))
            .await
    }

    #[instrument(skip(self, entitlement), fields(event_id = %event_id), err)]
    async fn complete(&self, event_id: &EventId, attempt: u32, entitlement: &Entitlement) -> Result<(), StoreError> {
        let op = "ledger_complete";
        let mut tx = self.tx(op).await?;
        let mut event = lock_event(&mut tx, op, event_id).await?;
        ensure_owner(&event, attempt)?;
        event
            .complete(Utc::now())
            .map_err(|e| StoreError::Conflict(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO entitlements (id, event_id, offer_id, user_id, payload, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entitlement.id.as_uuid())
        .bind(entitlement.event_id.as_str())
        .bind(entitlement.offer_id.as_uuid())
        .bind(entitlement.user_id.as_uuid())
        .bind(to_payload(entitlement)?)
        .bind(entitlement.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(op, e))?;

        write_event(&mut tx, op, &event).await?;
        tx.commit().await.map_err(|e| map_sqlx_error(op, e))
    }

    #[instrument(skip(self, reason), fields(event_id = %event_id, code = reason.code()), err)]
    async fn fail(&self, event_id: &EventId, attempt: u32, reason: &FailureReason) -> Result<(), StoreError> {
        let reason = reason.clone();
        self.transition("ledger_fail", event_id, attempt, move |e| e.fail(reason, Utc::now()))
            .await
    }

    #[instrument(skip(self), fields(event_id = %event_id), err)]
    async fn get_event(&self, event_id: &EventId) -> Result<Option<FulfillmentEvent>, StoreError> {
        let row = sqlx::query("SELECT payload FROM fulfillment_events WHERE event_id = $1")
            .bind(event_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_event", e))?;
        row.as_ref().map(from_row).transpose()
    }

    #[instrument(skip(self), fields(event_id = %event_id), err)]
    async fn entitlement_for(&self, event_id: &EventId) -> Result<Option<Entitlement>, StoreError> {
        let row = sqlx::query("SELECT payload FROM entitlements WHERE event_id = $1")
            .bind(event_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("entitlement_for", e))?;
        row.as_ref().map(from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_entitlements(&self) -> Result<Vec<Entitlement>, StoreError> {
        let rows = sqlx::query("SELECT payload FROM entitlements ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_entitlements", e))?;
        from_rows(&rows)
    }
}

#[async_trait]
impl SyncRunStore for PostgresStores {
    #[instrument(skip(self, run), fields(run_id = %run.id, kind = run.kind.as_str()), err)]
    async fn begin_run(&self, run: &SyncRun, stale_after: Duration) -> Result<(), StoreError> {
        let op = "begin_run";
        let mut tx = self.tx(op).await?;

        let running = sqlx::query("SELECT payload FROM sync_runs WHERE status = 'running' FOR UPDATE")
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(op, e))?;
        if let Some(row) = running {
            let mut existing: SyncRun = from_row(&row)?;
            let cutoff = Utc::now()
                .checked_sub_signed(chrono_duration(stale_after))
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            if existing.started_at >= cutoff {
                return Err(StoreError::AlreadyRunning(existing.id.to_string()));
            }
            existing.mark_failed("abandoned: exceeded the maximum run time");
            write_run(&mut tx, op, &existing).await?;
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO sync_runs (id, kind, status, payload, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(run.id.as_uuid())
        .bind(run.kind.as_str())
        .bind(run.status.as_str())
        .bind(to_payload(run)?)
        .bind(run.started_at)
        .bind(run.finished_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => tx.commit().await.map_err(|e| map_sqlx_error(op, e)),
            // Lost the race for the partial unique index.
            Err(e) if is_unique_violation(&e) => Err(StoreError::AlreadyRunning("concurrent run".to_string())),
            Err(e) => Err(map_sqlx_error(op, e)),
        }
    }

    #[instrument(skip(self, run), fields(run_id = %run.id, status = run.status.as_str()), err)]
    async fn finish_run(&self, run: &SyncRun) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await.map_err(|e| map_sqlx_error("finish_run", e))?;
        write_run(&mut conn, "finish_run", run).await
    }

    #[instrument(skip(self), fields(run_id = %id), err)]
    async fn get_run(&self, id: SyncRunId) -> Result<Option<SyncRun>, StoreError> {
        let row = sqlx::query("SELECT payload FROM sync_runs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_run", e))?;
        row.as_ref().map(from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_runs(&self, limit: usize) -> Result<Vec<SyncRun>, StoreError> {
        let rows = sqlx::query("SELECT payload FROM sync_runs ORDER BY started_at DESC LIMIT $1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_runs", e))?;
        from_rows(&rows)
    }
}

async fn write_run(conn: &mut PgConnection, operation: &str, run: &SyncRun) -> Result<(), StoreError> {
    let result = sqlx::query("UPDATE sync_runs SET status = $2, payload = $3, finished_at = $4 WHERE id = $1")
        .bind(run.id.as_uuid())
        .bind(run.status.as_str())
        .bind(to_payload(run)?)
        .bind(run.finished_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("sync run {}", run.id)));
    }
    Ok(())
}

#[async_trait]
impl IdentityStore for PostgresStores {
    #[instrument(skip(self), err)]
    async fn ensure_guest(&self) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO users (id, display_name) VALUES ($1, 'guest') ON CONFLICT (id) DO NOTHING")
            .bind(GUEST_USER_ID.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_guest", e))?;
        Ok(())
    }
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Storage(format!("connection pool closed in {operation}")),
        _ => StoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}
