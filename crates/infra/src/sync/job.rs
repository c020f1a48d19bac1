use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use simbridge_catalog::reconcile::plan;
use simbridge_catalog::{Generation, IdentifierGenerator, MappingStatus, MappingUpdate, SnapshotIndex, normalize_feed};

use super::SyncError;
use super::run::{SyncKind, SyncRun, SyncStats};
use crate::incidents::{Incident, IncidentSink};
use crate::provider::ProviderApi;
use crate::store::{CatalogStore, StoreError, SyncRunStore};

/// Tunables of the sync job.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Concurrent offer repairs.
    pub concurrency: usize,
    /// A `running` record older than this is considered abandoned.
    pub stale_after: Duration,
    pub generator: IdentifierGenerator,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            stale_after: Duration::from_secs(60 * 60),
            generator: IdentifierGenerator::default(),
        }
    }
}

/// Externally triggered catalog sync.
///
/// At most one run executes at a time: in-process via `guard`, across
/// processes via the run store's `begin_run`.
pub struct CatalogSync {
    provider: Arc<dyn ProviderApi>,
    catalog: Arc<dyn CatalogStore>,
    runs: Arc<dyn SyncRunStore>,
    incidents: Arc<dyn IncidentSink>,
    options: SyncOptions,
    guard: Mutex<()>,
}

impl CatalogSync {
    pub fn new(
        provider: Arc<dyn ProviderApi>,
        catalog: Arc<dyn CatalogStore>,
        runs: Arc<dyn SyncRunStore>,
        incidents: Arc<dyn IncidentSink>,
        options: SyncOptions,
    ) -> Self {
        Self {
            provider,
            catalog,
            runs,
            incidents,
            options,
            guard: Mutex::new(()),
        }
    }

    /// Fetch the provider feed, publish it as a new generation, then
    /// reconcile every offer against it.
    pub async fn run(&self) -> Result<SyncRun, SyncError> {
        self.execute(SyncKind::CatalogSync).await
    }

    /// Reconcile offers against the current live snapshot only.
    pub async fn reconcile(&self) -> Result<SyncRun, SyncError> {
        self.execute(SyncKind::Reconcile).await
    }

    async fn execute(&self, kind: SyncKind) -> Result<SyncRun, SyncError> {
        let Ok(_guard) = self.guard.try_lock() else {
            return Err(SyncError::AlreadyRunning);
        };

        let mut run = SyncRun::start(kind);
        self.runs.begin_run(&run, self.options.stale_after).await?;
        info!(run_id = %run.id, kind = kind.as_str(), "sync run started");

        let outcome = match kind {
            SyncKind::CatalogSync => self.sync_catalog(&mut run).await,
            SyncKind::Reconcile => self.reconcile_live(&mut run).await,
        };

        match &outcome {
            Ok(()) => run.mark_completed(),
            Err(e) => {
                run.mark_failed(e.to_string());
                self.incidents.report(Incident::SyncFailed {
                    run_id: run.id,
                    error: e.to_string(),
                });
            }
        }
        if let Err(e) = self.runs.finish_run(&run).await {
            error!(run_id = %run.id, error = %e, "failed to record sync run result");
        }

        let stats = &run.stats;
        info!(
            run_id = %run.id,
            kind = kind.as_str(),
            status = run.status.as_str(),
            duration_ms = run.duration_ms().unwrap_or_default(),
            fetched = stats.fetched,
            normalized = stats.normalized,
            rejected = stats.rejected.len(),
            upserted = stats.upserted,
            retired = stats.retired,
            offers_checked = stats.offers_checked,
            offers_repaired = stats.offers_repaired,
            offers_unresolved = stats.offers_unresolved,
            offers_failed = stats.offers_failed,
            "sync run finished"
        );

        outcome.map(|()| run)
    }

    #[instrument(skip_all, fields(run_id = %run.id), err)]
    async fn sync_catalog(&self, run: &mut SyncRun) -> Result<(), SyncError> {
        let countries = self.provider.fetch_catalog().await?;

        let generation = self
            .catalog
            .current_generation()
            .await?
            .map_or(Generation(1), Generation::next);
        let feed = normalize_feed(countries, &self.options.generator, generation, Utc::now());

        run.stats.fetched = feed.fetched;
        run.stats.normalized = feed.packages.len();
        run.stats.duplicates = feed.duplicates;
        run.stats.rejected = feed.rejected;
        run.stats.needs_review = feed.needs_review;
        for id in &run.stats.needs_review {
            warn!(canonical_id = %id, "country code missing from the country table");
        }

        if feed.packages.is_empty() {
            return Err(SyncError::EmptyFeed {
                rejected: run.stats.rejected.len(),
            });
        }

        let published = self.catalog.publish_snapshot(generation, &feed.packages).await?;
        run.generation = Some(published.generation);
        run.stats.upserted = published.upserted;
        run.stats.retired = published.retired;

        let index = SnapshotIndex::build(feed.packages);
        self.repair_offers(&index, &mut run.stats).await
    }

    #[instrument(skip_all, fields(run_id = %run.id), err)]
    async fn reconcile_live(&self, run: &mut SyncRun) -> Result<(), SyncError> {
        let Some(generation) = self.catalog.current_generation().await? else {
            // Without any snapshot every offer would look orphaned.
            warn!("no catalog snapshot published yet; nothing to reconcile against");
            return Ok(());
        };
        run.generation = Some(generation);
        let index = SnapshotIndex::build(self.catalog.live_packages().await?);
        self.repair_offers(&index, &mut run.stats).await
    }

    /// Plan every offer's repair, then write them with bounded concurrency.
    /// A failed write is counted and logged; it does not stop the others.
    async fn repair_offers(&self, index: &SnapshotIndex, stats: &mut SyncStats) -> Result<(), SyncError> {
        let offers = self.catalog.list_offers().await?;
        stats.offers_checked = offers.len();
        let updates = plan(&offers, index);
        if updates.is_empty() {
            return Ok(());
        }

        let permits = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut tasks: JoinSet<(MappingUpdate, Result<(), StoreError>)> = JoinSet::new();
        for update in updates {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let catalog = Arc::clone(&self.catalog);
            tasks.spawn(async move {
                let result = catalog
                    .update_offer_mapping(update.offer_id, &update.previous, &update.next)
                    .await;
                drop(permit);
                (update, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((update, Ok(()))) => self.record_repair(&update, stats),
                Ok((update, Err(e))) => {
                    stats.offers_failed += 1;
                    warn!(offer_id = %update.offer_id, error = %e, "offer repair failed");
                }
                Err(e) => {
                    stats.offers_failed += 1;
                    error!(error = %e, "offer repair task panicked");
                }
            }
        }
        Ok(())
    }

    fn record_repair(&self, update: &MappingUpdate, stats: &mut SyncStats) {
        if let MappingStatus::Unresolved { reason } = &update.next.status {
            stats.offers_unresolved += 1;
            self.incidents.report(Incident::OfferUnresolved {
                offer_id: update.offer_id,
                reason: reason.clone(),
            });
        } else {
            stats.offers_repaired += 1;
            info!(
                offer_id = %update.offer_id,
                outcome = ?update.outcome,
                canonical_id = ?update.next.canonical_id,
                provider_id = ?update.next.provider_id,
                "offer mapping repaired"
            );
        }
    }
}
