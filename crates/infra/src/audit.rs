//! Integrity audit runner: load, analyze, apply the enabled fixes.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use simbridge_catalog::{AuditFixes, AuditInput, AuditPolicy, AuditReport, OfferFix, SnapshotIndex, audit};
use simbridge_core::OfferId;

use crate::incidents::{Incident, IncidentSink};
use crate::store::{CatalogStore, FulfillmentLedger, StoreError};

/// Report plus what happened to the planned fixes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRun {
    pub report: AuditReport,
    /// Offers whose fixes were written.
    pub fixed: Vec<OfferId>,
    /// Offers whose fix could not be written.
    pub fix_failures: Vec<OfferId>,
    /// Offers changed by someone else after they were read; left alone so
    /// the next audit judges the new state.
    pub skipped: Vec<OfferId>,
}

pub struct AuditRunner {
    catalog: Arc<dyn CatalogStore>,
    ledger: Arc<dyn FulfillmentLedger>,
    incidents: Arc<dyn IncidentSink>,
    policy: AuditPolicy,
}

impl AuditRunner {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        ledger: Arc<dyn FulfillmentLedger>,
        incidents: Arc<dyn IncidentSink>,
        policy: AuditPolicy,
    ) -> Self {
        Self {
            catalog,
            ledger,
            incidents,
            policy,
        }
    }

    /// Audit the current state. Fixes never change prices or delete rows;
    /// running again after a fix plans nothing new.
    #[instrument(skip(self), err)]
    pub async fn run(&self, fixes: AuditFixes) -> Result<AuditRun, StoreError> {
        let snapshot = SnapshotIndex::build(self.catalog.live_packages().await?);
        let offers = self.catalog.list_offers().await?;
        let entitlements: Vec<_> = self
            .ledger
            .list_entitlements()
            .await?
            .iter()
            .map(|e| e.to_ref())
            .collect();

        let now = Utc::now();
        let report = audit(
            AuditInput {
                snapshot: &snapshot,
                offers: &offers,
                entitlements: &entitlements,
            },
            &self.policy,
            fixes,
            now,
        );

        for incident in &report.incidents {
            self.incidents.report(Incident::Entitlement(incident.clone()));
        }

        // Several fixes can target one offer; apply them together, write once.
        let mut by_offer: BTreeMap<OfferId, Vec<&OfferFix>> = BTreeMap::new();
        for fix in &report.fixes {
            by_offer.entry(fix.offer_id()).or_default().push(fix);
        }

        let mut fixed = Vec::new();
        let mut fix_failures = Vec::new();
        let mut skipped = Vec::new();
        for (offer_id, planned) in by_offer {
            let Some(mut offer) = offers.iter().find(|o| o.id == offer_id).cloned() else {
                continue;
            };
            let read_at = offer.updated_at;
            for fix in planned {
                fix.apply(&mut offer, now);
            }
            match self.catalog.save_offer(&offer, read_at).await {
                Ok(()) => fixed.push(offer_id),
                Err(StoreError::Conflict(detail)) => {
                    warn!(offer_id = %offer_id, detail = %detail, "offer changed during audit; fix skipped");
                    skipped.push(offer_id);
                }
                Err(e) => {
                    warn!(offer_id = %offer_id, error = %e, "failed to apply audit fix");
                    fix_failures.push(offer_id);
                }
            }
        }

        let counts = &report.counts;
        info!(
            offers = counts.offers,
            orphans = counts.orphans,
            duplicate_offers = counts.duplicate_offers,
            implausible_volumes = counts.implausible_volumes,
            country_mismatches = counts.country_mismatches,
            drift = counts.drift,
            incidents = counts.incidents,
            fixed = fixed.len(),
            fix_failures = fix_failures.len(),
            skipped = skipped.len(),
            "catalog audit finished"
        );

        Ok(AuditRun {
            report,
            fixed,
            fix_failures,
            skipped,
        })
    }
}
