//! Integrity checks across resale offers, the live provider snapshot and
//! fulfilled entitlements.
//!
//! [`audit`] is a pure analysis that returns a report plus the fixes the
//! enabled toggles would apply. Fixes only touch visibility, mapping status
//! and recognizably corrupted volumes; prices are never changed and nothing
//! is deleted.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use simbridge_core::{EntitlementId, EventId, Money, OfferId, ProviderId};

use crate::canonical::CanonicalId;
use crate::offer::{MappingStatus, OfferMapping, ResaleOffer};
use crate::reconcile::SnapshotIndex;
use crate::units::{DataVolume, Validity, format_volume};

/// Stored gigabyte values that are known results of converting MB to GB
/// twice (or not at all), with the volume they should have been.
const DOUBLE_CONVERSION: &[(u64, u64)] = &[
    (1024, 1),
    (2048, 2),
    (3072, 3),
    (5120, 5),
    (10240, 10),
    (15360, 15),
    (20480, 20),
    (25600, 25),
    (30720, 30),
    (51200, 50),
];

static NAME_VOLUME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(gb|mb)\b").expect("static regex"));

/// Thresholds for heuristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditPolicy {
    /// Capped volumes above this many gigabytes are implausible.
    pub implausible_gb: u64,
}

impl Default for AuditPolicy {
    fn default() -> Self {
        Self { implausible_gb: 100 }
    }
}

/// Independently toggleable repairs. All off by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditFixes {
    pub correct_volumes: bool,
    pub hide_orphans: bool,
    pub hide_duplicates: bool,
}

/// Minimal view of a persisted entitlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementRef {
    pub entitlement_id: EntitlementId,
    pub event_id: EventId,
    pub offer_id: OfferId,
    pub canonical_id: CanonicalId,
    pub created_at: DateTime<Utc>,
}

/// Everything the auditor looks at.
#[derive(Debug, Clone, Copy)]
pub struct AuditInput<'a> {
    pub snapshot: &'a SnapshotIndex,
    pub offers: &'a [ResaleOffer],
    pub entitlements: &'a [EntitlementRef],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrphanedOffer {
    pub offer_id: OfferId,
    pub name: String,
    pub country_code: String,
    pub provider_id: Option<ProviderId>,
    pub canonical_id: Option<CanonicalId>,
    pub visible: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateGroup {
    pub country_code: String,
    pub data_volume: DataVolume,
    pub validity: Validity,
    pub sale_price: Money,
    /// Oldest offer of the group.
    pub kept: OfferId,
    pub duplicates: Vec<OfferId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionBasis {
    KnownPattern,
    NameField,
    PatternAndName,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImplausibleVolume {
    pub offer_id: OfferId,
    pub name: String,
    pub stored_gb: f64,
    /// `Some` when the correction is unambiguous.
    pub correction: Option<DataVolume>,
    pub basis: Option<CorrectionBasis>,
    /// Why an operator needs to look at it when there is no correction.
    pub review_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryMismatch {
    pub offer_id: OfferId,
    pub provider_id: ProviderId,
    pub offer_country: String,
    pub package_country: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDrift {
    pub offer_id: OfferId,
    pub provider_id: ProviderId,
    pub field: &'static str,
    pub offer_value: String,
    pub package_value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    MissingOffer,
    MissingPackage,
}

/// A historical transaction whose catalog references are gone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitlementIncident {
    pub entitlement_id: EntitlementId,
    pub event_id: EventId,
    pub offer_id: OfferId,
    pub canonical_id: CanonicalId,
    pub kind: IncidentKind,
}

/// A planned repair of one offer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OfferFix {
    /// Replace the volume and send the offer back through reconciliation.
    CorrectVolume {
        offer_id: OfferId,
        from: DataVolume,
        to: DataVolume,
    },
    HideOrphan { offer_id: OfferId, reason: String },
    HideDuplicate { offer_id: OfferId, kept: OfferId },
}

impl OfferFix {
    pub fn offer_id(&self) -> OfferId {
        match self {
            OfferFix::CorrectVolume { offer_id, .. }
            | OfferFix::HideOrphan { offer_id, .. }
            | OfferFix::HideDuplicate { offer_id, .. } => *offer_id,
        }
    }

    /// Apply to an offer in place.
    pub fn apply(&self, offer: &mut ResaleOffer, now: DateTime<Utc>) {
        match self {
            OfferFix::CorrectVolume { to, .. } => {
                offer.data_volume = *to;
                offer.mapping = OfferMapping {
                    status: MappingStatus::Pending,
                    ..offer.mapping.clone()
                };
            }
            OfferFix::HideOrphan { reason, .. } => {
                offer.visible = false;
                offer.mapping.status = MappingStatus::unresolved(reason.clone());
            }
            OfferFix::HideDuplicate { .. } => {
                offer.visible = false;
            }
        }
        offer.updated_at = now;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditCounts {
    pub offers: usize,
    pub live_packages: usize,
    pub entitlements: usize,
    pub orphans: usize,
    pub duplicate_groups: usize,
    pub duplicate_offers: usize,
    pub implausible_volumes: usize,
    pub correctable_volumes: usize,
    pub country_mismatches: usize,
    pub drift: usize,
    pub incidents: usize,
}

/// Structured audit output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditReport {
    pub generated_at: DateTime<Utc>,
    pub counts: AuditCounts,
    pub orphans: Vec<OrphanedOffer>,
    pub duplicates: Vec<DuplicateGroup>,
    pub implausible_volumes: Vec<ImplausibleVolume>,
    pub country_mismatches: Vec<CountryMismatch>,
    pub drift: Vec<FieldDrift>,
    pub incidents: Vec<EntitlementIncident>,
    /// Fixes selected by the enabled toggles.
    pub fixes: Vec<OfferFix>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.orphans.is_empty()
            && self.duplicates.is_empty()
            && self.implausible_volumes.is_empty()
            && self.country_mismatches.is_empty()
            && self.incidents.is_empty()
    }
}

/// Run every check and plan the enabled fixes.
pub fn audit(input: AuditInput<'_>, policy: &AuditPolicy, fixes: AuditFixes, now: DateTime<Utc>) -> AuditReport {
    let orphans = find_orphans(input);
    let duplicates = find_duplicates(input.offers);
    let implausible_volumes: Vec<ImplausibleVolume> = input
        .offers
        .iter()
        .filter_map(|o| check_volume(o, policy))
        .collect();
    let (country_mismatches, drift) = find_mismatches(input);
    let incidents = find_incidents(input);

    let offers_by_id: HashMap<OfferId, &ResaleOffer> = input.offers.iter().map(|o| (o.id, o)).collect();
    let mut planned = Vec::new();

    if fixes.correct_volumes {
        for finding in &implausible_volumes {
            if let (Some(to), Some(offer)) = (finding.correction, offers_by_id.get(&finding.offer_id)) {
                if offer.data_volume != to {
                    planned.push(OfferFix::CorrectVolume {
                        offer_id: offer.id,
                        from: offer.data_volume,
                        to,
                    });
                }
            }
        }
    }

    if fixes.hide_orphans {
        for orphan in &orphans {
            let Some(offer) = offers_by_id.get(&orphan.offer_id) else { continue };
            let already = !offer.visible && matches!(offer.mapping.status, MappingStatus::Unresolved { .. });
            if !already {
                planned.push(OfferFix::HideOrphan {
                    offer_id: orphan.offer_id,
                    reason: orphan.reason.clone(),
                });
            }
        }
    }

    if fixes.hide_duplicates {
        for group in &duplicates {
            for id in &group.duplicates {
                if offers_by_id.get(id).is_some_and(|o| o.visible) {
                    planned.push(OfferFix::HideDuplicate {
                        offer_id: *id,
                        kept: group.kept,
                    });
                }
            }
        }
    }

    let counts = AuditCounts {
        offers: input.offers.len(),
        live_packages: input.snapshot.len(),
        entitlements: input.entitlements.len(),
        orphans: orphans.len(),
        duplicate_groups: duplicates.len(),
        duplicate_offers: duplicates.iter().map(|g| g.duplicates.len()).sum(),
        implausible_volumes: implausible_volumes.len(),
        correctable_volumes: implausible_volumes.iter().filter(|v| v.correction.is_some()).count(),
        country_mismatches: country_mismatches.len(),
        drift: drift.len(),
        incidents: incidents.len(),
    };

    AuditReport {
        generated_at: now,
        counts,
        orphans,
        duplicates,
        implausible_volumes,
        country_mismatches,
        drift,
        incidents,
        fixes: planned,
    }
}

fn find_orphans(input: AuditInput<'_>) -> Vec<OrphanedOffer> {
    input
        .offers
        .iter()
        .filter_map(|offer| {
            let mapping = &offer.mapping;
            let provider_live = mapping
                .provider_id
                .as_ref()
                .is_some_and(|id| input.snapshot.by_provider(id).is_some());
            let canonical_live = mapping
                .canonical_id
                .as_ref()
                .is_some_and(|cid| input.snapshot.by_canonical(cid).next().is_some());

            let reason = match (&mapping.status, mapping.provider_id.is_some() || mapping.canonical_id.is_some()) {
                (MappingStatus::Unresolved { reason }, _) if !provider_live => reason.clone(),
                (_, true) if !provider_live && !canonical_live => {
                    "referenced provider package is no longer live".to_string()
                }
                _ => return None,
            };

            Some(OrphanedOffer {
                offer_id: offer.id,
                name: offer.name.clone(),
                country_code: offer.country_code.clone(),
                provider_id: mapping.provider_id.clone(),
                canonical_id: mapping.canonical_id.clone(),
                visible: offer.visible,
                reason,
            })
        })
        .collect()
}

fn find_duplicates(offers: &[ResaleOffer]) -> Vec<DuplicateGroup> {
    // BTreeMap keeps report order stable across runs.
    let mut groups: BTreeMap<(String, u64, u64, Money), Vec<&ResaleOffer>> = BTreeMap::new();
    for offer in offers {
        let key = (
            offer.country_code.clone(),
            offer.data_volume.megabytes(),
            offer.validity.sort_key(),
            offer.sale_price,
        );
        groups.entry(key).or_default().push(offer);
    }

    groups
        .into_values()
        .filter(|group| group.len() > 1)
        .map(|mut group| {
            group.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
            let kept = group[0];
            DuplicateGroup {
                country_code: kept.country_code.clone(),
                data_volume: kept.data_volume,
                validity: kept.validity,
                sale_price: kept.sale_price,
                kept: kept.id,
                duplicates: group[1..].iter().map(|o| o.id).collect(),
            }
        })
        .collect()
}

/// Volume a display name encodes, if it encodes exactly one.
pub fn volume_from_name(name: &str) -> Option<DataVolume> {
    let lowered = name.to_ascii_lowercase();
    let mentions_unlimited = lowered.contains("unlimited");

    let mut found = BTreeSet::new();
    for caps in NAME_VOLUME.captures_iter(name) {
        let amount: f64 = caps[1].parse().ok()?;
        let megabytes = if caps[2].eq_ignore_ascii_case("gb") {
            amount * 1024.0
        } else {
            amount
        };
        found.insert(megabytes.round() as u64);
    }

    match (mentions_unlimited, found.len()) {
        (true, 0) => Some(DataVolume::Unlimited),
        (false, 1) => found.into_iter().next().filter(|mb| *mb > 0).map(DataVolume::from_megabytes),
        _ => None,
    }
}

fn check_volume(offer: &ResaleOffer, policy: &AuditPolicy) -> Option<ImplausibleVolume> {
    let DataVolume::Capped { megabytes } = offer.data_volume else {
        return None;
    };
    let threshold_mb = policy.implausible_gb.saturating_mul(1024);
    if megabytes <= threshold_mb {
        return None;
    }

    let plausible = |v: &DataVolume| v.megabytes() <= threshold_mb;
    let from_pattern = offer.data_volume.whole_gigabytes().and_then(|stored| {
        DOUBLE_CONVERSION
            .iter()
            .find(|(bad, _)| *bad == stored)
            .map(|(_, good)| DataVolume::from_gigabytes(*good))
    });
    let from_name = volume_from_name(&offer.name).filter(plausible);

    let (correction, basis, review_reason) = match (from_pattern, from_name) {
        (Some(p), Some(n)) if p == n => (Some(p), Some(CorrectionBasis::PatternAndName), None),
        (Some(p), Some(n)) => (
            None,
            None,
            Some(format!(
                "known pattern suggests {} but name suggests {}",
                format_volume(p),
                format_volume(n)
            )),
        ),
        (Some(p), None) => (Some(p), Some(CorrectionBasis::KnownPattern), None),
        (None, Some(n)) => (Some(n), Some(CorrectionBasis::NameField), None),
        (None, None) => (
            None,
            None,
            Some("no known conversion pattern and name does not state the volume".to_string()),
        ),
    };

    Some(ImplausibleVolume {
        offer_id: offer.id,
        name: offer.name.clone(),
        stored_gb: offer.data_volume.gigabytes(),
        correction,
        basis,
        review_reason,
    })
}

fn find_mismatches(input: AuditInput<'_>) -> (Vec<CountryMismatch>, Vec<FieldDrift>) {
    let mut mismatches = Vec::new();
    let mut drift = Vec::new();

    for offer in input.offers {
        let Some(provider_id) = &offer.mapping.provider_id else { continue };
        let Some(package) = input.snapshot.by_provider(provider_id) else { continue };

        if !package.country_code.eq_ignore_ascii_case(&offer.country_code) {
            mismatches.push(CountryMismatch {
                offer_id: offer.id,
                provider_id: provider_id.clone(),
                offer_country: offer.country_code.clone(),
                package_country: package.country_code.clone(),
            });
            continue;
        }

        if package.data_volume != offer.data_volume {
            drift.push(FieldDrift {
                offer_id: offer.id,
                provider_id: provider_id.clone(),
                field: "data_volume",
                offer_value: format_volume(offer.data_volume),
                package_value: format_volume(package.data_volume),
            });
        }
        if package.validity != offer.validity {
            drift.push(FieldDrift {
                offer_id: offer.id,
                provider_id: provider_id.clone(),
                field: "validity",
                offer_value: offer.validity.to_string(),
                package_value: package.validity.to_string(),
            });
        }
    }

    (mismatches, drift)
}

fn find_incidents(input: AuditInput<'_>) -> Vec<EntitlementIncident> {
    let offer_ids: BTreeSet<OfferId> = input.offers.iter().map(|o| o.id).collect();

    input
        .entitlements
        .iter()
        .filter_map(|e| {
            let kind = if !offer_ids.contains(&e.offer_id) {
                IncidentKind::MissingOffer
            } else if input.snapshot.by_canonical(&e.canonical_id).next().is_none() {
                IncidentKind::MissingPackage
            } else {
                return None;
            };
            Some(EntitlementIncident {
                entitlement_id: e.entitlement_id,
                event_id: e.event_id.clone(),
                offer_id: e.offer_id,
                canonical_id: e.canonical_id.clone(),
                kind,
            })
        })
        .collect()
}
