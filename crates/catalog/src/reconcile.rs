//! Matching resale offers against the live provider snapshot.
//!
//! This module only plans: it decides, per offer, what the mapping should be
//! and returns nothing when the stored mapping is already right. Persisting
//! the updates (and fanning the work out) is the sync job's concern.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;

use simbridge_core::{OfferId, ProviderId};

use crate::canonical::CanonicalId;
use crate::offer::{MappingStatus, OfferMapping, ResaleOffer};
use crate::package::ProviderPackage;
use crate::units::{DataVolume, Validity, format_volume};

/// Composite lookup key. Several packages may share one key (capability
/// flags differ).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MatchKey {
    pub country_code: String,
    pub validity: Validity,
    pub data_volume: DataVolume,
}

impl MatchKey {
    pub fn new(country_code: &str, validity: Validity, data_volume: DataVolume) -> Self {
        Self {
            country_code: crate::country::normalize_country_code(country_code),
            validity,
            data_volume,
        }
    }
}

impl core::fmt::Display for MatchKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.country_code,
            self.validity,
            format_volume(self.data_volume)
        )
    }
}

/// Indexed view over the live package snapshot.
#[derive(Debug, Clone, Default)]
pub struct SnapshotIndex {
    packages: Vec<ProviderPackage>,
    by_provider: HashMap<ProviderId, usize>,
    by_canonical: HashMap<CanonicalId, Vec<usize>>,
    by_key: HashMap<MatchKey, Vec<usize>>,
}

impl SnapshotIndex {
    pub fn build(packages: Vec<ProviderPackage>) -> Self {
        let mut index = Self {
            by_provider: HashMap::with_capacity(packages.len()),
            ..Self::default()
        };
        for (i, package) in packages.iter().enumerate() {
            index.by_provider.entry(package.provider_id.clone()).or_insert(i);
            index
                .by_canonical
                .entry(package.canonical_id.clone())
                .or_default()
                .push(i);
            index.by_key.entry(package.match_key()).or_default().push(i);
        }
        index.packages = packages;
        index
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn packages(&self) -> &[ProviderPackage] {
        &self.packages
    }

    pub fn by_provider(&self, provider_id: &ProviderId) -> Option<&ProviderPackage> {
        self.by_provider.get(provider_id).map(|&i| &self.packages[i])
    }

    pub fn by_canonical(&self, canonical_id: &CanonicalId) -> impl Iterator<Item = &ProviderPackage> {
        self.by_canonical
            .get(canonical_id)
            .into_iter()
            .flatten()
            .map(|&i| &self.packages[i])
    }

    pub fn candidates(&self, key: &MatchKey) -> impl Iterator<Item = &ProviderPackage> {
        self.by_key
            .get(key)
            .into_iter()
            .flatten()
            .map(|&i| &self.packages[i])
    }

    /// Whether a canonical id still resolves to the given live package.
    pub fn resolves(&self, canonical_id: &CanonicalId, provider_id: &ProviderId) -> bool {
        self.by_provider(provider_id)
            .is_some_and(|p| &p.canonical_id == canonical_id)
    }
}

/// Deterministic preference between candidate packages: priced before
/// unpriced, then cheaper, then shorter validity, then provider id.
pub fn candidate_order(a: &ProviderPackage, b: &ProviderPackage) -> Ordering {
    a.price
        .is_none()
        .cmp(&b.price.is_none())
        .then_with(|| a.price.cmp(&b.price))
        .then_with(|| a.validity.sort_key().cmp(&b.validity.sort_key()))
        .then_with(|| a.provider_id.cmp(&b.provider_id))
}

/// Pick the preferred package among candidates.
pub fn best_candidate<'a>(candidates: impl IntoIterator<Item = &'a ProviderPackage>) -> Option<&'a ProviderPackage> {
    candidates.into_iter().min_by(|a, b| candidate_order(a, b))
}

/// How a repair was decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepairOutcome {
    /// The stored provider id is live and its attributes still match.
    ExactProvider,
    /// The stored canonical id is live (provider id was missing or stale).
    CanonicalId { candidates: usize },
    /// Matched by country, validity and volume.
    CompositeKey { candidates: usize },
    Unresolved,
}

/// A planned write of one offer's mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingUpdate {
    pub offer_id: OfferId,
    pub previous: OfferMapping,
    pub next: OfferMapping,
    pub outcome: RepairOutcome,
}

impl MappingUpdate {
    pub fn is_unresolved(&self) -> bool {
        matches!(self.next.status, MappingStatus::Unresolved { .. })
    }
}

/// Whether an offer's stored mapping is valid against the snapshot.
pub fn mapping_is_valid(offer: &ResaleOffer, index: &SnapshotIndex) -> bool {
    let mapping = &offer.mapping;
    if mapping.status != MappingStatus::Resolved {
        return false;
    }
    let (Some(canonical_id), Some(provider_id)) = (&mapping.canonical_id, &mapping.provider_id) else {
        return false;
    };
    index
        .by_provider(provider_id)
        .is_some_and(|p| &p.canonical_id == canonical_id && p.match_key() == offer.match_key())
}

/// Decide the mapping for one offer. `None` means nothing to write.
///
/// A package whose country, validity or volume differs from the offer is
/// never adopted, even if the offer used to point at it.
pub fn reconcile_offer(offer: &ResaleOffer, index: &SnapshotIndex) -> Option<MappingUpdate> {
    if mapping_is_valid(offer, index) {
        return None;
    }

    let key = offer.match_key();
    let matches_key = |p: &&ProviderPackage| p.match_key() == key;

    let exact = offer
        .mapping
        .provider_id
        .as_ref()
        .and_then(|id| index.by_provider(id))
        .filter(matches_key);

    let (next, outcome) = if let Some(package) = exact {
        (resolved(package), RepairOutcome::ExactProvider)
    } else if let Some((package, candidates)) = offer.mapping.canonical_id.as_ref().and_then(|cid| {
        let live: Vec<&ProviderPackage> = index.by_canonical(cid).filter(matches_key).collect();
        best_candidate(live.iter().copied()).map(|p| (p, live.len()))
    }) {
        (resolved(package), RepairOutcome::CanonicalId { candidates })
    } else {
        let candidates: Vec<&ProviderPackage> = index.candidates(&key).collect();
        match best_candidate(candidates.iter().copied()) {
            Some(package) => (
                resolved(package),
                RepairOutcome::CompositeKey {
                    candidates: candidates.len(),
                },
            ),
            None => (
                OfferMapping {
                    canonical_id: offer.mapping.canonical_id.clone(),
                    provider_id: offer.mapping.provider_id.clone(),
                    status: MappingStatus::unresolved(format!("no live provider package for {key}")),
                },
                RepairOutcome::Unresolved,
            ),
        }
    };

    if next == offer.mapping {
        return None;
    }

    Some(MappingUpdate {
        offer_id: offer.id,
        previous: offer.mapping.clone(),
        next,
        outcome,
    })
}

/// Plan repairs for a batch of offers.
pub fn plan(offers: &[ResaleOffer], index: &SnapshotIndex) -> Vec<MappingUpdate> {
    offers
        .iter()
        .filter_map(|offer| reconcile_offer(offer, index))
        .collect()
}

fn resolved(package: &ProviderPackage) -> OfferMapping {
    OfferMapping::resolved(package.canonical_id.clone(), package.provider_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{CapabilityClass, generate};
    use crate::package::{Capabilities, Generation};
    use chrono::Utc;
    use simbridge_core::Money;

    fn package(id: &str, country: &str, days: u32, gb: u64, price: Option<u64>) -> ProviderPackage {
        let validity = Validity::Days(days);
        let volume = DataVolume::from_gigabytes(gb);
        ProviderPackage {
            provider_id: ProviderId::parse(id).unwrap(),
            canonical_id: generate(country, validity, volume, &CapabilityClass::all()).unwrap().id,
            name: id.to_string(),
            country_code: country.to_string(),
            country_name: country.to_ascii_lowercase(),
            region: None,
            data_volume: volume,
            validity,
            price: price.map(Money::from_minor),
            capabilities: Capabilities::default(),
            capability_class: CapabilityClass::all(),
            generation: Generation(1),
            synced_at: Utc::now(),
        }
    }

    fn offer(country: &str, days: u32, gb: u64) -> ResaleOffer {
        let now = Utc::now();
        ResaleOffer {
            id: OfferId::new(),
            name: format!("{country} {gb}GB"),
            country_code: country.to_string(),
            data_volume: DataVolume::from_gigabytes(gb),
            validity: Validity::Days(days),
            cost_price: None,
            sale_price: Money::from_minor(1500),
            markup_bps: 2500,
            visible: true,
            mapping: OfferMapping::pending(),
            created_at: now,
            updated_at: now,
        }
    }

    fn apply(offer: &mut ResaleOffer, update: &MappingUpdate) {
        offer.mapping = update.next.clone();
    }

    #[test]
    fn cheapest_candidate_wins() {
        let index = SnapshotIndex::build(vec![
            package("de-premium", "DE", 30, 5, Some(1299)),
            package("de-basic", "DE", 30, 5, Some(999)),
        ]);
        let update = reconcile_offer(&offer("DE", 30, 5), &index).unwrap();
        assert_eq!(update.next.provider_id.as_ref().unwrap().as_str(), "de-basic");
        assert_eq!(update.outcome, RepairOutcome::CompositeKey { candidates: 2 });
        assert_eq!(update.next.canonical_id.unwrap().as_str(), "esim-de-30days-5gb-all");
    }

    #[test]
    fn priced_beats_unpriced_and_ids_break_ties() {
        let unpriced = package("a-unpriced", "DE", 30, 5, None);
        let b = package("b", "DE", 30, 5, Some(999));
        let c = package("c", "DE", 30, 5, Some(999));
        assert_eq!(best_candidate([&unpriced, &c, &b]).unwrap().provider_id.as_str(), "b");
    }

    #[test]
    fn zero_matches_flags_unresolved_without_other_country_fallback() {
        let index = SnapshotIndex::build(vec![package("fr", "FR", 30, 5, Some(500))]);
        let update = reconcile_offer(&offer("DE", 30, 5), &index).unwrap();
        assert!(update.is_unresolved());
        assert_eq!(update.next.provider_id, None);
        assert_eq!(update.outcome, RepairOutcome::Unresolved);
    }

    #[test]
    fn stored_provider_id_is_preferred_when_attributes_match() {
        let index = SnapshotIndex::build(vec![
            package("cheap", "DE", 30, 5, Some(100)),
            package("chosen", "DE", 30, 5, Some(999)),
        ]);
        let mut o = offer("DE", 30, 5);
        o.mapping.provider_id = Some(ProviderId::parse("chosen").unwrap());
        let update = reconcile_offer(&o, &index).unwrap();
        assert_eq!(update.outcome, RepairOutcome::ExactProvider);
        assert_eq!(update.next.provider_id.unwrap().as_str(), "chosen");
    }

    #[test]
    fn stored_provider_of_another_country_is_not_adopted() {
        let index = SnapshotIndex::build(vec![package("shared-id", "FR", 30, 5, Some(100))]);
        let mut o = offer("DE", 30, 5);
        o.mapping.provider_id = Some(ProviderId::parse("shared-id").unwrap());
        let update = reconcile_offer(&o, &index).unwrap();
        assert!(update.is_unresolved());
    }

    #[test]
    fn stale_canonical_id_is_repaired() {
        let index = SnapshotIndex::build(vec![package("de-5", "DE", 30, 5, Some(999))]);
        let mut o = offer("DE", 30, 5);
        o.mapping = OfferMapping::resolved(
            CanonicalId::parse("esim-germany-30days-5gb-all").unwrap(),
            ProviderId::parse("gone").unwrap(),
        );
        let update = reconcile_offer(&o, &index).unwrap();
        assert_eq!(update.next.canonical_id.unwrap().as_str(), "esim-de-30days-5gb-all");
        assert_eq!(update.next.status, MappingStatus::Resolved);
    }

    #[test]
    fn second_pass_over_unchanged_snapshot_writes_nothing() {
        let index = SnapshotIndex::build(vec![
            package("de-5", "DE", 30, 5, Some(999)),
            package("it-1", "IT", 7, 1, Some(300)),
        ]);
        let mut offers = vec![offer("DE", 30, 5), offer("IT", 7, 1), offer("JP", 7, 1)];

        let first = plan(&offers, &index);
        assert_eq!(first.len(), 3);
        for update in &first {
            let o = offers.iter_mut().find(|o| o.id == update.offer_id).unwrap();
            apply(o, update);
        }

        assert!(plan(&offers, &index).is_empty());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_package() -> impl Strategy<Value = ProviderPackage> {
            (
                "[a-z]{1,6}",
                prop_oneof![Just("DE"), Just("FR"), Just("EU")],
                prop_oneof![Just(7u32), Just(30u32)],
                1u64..4,
                prop::option::of(100u64..2000),
            )
                .prop_map(|(id, country, days, gb, price)| package(&id, country, days, gb, price))
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 300,
                ..ProptestConfig::default()
            })]

            /// Property: applying a plan and re-planning yields no writes.
            #[test]
            fn reconcile_is_idempotent(
                packages in prop::collection::vec(arb_package(), 0..12),
                keys in prop::collection::vec(
                    (prop_oneof![Just("DE"), Just("FR"), Just("JP")], prop_oneof![Just(7u32), Just(30u32)], 1u64..4),
                    0..12,
                ),
            ) {
                let index = SnapshotIndex::build(packages);
                let mut offers: Vec<ResaleOffer> =
                    keys.into_iter().map(|(c, d, g)| offer(c, d, g)).collect();

                for update in plan(&offers, &index) {
                    let o = offers.iter_mut().find(|o| o.id == update.offer_id).unwrap();
                    apply(o, &update);
                }
                prop_assert!(plan(&offers, &index).is_empty());
            }

            /// Property: the chosen package does not depend on snapshot order.
            #[test]
            fn tie_break_ignores_input_order(
                mut packages in prop::collection::vec(arb_package(), 1..10),
            ) {
                let forward = best_candidate(packages.iter()).map(|p| p.provider_id.clone());
                packages.reverse();
                let backward = best_candidate(packages.iter()).map(|p| p.provider_id.clone());
                prop_assert_eq!(forward, backward);
            }
        }
    }
}
