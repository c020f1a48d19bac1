//! Resale offers: what we sell, derived from exactly one provider package.
//!
//! An offer owns its price; the provider package only supplies cost and
//! attributes. The link between the two is an [`OfferMapping`]:
//!
//! - `pending`: never reconciled, or reset after an audit corrected the volume
//! - `resolved`: points at a live package with the same country, validity
//!   and volume
//! - `unresolved`: nothing matched; the reason is kept for operators
//!
//! Only an offer with a resolved mapping may be fulfilled; visibility only
//! controls listing. The mapping is rewritten by reconciliation and audit,
//! never by pricing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use simbridge_core::{DomainError, DomainResult, Money, OfferId, ProviderId};

use crate::canonical::CanonicalId;
use crate::package::ProviderPackage;
use crate::reconcile::MatchKey;
use crate::units::{DataVolume, Validity, format_volume};

/// Where an offer stands with respect to the provider catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MappingStatus {
    /// Never reconciled (or reset after a volume correction).
    Pending,
    Resolved,
    /// No package matched; excluded from fulfillment until an operator acts.
    Unresolved { reason: String },
}

impl MappingStatus {
    pub fn unresolved(reason: impl Into<String>) -> Self {
        Self::Unresolved {
            reason: reason.into(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Unresolved { .. } => "unresolved",
        }
    }
}

/// Link from an offer to the provider catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferMapping {
    pub canonical_id: Option<CanonicalId>,
    pub provider_id: Option<ProviderId>,
    #[serde(flatten)]
    pub status: MappingStatus,
}

impl OfferMapping {
    pub fn pending() -> Self {
        Self {
            canonical_id: None,
            provider_id: None,
            status: MappingStatus::Pending,
        }
    }

    pub fn resolved(canonical_id: CanonicalId, provider_id: ProviderId) -> Self {
        Self {
            canonical_id: Some(canonical_id),
            provider_id: Some(provider_id),
            status: MappingStatus::Resolved,
        }
    }
}

/// Internal sellable entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResaleOffer {
    pub id: OfferId,
    pub name: String,
    /// Upper-case ISO (or provider region) code.
    pub country_code: String,
    pub data_volume: DataVolume,
    pub validity: Validity,
    /// Wholesale cost at the time the offer was priced.
    pub cost_price: Option<Money>,
    pub sale_price: Money,
    /// Markup in basis points over `cost_price`.
    pub markup_bps: u32,
    pub visible: bool,
    pub mapping: OfferMapping,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResaleOffer {
    /// Price a provider package into a new visible offer.
    pub fn from_package(
        package: &ProviderPackage,
        markup_bps: u32,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let cost = package.price.ok_or_else(|| {
            DomainError::validation(format!(
                "package {} has no price and cannot be offered",
                package.provider_id
            ))
        })?;

        Ok(Self {
            id: OfferId::new(),
            name: display_name(&package.country_name, package.data_volume, package.validity),
            country_code: package.country_code.clone(),
            data_volume: package.data_volume,
            validity: package.validity,
            cost_price: Some(cost),
            sale_price: cost.with_markup_bps(markup_bps),
            markup_bps,
            visible: true,
            mapping: OfferMapping::resolved(package.canonical_id.clone(), package.provider_id.clone()),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn match_key(&self) -> MatchKey {
        MatchKey::new(&self.country_code, self.validity, self.data_volume)
    }

    /// Only resolved offers may be fulfilled.
    pub fn is_fulfillment_eligible(&self) -> bool {
        self.mapping.status == MappingStatus::Resolved
            && self.mapping.canonical_id.is_some()
            && self.mapping.provider_id.is_some()
    }
}

/// Display name in the form `"Germany 5GB 30 days"`.
pub fn display_name(country_name: &str, volume: DataVolume, validity: Validity) -> String {
    let country = title_case(country_name);
    format!("{} {} {}", country, format_volume(volume), validity)
}

fn title_case(raw: &str) -> String {
    raw.split(['-', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
