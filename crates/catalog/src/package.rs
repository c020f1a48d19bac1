//! Provider packages: the mirrored external catalog.
//!
//! Packages are keyed by the provider's own `provider_id` and carry the
//! canonical id derived from their normalized attributes. A sync never
//! deletes rows. It upserts the current feed under a new [`Generation`] and
//! promotes that generation, so a package missing from the latest feed is
//! kept for history but is no longer live.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use simbridge_core::{Money, ProviderId};

use crate::canonical::{CanonicalId, CapabilityClass};
use crate::units::{DataVolume, Validity};

/// Monotonic marker of one catalog refresh.
///
/// Rows upserted by a sync carry that sync's generation; the live snapshot is
/// the rows of the latest promoted generation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Generation(pub u64);

impl Generation {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl core::fmt::Display for Generation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Feature flags quoted by the provider per package.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capabilities {
    pub sms: bool,
    pub voice: bool,
    pub hotspot: bool,
    pub data_roaming: bool,
}

/// One purchasable SKU of the external provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderPackage {
    pub provider_id: ProviderId,
    pub canonical_id: CanonicalId,
    pub name: String,
    /// Upper-case ISO (or provider region) code.
    pub country_code: String,
    pub country_name: String,
    pub region: Option<String>,
    pub data_volume: DataVolume,
    pub validity: Validity,
    /// Wholesale price; the provider occasionally omits it.
    pub price: Option<Money>,
    pub capabilities: Capabilities,
    pub capability_class: CapabilityClass,
    pub generation: Generation,
    pub synced_at: DateTime<Utc>,
}

impl ProviderPackage {
    pub fn match_key(&self) -> crate::reconcile::MatchKey {
        crate::reconcile::MatchKey::new(&self.country_code, self.validity, self.data_volume)
    }
}
