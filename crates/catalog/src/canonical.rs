//! Canonical package identifiers ("slugs").
//!
//! Format: `esim-<country>-<days>days-<data>-<class>`, e.g.
//! `esim-de-30days-5gb-all` or `esim-eu-7days-unlimited-all`.
//!
//! The provider order API accepts these as `packageId`. Every slug in the
//! system comes out of [`IdentifierGenerator::generate`]; other code only
//! reads `canonical_id` fields.

use core::fmt;

use serde::{Deserialize, Serialize};

use simbridge_core::{DomainError, DomainResult, ValueObject};

use crate::country::country_name;
use crate::units::{DataVolume, Validity};

const PREFIX: &str = "esim-";

/// Provider-compatible package identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CanonicalId(String);

impl ValueObject for CanonicalId {}

impl CanonicalId {
    /// Validate an identifier read from storage or the provider feed.
    pub fn parse(raw: impl Into<String>) -> DomainResult<Self> {
        let raw = raw.into();
        let Some(rest) = raw.strip_prefix(PREFIX) else {
            return Err(DomainError::invalid_id(format!("canonical id must start with {PREFIX:?}: {raw}")));
        };
        let well_formed = !rest.is_empty()
            && rest
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
            && rest.split('-').all(|segment| !segment.is_empty());
        if !well_formed {
            return Err(DomainError::invalid_id(format!("malformed canonical id: {raw}")));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CanonicalId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<CanonicalId> for String {
    fn from(value: CanonicalId) -> Self {
        value.0
    }
}

/// Capability class suffix of a slug (the provider uses `all`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CapabilityClass(String);

impl CapabilityClass {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let token = raw.trim().to_ascii_lowercase();
        if token.is_empty() || !token.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) {
            return Err(DomainError::validation(format!("invalid capability class: {raw:?}")));
        }
        Ok(Self(token))
    }

    pub fn all() -> Self {
        Self("all".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CapabilityClass {
    fn default() -> Self {
        Self::all()
    }
}

impl TryFrom<String> for CapabilityClass {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CapabilityClass> for String {
    fn from(value: CapabilityClass) -> Self {
        value.0
    }
}

/// Which form of the country goes into the slug.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountryToken {
    /// Lower-cased code (`esim-de-...`). This is what the provider accepts.
    #[default]
    IsoCode,
    /// Mapped country name (`esim-germany-...`).
    Name,
}

/// A derived identifier plus whether an operator should look at it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub id: CanonicalId,
    /// Set when the country code is not in the fixed table.
    pub needs_review: bool,
}

/// Derives canonical identifiers from normalized attributes.
#[derive(Debug, Copy, Clone, Default)]
pub struct IdentifierGenerator {
    country_token: CountryToken,
}

impl IdentifierGenerator {
    pub fn new(country_token: CountryToken) -> Self {
        Self { country_token }
    }

    /// Derive the identifier. Pure: identical inputs give identical output.
    pub fn generate(
        &self,
        country_code: &str,
        validity: Validity,
        volume: DataVolume,
        class: &CapabilityClass,
    ) -> DomainResult<Generated> {
        let code = slug_token(country_code);
        if code.is_empty() {
            return Err(DomainError::validation(format!(
                "country code {country_code:?} has no usable characters"
            )));
        }

        let mapped = country_name(country_code);
        let country = match (self.country_token, mapped) {
            (CountryToken::Name, Some(name)) => name.to_string(),
            _ => code,
        };

        let slug = format!(
            "{PREFIX}{country}-{}-{}-{}",
            days_token(validity),
            data_token(volume),
            class.as_str()
        );

        Ok(Generated {
            id: CanonicalId::parse(slug)?,
            needs_review: mapped.is_none(),
        })
    }
}

/// Derive an identifier with the default (ISO code) country token.
pub fn generate(
    country_code: &str,
    validity: Validity,
    volume: DataVolume,
    class: &CapabilityClass,
) -> DomainResult<Generated> {
    IdentifierGenerator::default().generate(country_code, validity, volume, class)
}

fn slug_token(raw: &str) -> String {
    raw.trim()
        .to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

fn days_token(validity: Validity) -> String {
    match validity {
        Validity::Days(days) => format!("{days}days"),
        Validity::Unlimited => "unlimiteddays".to_string(),
    }
}

/// Whole gigabytes render as `gb`, everything else as exact megabytes, so
/// no two volumes share a token.
fn data_token(volume: DataVolume) -> String {
    if volume.is_unlimited() {
        return "unlimited".to_string();
    }
    match volume.whole_gigabytes() {
        Some(gb) => format!("{gb}gb"),
        None => format!("{}mb", volume.megabytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all() -> CapabilityClass {
        CapabilityClass::all()
    }

    #[test]
    fn germany_thirty_days_five_gigabytes() {
        let generated = generate("DE", Validity::Days(30), DataVolume::from_gigabytes(5), &all()).unwrap();
        assert_eq!(generated.id.as_str(), "esim-de-30days-5gb-all");
        assert!(!generated.needs_review);
    }

    #[test]
    fn unlimited_volume_renders_as_token() {
        let generated = generate("EU", Validity::Days(7), DataVolume::Unlimited, &all()).unwrap();
        assert_eq!(generated.id.as_str(), "esim-eu-7days-unlimited-all");
    }

    #[test]
    fn unlimited_duration_and_volume_stay_distinct() {
        let both = generate("US", Validity::Unlimited, DataVolume::Unlimited, &all()).unwrap();
        assert_eq!(both.id.as_str(), "esim-us-unlimiteddays-unlimited-all");

        let days_only = generate("US", Validity::Unlimited, DataVolume::from_gigabytes(1), &all()).unwrap();
        let data_only = generate("US", Validity::Days(1), DataVolume::Unlimited, &all()).unwrap();
        assert_ne!(days_only.id, data_only.id);
    }

    #[test]
    fn sub_gigabyte_and_fractional_volumes() {
        let mb = generate("FR", Validity::Days(7), DataVolume::from_megabytes(500), &all()).unwrap();
        assert_eq!(mb.id.as_str(), "esim-fr-7days-500mb-all");

        let frac = generate("FR", Validity::Days(7), DataVolume::from_megabytes(1536), &all()).unwrap();
        assert_eq!(frac.id.as_str(), "esim-fr-7days-1536mb-all");
    }

    #[test]
    fn nearby_fractional_volumes_get_distinct_ids() {
        let ids: Vec<String> = [1030, 1034, 1536, 1537]
            .into_iter()
            .map(|mb| {
                generate("FR", Validity::Days(7), DataVolume::from_megabytes(mb), &all())
                    .unwrap()
                    .id
                    .to_string()
            })
            .collect();
        let mut unique = ids.clone();
        unique.dedup();
        assert_eq!(unique, ids);
        assert_eq!(ids[0], "esim-fr-7days-1030mb-all");
    }

    #[test]
    fn unmapped_codes_pass_through_and_are_flagged() {
        let generated = generate("xq", Validity::Days(15), DataVolume::from_gigabytes(3), &all()).unwrap();
        assert_eq!(generated.id.as_str(), "esim-xq-15days-3gb-all");
        assert!(generated.needs_review);
    }

    #[test]
    fn name_token_uses_country_table() {
        let generator = IdentifierGenerator::new(CountryToken::Name);
        let generated = generator
            .generate("gb", Validity::Days(30), DataVolume::from_gigabytes(10), &all())
            .unwrap();
        assert_eq!(generated.id.as_str(), "esim-united-kingdom-30days-10gb-all");
    }

    #[test]
    fn blank_country_is_rejected() {
        assert!(generate("  ", Validity::Days(1), DataVolume::from_gigabytes(1), &all()).is_err());
    }

    #[test]
    fn parse_rejects_malformed_ids() {
        assert!(CanonicalId::parse("esim-de-30days-5gb-all").is_ok());
        assert!(CanonicalId::parse("pkg-123").is_err());
        assert!(CanonicalId::parse("esim-DE-30days").is_err());
        assert!(CanonicalId::parse("esim--30days").is_err());
    }

    #[test]
    fn capability_class_is_validated() {
        assert_eq!(CapabilityClass::parse(" ALL ").unwrap(), CapabilityClass::all());
        assert!(CapabilityClass::parse("data-only").is_err());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 1000,
                ..ProptestConfig::default()
            })]

            /// Property: generation is pure and always yields a parseable id.
            #[test]
            fn generate_is_deterministic(
                country in "[A-Za-z]{2,4}",
                days in 0i64..400,
                megabytes in 0u64..200_000,
            ) {
                let validity = crate::units::normalize_duration(days).unwrap();
                let volume = DataVolume::from_megabytes(megabytes);
                let a = generate(&country, validity, volume, &CapabilityClass::all()).unwrap();
                let b = generate(&country, validity, volume, &CapabilityClass::all()).unwrap();
                prop_assert_eq!(&a, &b);
                prop_assert!(CanonicalId::parse(a.id.as_str()).is_ok());
            }

            /// Property: distinct volumes never share a data token.
            #[test]
            fn data_token_is_injective(a in 0u64..500_000, b in 0u64..500_000) {
                prop_assume!(a != b);
                prop_assert_ne!(
                    data_token(DataVolume::from_megabytes(a)),
                    data_token(DataVolume::from_megabytes(b))
                );
            }
        }
    }
}
