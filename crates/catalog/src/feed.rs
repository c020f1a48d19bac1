//! Provider catalog feed: wire shape and normalization into packages.
//!
//! The feed is nested country -> packages. Each package is normalized on its
//! own; a malformed record is rejected with a reason and never aborts the
//! rest of the batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use simbridge_core::{DomainError, DomainResult, Money, ProviderId};

use crate::canonical::{CanonicalId, CapabilityClass, IdentifierGenerator};
use crate::country::{country_name, normalize_country_code};
use crate::package::{Capabilities, Generation, ProviderPackage};
use crate::units::{DataUnit, normalize_duration, normalize_volume, parse_validity};

/// Top-level feed body. The provider wraps it in `data`, older dumps do not.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FeedBody {
    Wrapped { data: FeedData },
    Bare(Vec<FeedCountry>),
}

impl FeedBody {
    pub fn into_countries(self) -> Vec<FeedCountry> {
        match self {
            FeedBody::Wrapped { data } => data.packages,
            FeedBody::Bare(countries) => countries,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedData {
    #[serde(default)]
    pub packages: Vec<FeedCountry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedCountry {
    pub country_name: Option<String>,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub geography: Option<String>,
    pub country_slug: Option<String>,
    #[serde(default)]
    pub packages: Vec<FeedPackage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPackage {
    pub package_id: Option<String>,
    /// Display name.
    pub package: Option<String>,
    pub price: Option<Value>,
    /// Day count; sometimes sent as text ("30 days").
    pub day: Option<Value>,
    pub data_amount: Option<Value>,
    pub data_unit: Option<String>,
    #[serde(default)]
    pub is_unlimited: bool,
    #[serde(rename = "withSMS", default)]
    pub with_sms: bool,
    #[serde(default)]
    pub with_call: bool,
    #[serde(default)]
    pub with_hotspot: bool,
    #[serde(default)]
    pub with_data_roaming: bool,
    pub plan: Option<String>,
    pub activation: Option<String>,
    pub class: Option<String>,
}

/// A feed record that could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRecord {
    pub provider_id: Option<String>,
    pub country_code: Option<String>,
    pub reason: String,
}

/// Result of normalizing one feed.
#[derive(Debug, Clone, Default)]
pub struct NormalizedFeed {
    pub packages: Vec<ProviderPackage>,
    pub rejected: Vec<RejectedRecord>,
    /// Ids derived from country codes missing from the country table.
    pub needs_review: Vec<CanonicalId>,
    /// Records skipped because their `provider_id` already appeared.
    pub duplicates: usize,
    /// Total package records seen.
    pub fetched: usize,
}

/// Normalize every package of a feed into `ProviderPackage`s.
pub fn normalize_feed(
    countries: Vec<FeedCountry>,
    generator: &IdentifierGenerator,
    generation: Generation,
    now: DateTime<Utc>,
) -> NormalizedFeed {
    let mut out = NormalizedFeed::default();
    let mut seen = std::collections::HashSet::new();

    for country in countries {
        for raw in &country.packages {
            out.fetched += 1;
            match normalize_package(&country, raw, generator, generation, now) {
                Ok((package, needs_review)) => {
                    if !seen.insert(package.provider_id.clone()) {
                        out.duplicates += 1;
                        continue;
                    }
                    if needs_review && !out.needs_review.contains(&package.canonical_id) {
                        out.needs_review.push(package.canonical_id.clone());
                    }
                    out.packages.push(package);
                }
                Err(err) => {
                    tracing::warn!(
                        provider_id = raw.package_id.as_deref().unwrap_or("<none>"),
                        country = country.country_code.as_deref().unwrap_or("<none>"),
                        error = %err,
                        "rejected provider package"
                    );
                    out.rejected.push(RejectedRecord {
                        provider_id: raw.package_id.clone(),
                        country_code: country.country_code.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }
    }

    out
}

fn normalize_package(
    country: &FeedCountry,
    raw: &FeedPackage,
    generator: &IdentifierGenerator,
    generation: Generation,
    now: DateTime<Utc>,
) -> DomainResult<(ProviderPackage, bool)> {
    let provider_id = ProviderId::parse(raw.package_id.clone().unwrap_or_default())?;
    let code = country
        .country_code
        .as_deref()
        .map(normalize_country_code)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| DomainError::validation("country code missing"))?;

    let unit = raw.data_unit.as_deref().map(DataUnit::parse).transpose()?;
    // An explicit 0 means unlimited; a missing amount is a broken record.
    let amount = match &raw.data_amount {
        None | Some(Value::Null) if raw.is_unlimited => 0.0,
        None | Some(Value::Null) => return Err(DomainError::validation("data amount missing")),
        Some(value) => number_field(value, "dataAmount")?,
    };
    let data_volume = normalize_volume(amount, unit, raw.is_unlimited)?;

    let validity = match &raw.day {
        Some(Value::String(text)) => parse_validity(text)?,
        Some(value) => normalize_duration(number_field(value, "day")?.round() as i64)?,
        None => return Err(DomainError::validation("validity missing")),
    };

    let price = match &raw.price {
        None | Some(Value::Null) => None,
        Some(value) => Some(Money::from_major(number_field(value, "price")?)?),
    };

    let capability_class = match raw.class.as_deref() {
        Some(class) => CapabilityClass::parse(class)?,
        None => CapabilityClass::all(),
    };

    let generated = generator.generate(&code, validity, data_volume, &capability_class)?;
    let country_label = country
        .country_name
        .clone()
        .or_else(|| country_name(&code).map(str::to_string))
        .unwrap_or_else(|| code.to_ascii_lowercase());

    let package = ProviderPackage {
        provider_id,
        canonical_id: generated.id,
        name: raw.package.clone().unwrap_or_default(),
        country_code: code,
        country_name: country_label,
        region: country.region.clone().or_else(|| country.geography.clone()),
        data_volume,
        validity,
        price,
        capabilities: Capabilities {
            sms: raw.with_sms,
            voice: raw.with_call,
            hotspot: raw.with_hotspot,
            data_roaming: raw.with_data_roaming,
        },
        capability_class,
        generation,
        synced_at: now,
    };
    Ok((package, generated.needs_review))
}

fn number_field(value: &Value, field: &str) -> DomainResult<f64> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| DomainError::validation(format!("{field} is not representable"))),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| DomainError::validation(format!("{field} is not a number: {s:?}"))),
        other => Err(DomainError::validation(format!("{field} has unexpected type: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(body: Value) -> Vec<FeedCountry> {
        serde_json::from_value::<FeedBody>(body).unwrap().into_countries()
    }

    fn sample() -> Value {
        json!({
            "data": {
                "packages": [
                    {
                        "countryName": "Germany",
                        "countryCode": "DE",
                        "region": "Europe",
                        "packages": [
                            { "packageId": "esim-germany-30days-5gb-all", "package": "Germany 5GB", "price": 9.99,
                              "day": 30, "dataAmount": 5120, "dataUnit": "MB", "isUnlimited": false, "withSMS": true },
                            { "packageId": "pkg-de-unl", "package": "Germany Unlimited", "price": "19.50",
                              "day": "7 days", "dataAmount": 0, "dataUnit": "GB", "isUnlimited": true },
                            { "packageId": "pkg-bad", "package": "Broken", "price": 1.0,
                              "day": 7, "dataAmount": -1, "dataUnit": "GB" }
                        ]
                    },
                    {
                        "countryName": "Atlantis",
                        "countryCode": "xa",
                        "packages": [
                            { "packageId": "pkg-xa-1", "package": "Atlantis 1GB", "day": 1, "dataAmount": 1, "dataUnit": "GB" },
                            { "packageId": "pkg-xa-1", "package": "Atlantis 1GB again", "day": 1, "dataAmount": 1, "dataUnit": "GB" }
                        ]
                    }
                ]
            }
        })
    }

    #[test]
    fn normalizes_nested_feed_and_collects_rejects() {
        let feed = normalize_feed(parse(sample()), &IdentifierGenerator::default(), Generation(3), Utc::now());

        assert_eq!(feed.fetched, 5);
        assert_eq!(feed.packages.len(), 3);
        assert_eq!(feed.duplicates, 1);
        assert_eq!(feed.rejected.len(), 1);
        assert_eq!(feed.rejected[0].provider_id.as_deref(), Some("pkg-bad"));

        let de = &feed.packages[0];
        assert_eq!(de.canonical_id.as_str(), "esim-de-30days-5gb-all");
        assert_eq!(de.price, Some(Money::from_minor(999)));
        assert!(de.capabilities.sms);
        assert_eq!(de.generation, Generation(3));

        let unl = &feed.packages[1];
        assert_eq!(unl.canonical_id.as_str(), "esim-de-7days-unlimited-all");
        assert_eq!(unl.price, Some(Money::from_minor(1950)));
    }

    #[test]
    fn unmapped_countries_are_flagged_for_review() {
        let feed = normalize_feed(parse(sample()), &IdentifierGenerator::default(), Generation(1), Utc::now());
        let flagged: Vec<&str> = feed.needs_review.iter().map(|c| c.as_str()).collect();
        assert_eq!(flagged, vec!["esim-xa-1days-1gb-all"]);
        assert_eq!(feed.packages[2].price, None);
    }

    #[test]
    fn accepts_bare_country_arrays() {
        let countries = parse(json!([
            { "countryCode": "FR", "packages": [
                { "packageId": "fr-1", "day": 15, "dataAmount": 3, "dataUnit": "GB", "price": 4 }
            ]}
        ]));
        let feed = normalize_feed(countries, &IdentifierGenerator::default(), Generation(1), Utc::now());
        assert_eq!(feed.packages[0].canonical_id.as_str(), "esim-fr-15days-3gb-all");
        assert_eq!(feed.packages[0].country_name, "france");
    }

    #[test]
    fn missing_country_code_rejects_only_that_country() {
        let countries = parse(json!([
            { "countryName": "Nowhere", "packages": [ { "packageId": "x", "day": 1, "dataAmount": 1 } ] },
            { "countryCode": "IT", "packages": [ { "packageId": "it-1", "day": 1, "dataAmount": 1 } ] }
        ]));
        let feed = normalize_feed(countries, &IdentifierGenerator::default(), Generation(1), Utc::now());
        assert_eq!(feed.rejected.len(), 1);
        assert_eq!(feed.packages.len(), 1);
    }

    #[test]
    fn missing_data_amount_is_rejected_unless_flagged_unlimited() {
        let countries = parse(json!([
            { "countryCode": "ES", "packages": [
                { "packageId": "es-no-amount", "day": 7, "dataUnit": "GB" },
                { "packageId": "es-null-amount", "day": 7, "dataAmount": null },
                { "packageId": "es-unl", "day": 7, "isUnlimited": true }
            ]}
        ]));
        let feed = normalize_feed(countries, &IdentifierGenerator::default(), Generation(1), Utc::now());

        let rejected: Vec<&str> = feed.rejected.iter().filter_map(|r| r.provider_id.as_deref()).collect();
        assert_eq!(rejected, vec!["es-no-amount", "es-null-amount"]);
        assert_eq!(feed.packages.len(), 1);
        assert_eq!(feed.packages[0].canonical_id.as_str(), "esim-es-7days-unlimited-all");
    }
}
