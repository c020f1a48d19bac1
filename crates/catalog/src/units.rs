//! Unit normalization for data volumes and validity periods.
//!
//! The provider quotes volumes as `(amount, unit, isUnlimited)` and validity
//! as a day count (sometimes as text like `"30 days"`). Everything downstream
//! works on [`DataVolume`] and [`Validity`], which can only be built through
//! the normalizing constructors here. A value that is already normalized has
//! no raw unit left to divide by, so it cannot be converted twice.

use core::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use simbridge_core::{DomainError, ValueObject};

const MB_PER_GB: u64 = 1024;
const KB_PER_MB: f64 = 1024.0;

/// Why a raw volume/validity could not be normalized.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("{field} is negative: {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("{field} is not a finite number")]
    NotFinite { field: &'static str },

    #[error("unknown data unit: {0:?}")]
    UnknownUnit(String),

    #[error("unrecognized validity: {0:?}")]
    InvalidValidity(String),
}

impl From<NormalizeError> for DomainError {
    fn from(err: NormalizeError) -> Self {
        DomainError::validation(err.to_string())
    }
}

/// Unit attached to a raw provider volume.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataUnit {
    Kb,
    Mb,
    Gb,
}

impl DataUnit {
    pub fn parse(raw: &str) -> Result<Self, NormalizeError> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "KB" => Ok(Self::Kb),
            "MB" => Ok(Self::Mb),
            "GB" => Ok(Self::Gb),
            _ => Err(NormalizeError::UnknownUnit(raw.to_string())),
        }
    }
}

/// Normalized data volume.
///
/// Stored as whole megabytes so equality and hashing are exact. `Unlimited`
/// is the 0 sentinel of the external representation (GB, 0 = no cap).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "f64", try_from = "f64")]
pub enum DataVolume {
    Capped { megabytes: u64 },
    Unlimited,
}

impl ValueObject for DataVolume {}

impl DataVolume {
    /// Rebuild from a stored megabyte count (0 = unlimited).
    pub fn from_megabytes(megabytes: u64) -> Self {
        if megabytes == 0 {
            Self::Unlimited
        } else {
            Self::Capped { megabytes }
        }
    }

    /// Whole gigabytes (used where a volume is known to be GB-exact).
    pub fn from_gigabytes(gigabytes: u64) -> Self {
        Self::from_megabytes(gigabytes.saturating_mul(MB_PER_GB))
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Self::Unlimited)
    }

    /// Megabytes with 0 standing for unlimited (storage representation).
    pub fn megabytes(&self) -> u64 {
        match self {
            Self::Capped { megabytes } => *megabytes,
            Self::Unlimited => 0,
        }
    }

    /// Gigabytes with 0.0 standing for unlimited.
    pub fn gigabytes(&self) -> f64 {
        self.megabytes() as f64 / MB_PER_GB as f64
    }

    /// `Some(n)` when the volume is exactly `n` gigabytes.
    pub fn whole_gigabytes(&self) -> Option<u64> {
        match self {
            Self::Capped { megabytes } if megabytes % MB_PER_GB == 0 => Some(megabytes / MB_PER_GB),
            _ => None,
        }
    }
}

impl From<DataVolume> for f64 {
    fn from(value: DataVolume) -> Self {
        value.gigabytes()
    }
}

impl TryFrom<f64> for DataVolume {
    type Error = NormalizeError;

    fn try_from(gigabytes: f64) -> Result<Self, Self::Error> {
        normalize_volume(gigabytes, Some(DataUnit::Gb), false)
    }
}

impl fmt::Display for DataVolume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_volume(*self))
    }
}

/// Normalize a raw provider volume into canonical units.
///
/// `unlimited` wins over any numeric payload. A payload of exactly 0 is the
/// unlimited sentinel. A missing unit means gigabytes.
pub fn normalize_volume(
    amount: f64,
    unit: Option<DataUnit>,
    unlimited: bool,
) -> Result<DataVolume, NormalizeError> {
    if unlimited {
        return Ok(DataVolume::Unlimited);
    }
    if !amount.is_finite() {
        return Err(NormalizeError::NotFinite { field: "data amount" });
    }
    if amount < 0.0 {
        return Err(NormalizeError::Negative {
            field: "data amount",
            value: amount,
        });
    }
    if amount == 0.0 {
        return Ok(DataVolume::Unlimited);
    }

    let megabytes = match unit.unwrap_or(DataUnit::Gb) {
        DataUnit::Gb => amount * MB_PER_GB as f64,
        DataUnit::Mb => amount,
        DataUnit::Kb => amount / KB_PER_MB,
    };

    // Anything positive is at least one megabyte; it must never collapse
    // into the unlimited sentinel.
    let megabytes = megabytes.round().max(1.0);
    if megabytes > u64::MAX as f64 {
        return Err(NormalizeError::NotFinite { field: "data amount" });
    }
    Ok(DataVolume::from_megabytes(megabytes as u64))
}

/// Validity period of a package.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "i64")]
pub enum Validity {
    Days(u32),
    Unlimited,
}

impl ValueObject for Validity {}

impl Validity {
    pub fn days(&self) -> u32 {
        match self {
            Self::Days(d) => *d,
            Self::Unlimited => 0,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Self::Unlimited)
    }

    /// Ordering key where unlimited sorts after every finite period.
    pub fn sort_key(&self) -> u64 {
        match self {
            Self::Days(d) => u64::from(*d),
            Self::Unlimited => u64::MAX,
        }
    }
}

impl From<Validity> for u32 {
    fn from(value: Validity) -> Self {
        value.days()
    }
}

impl TryFrom<i64> for Validity {
    type Error = NormalizeError;

    fn try_from(days: i64) -> Result<Self, Self::Error> {
        normalize_duration(days)
    }
}

impl fmt::Display for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Days(1) => f.write_str("1 day"),
            Self::Days(d) => write!(f, "{d} days"),
            Self::Unlimited => f.write_str("Unlimited"),
        }
    }
}

/// Normalize a raw day count. 0 is the unlimited sentinel.
pub fn normalize_duration(days: i64) -> Result<Validity, NormalizeError> {
    if days < 0 {
        return Err(NormalizeError::Negative {
            field: "duration",
            value: days as f64,
        });
    }
    if days == 0 {
        return Ok(Validity::Unlimited);
    }
    u32::try_from(days)
        .map(Validity::Days)
        .map_err(|_| NormalizeError::InvalidValidity(days.to_string()))
}

/// Parse validity text such as `"30"`, `"30 days"` or `"1 day"`.
pub fn parse_validity(raw: &str) -> Result<Validity, NormalizeError> {
    let text = raw.trim().to_ascii_lowercase();
    if text == "unlimited" {
        return Ok(Validity::Unlimited);
    }
    let number = text
        .strip_suffix("days")
        .or_else(|| text.strip_suffix("day"))
        .unwrap_or(&text)
        .trim();
    let days: i64 = number
        .parse()
        .map_err(|_| NormalizeError::InvalidValidity(raw.to_string()))?;
    normalize_duration(days)
}

/// Human-readable volume: `"500MB"`, `"5GB"`, `"1.5GB"`, `"Unlimited"`.
pub fn format_volume(volume: DataVolume) -> String {
    match volume {
        DataVolume::Unlimited => "Unlimited".to_string(),
        DataVolume::Capped { megabytes } if megabytes < MB_PER_GB => format!("{megabytes}MB"),
        DataVolume::Capped { .. } => format!("{}GB", trim_decimal(volume.gigabytes())),
    }
}

/// Render a float with at most two decimals and no trailing zeros.
fn trim_decimal(value: f64) -> String {
    let rendered = format!("{value:.2}");
    rendered
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn megabytes_divide_by_1024() {
        let v = normalize_volume(1024.0, Some(DataUnit::Mb), false).unwrap();
        assert_eq!(v.gigabytes(), 1.0);
        assert_eq!(v.whole_gigabytes(), Some(1));
    }

    #[test]
    fn unlimited_flag_wins_over_payload() {
        assert_eq!(normalize_volume(0.0, None, true).unwrap().gigabytes(), 0.0);
        assert_eq!(
            normalize_volume(50.0, Some(DataUnit::Gb), true).unwrap(),
            DataVolume::Unlimited
        );
    }

    #[test]
    fn zero_payload_is_the_unlimited_sentinel() {
        assert_eq!(normalize_volume(0.0, Some(DataUnit::Mb), false).unwrap(), DataVolume::Unlimited);
    }

    #[test]
    fn gigabytes_pass_through_and_default_unit_is_gb() {
        assert_eq!(normalize_volume(5.0, Some(DataUnit::Gb), false).unwrap().gigabytes(), 5.0);
        assert_eq!(normalize_volume(5.0, None, false).unwrap().gigabytes(), 5.0);
    }

    #[test]
    fn negative_and_non_finite_are_distinct_errors() {
        assert!(matches!(
            normalize_volume(-1.0, None, false),
            Err(NormalizeError::Negative { .. })
        ));
        assert!(matches!(
            normalize_volume(f64::INFINITY, None, false),
            Err(NormalizeError::NotFinite { .. })
        ));
        assert!(matches!(normalize_duration(-7), Err(NormalizeError::Negative { .. })));
    }

    #[test]
    fn tiny_positive_volume_never_becomes_unlimited() {
        let v = normalize_volume(0.0001, Some(DataUnit::Mb), false).unwrap();
        assert_eq!(v, DataVolume::Capped { megabytes: 1 });
    }

    #[test]
    fn units_parse_case_insensitively() {
        assert_eq!(DataUnit::parse("mb").unwrap(), DataUnit::Mb);
        assert_eq!(DataUnit::parse(" GB ").unwrap(), DataUnit::Gb);
        assert!(DataUnit::parse("TB").is_err());
    }

    #[test]
    fn validity_parses_text_forms() {
        assert_eq!(parse_validity("30 days").unwrap(), Validity::Days(30));
        assert_eq!(parse_validity("1 day").unwrap(), Validity::Days(1));
        assert_eq!(parse_validity("7").unwrap(), Validity::Days(7));
        assert_eq!(parse_validity("0").unwrap(), Validity::Unlimited);
        assert!(parse_validity("a week").is_err());
    }

    #[test]
    fn formats_for_display() {
        assert_eq!(format_volume(DataVolume::from_megabytes(500)), "500MB");
        assert_eq!(format_volume(DataVolume::from_gigabytes(5)), "5GB");
        assert_eq!(format_volume(DataVolume::from_megabytes(1536)), "1.5GB");
        assert_eq!(format_volume(DataVolume::Unlimited), "Unlimited");
    }

    #[test]
    fn serde_uses_gigabytes_with_zero_for_unlimited() {
        let json = serde_json::to_string(&DataVolume::from_gigabytes(3)).unwrap();
        assert_eq!(json, "3.0");
        let back: DataVolume = serde_json::from_str("0").unwrap();
        assert_eq!(back, DataVolume::Unlimited);
        let days: Validity = serde_json::from_str("30").unwrap();
        assert_eq!(days, Validity::Days(30));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: re-normalizing an already normalized volume is a no-op.
            #[test]
            fn normalization_is_idempotent(
                amount in 0.0f64..100_000.0,
                unit in prop_oneof![Just(DataUnit::Kb), Just(DataUnit::Mb), Just(DataUnit::Gb)],
                unlimited in any::<bool>(),
            ) {
                let once = normalize_volume(amount, Some(unit), unlimited).unwrap();
                let twice = normalize_volume(once.gigabytes(), Some(DataUnit::Gb), false).unwrap();
                prop_assert_eq!(once, twice);
            }

            /// Property: day counts survive normalization unchanged.
            #[test]
            fn durations_are_stable(days in 0i64..10_000) {
                let v = normalize_duration(days).unwrap();
                prop_assert_eq!(i64::from(v.days()), days);
                prop_assert_eq!(normalize_duration(i64::from(v.days())).unwrap(), v);
            }
        }
    }
}
