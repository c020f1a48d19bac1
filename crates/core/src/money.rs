//! Monetary amounts in the smallest currency unit.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Amount in smallest currency unit (e.g., cents).
///
/// The catalog is single-currency; the provider quotes in the same currency
/// we sell in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl ValueObject for Money {}

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    pub const fn minor(&self) -> u64 {
        self.0
    }

    /// Convert a decimal major-unit amount (as quoted by the provider feed).
    ///
    /// Rounds half away from zero to the nearest minor unit.
    pub fn from_major(amount: f64) -> DomainResult<Self> {
        if !amount.is_finite() {
            return Err(DomainError::validation("price is not a finite number"));
        }
        if amount < 0.0 {
            return Err(DomainError::validation(format!("price is negative: {amount}")));
        }
        let minor = (amount * 100.0).round();
        if minor > u64::MAX as f64 {
            return Err(DomainError::validation("price is out of range"));
        }
        Ok(Self(minor as u64))
    }

    /// Major-unit value for display and provider payloads.
    pub fn as_major(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Apply a markup in basis points (2500 = +25%), rounding half up.
    pub fn with_markup_bps(&self, markup_bps: u32) -> Self {
        let scaled = u128::from(self.0) * (10_000 + u128::from(markup_bps));
        let minor = (scaled + 5_000) / 10_000;
        Self(u64::try_from(minor).unwrap_or(u64::MAX))
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_provider_prices_to_minor_units() {
        assert_eq!(Money::from_major(9.99).unwrap().minor(), 999);
        assert_eq!(Money::from_major(12.999).unwrap().minor(), 1300);
        assert!(Money::from_major(-1.0).is_err());
        assert!(Money::from_major(f64::NAN).is_err());
    }

    #[test]
    fn markup_rounds_half_up() {
        assert_eq!(Money::from_minor(999).with_markup_bps(2500).minor(), 1249);
        assert_eq!(Money::from_minor(1000).with_markup_bps(0).minor(), 1000);
        assert_eq!(Money::from_minor(2).with_markup_bps(2500).minor(), 3);
    }

    #[test]
    fn displays_as_major_units() {
        assert_eq!(Money::from_minor(1299).to_string(), "12.99");
        assert_eq!(Money::from_minor(5).to_string(), "0.05");
    }
}
