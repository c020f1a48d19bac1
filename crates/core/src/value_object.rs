//! Value object trait: equality by value, not identity.
//!
//! Value objects carry no identifier of their own. Two data volumes of
//! 5120 MB are the same volume wherever they appear, and two canonical ids
//! with the same text name the same provider package. Entities such as a
//! resale offer or a fulfillment event are the opposite: they are tracked by
//! an id from [`crate::id`] and stay the same entity while their fields change.

/// Marker trait for value objects.
///
/// ## Value object vs entity
///
/// - `DataVolume::Capped { megabytes: 1024 }` is a value object
/// - `ResaleOffer { id: OfferId(..), .. }` is an entity
///
/// ## Construction
///
/// Implementors are only built through validating constructors
/// (`normalize_volume`, `CanonicalId::parse`, `Money::from_major`, ...).
/// Once a value exists it is already normalized, so downstream code never
/// re-checks or re-converts it. To change a value, build a new one.
///
/// ## Requirements
///
/// - **Clone**: values are copied freely between snapshots, offers and reports
/// - **PartialEq**: reconciliation and audit compare values field by field
/// - **Debug**: values appear in logs and test failures
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// pub struct Validity(u32);
///
/// impl ValueObject for Validity {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
