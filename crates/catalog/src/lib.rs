//! `simbridge-catalog`: provider catalog mirror and resale catalog domain.
//!
//! Pure logic only: unit normalization, identifier derivation, feed parsing,
//! reconciliation planning and integrity analysis. Storage and scheduling
//! live in `simbridge-infra`.

pub mod audit;
pub mod canonical;
pub mod country;
pub mod feed;
pub mod offer;
pub mod package;
pub mod reconcile;
pub mod units;

pub use audit::{AuditFixes, AuditInput, AuditPolicy, AuditReport, EntitlementRef, OfferFix, audit};
pub use canonical::{CanonicalId, CapabilityClass, CountryToken, Generated, IdentifierGenerator, generate};
pub use feed::{FeedBody, NormalizedFeed, RejectedRecord, normalize_feed};
pub use offer::{MappingStatus, OfferMapping, ResaleOffer};
pub use package::{Capabilities, Generation, ProviderPackage};
pub use reconcile::{MappingUpdate, MatchKey, RepairOutcome, SnapshotIndex, reconcile_offer};
pub use units::{DataUnit, DataVolume, NormalizeError, Validity, normalize_duration, normalize_volume};
