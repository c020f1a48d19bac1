//! `simbridge-core`: identifiers, money and the domain error shared by
//! every other crate. No I/O.

pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use error::{DomainError, DomainResult};
pub use id::{EntitlementId, EventId, OfferId, ProviderId, SyncRunId, UserId};
pub use money::Money;
pub use value_object::ValueObject;
