//! `simbridge-fulfillment`: payment-triggered fulfillment domain.
//!
//! Pure state machine and value types. The coordinator that drives them
//! against stores and the provider API lives in `simbridge-infra`.

pub mod entitlement;
pub mod event;
pub mod outcome;

pub use entitlement::{ActivationDetails, Entitlement};
pub use event::{Buyer, FailureReason, FulfillmentEvent, FulfillmentState, GUEST_USER_ID, PlacedOrder, ProviderOrder};
pub use outcome::{CUSTOMER_FAILURE_MESSAGE, FulfillmentOutcome, FulfillmentRequest};
