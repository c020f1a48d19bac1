//! Infrastructure layer: stores, provider client, config, jobs.

pub mod audit;
pub mod config;
pub mod fulfillment;
pub mod incidents;
pub mod offers;
pub mod provider;
pub mod store;
pub mod sync;

pub use audit::{AuditRun, AuditRunner};
pub use config::{ConfigError, ProviderSettings, Settings};
pub use fulfillment::{FulfillmentCoordinator, FulfillmentError};
pub use incidents::{InMemoryIncidentSink, Incident, IncidentSink, TracingIncidentSink};
pub use offers::{OfferCatalog, OfferError};
pub use provider::{HttpProviderClient, ProviderApi, ProviderError};
pub use sync::{CatalogSync, SyncError, SyncOptions};
