//! Catalog sync job: fetch, normalize, publish, reconcile.

use thiserror::Error;

use crate::provider::ProviderError;
use crate::store::StoreError;

pub mod job;
pub mod run;

pub use job::{CatalogSync, SyncOptions};
pub use run::{SyncKind, SyncRun, SyncStats, SyncStatus};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a sync run is already in progress")]
    AlreadyRunning,

    /// Nothing usable came back from the provider; the live snapshot is kept.
    #[error("provider feed contained no usable packages ({rejected} rejected)")]
    EmptyFeed { rejected: usize },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyRunning(_) => SyncError::AlreadyRunning,
            other => SyncError::Store(other),
        }
    }
}
