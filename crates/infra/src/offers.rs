//! Creating resale offers from live provider packages.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument};

use simbridge_catalog::ResaleOffer;
use simbridge_core::{DomainError, ProviderId};

use crate::store::{CatalogStore, StoreError};

#[derive(Debug, Error)]
pub enum OfferError {
    #[error("provider package {0} is not in the live catalog")]
    UnknownPackage(ProviderId),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct OfferCatalog {
    catalog: Arc<dyn CatalogStore>,
    default_markup_bps: u32,
}

impl OfferCatalog {
    pub fn new(catalog: Arc<dyn CatalogStore>, default_markup_bps: u32) -> Self {
        Self {
            catalog,
            default_markup_bps,
        }
    }

    /// Price a live package into a new visible offer.
    #[instrument(skip(self), fields(provider_id = %provider_id), err)]
    pub async fn create_from_package(
        &self,
        provider_id: &ProviderId,
        markup_bps: Option<u32>,
    ) -> Result<ResaleOffer, OfferError> {
        let package = self
            .catalog
            .live_package(provider_id)
            .await?
            .ok_or_else(|| OfferError::UnknownPackage(provider_id.clone()))?;
        let offer = ResaleOffer::from_package(&package, markup_bps.unwrap_or(self.default_markup_bps), Utc::now())?;
        self.catalog.insert_offer(&offer).await?;
        info!(
            offer_id = %offer.id,
            canonical_id = %package.canonical_id,
            sale_price = %offer.sale_price,
            "resale offer created"
        );
        Ok(offer)
    }

    pub async fn list(&self) -> Result<Vec<ResaleOffer>, OfferError> {
        Ok(self.catalog.list_offers().await?)
    }
}
