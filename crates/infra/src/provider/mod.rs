//! Upstream eSIM provider API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use simbridge_catalog::CanonicalId;
use simbridge_catalog::feed::FeedCountry;
use simbridge_fulfillment::{ActivationDetails, ProviderOrder};

pub mod http;
pub mod retry;

pub use http::HttpProviderClient;
pub use retry::{BackoffStrategy, RetryPolicy};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Network failure, timeout, 5xx or 429.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The provider refused the request; retrying will not help.
    #[error("provider rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Unavailable(_))
    }

    /// Classify an HTTP status that is not a success.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        if status == 429 || status >= 500 {
            ProviderError::Unavailable(format!("HTTP {status}: {body}"))
        } else {
            ProviderError::Rejected { status, body }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    /// The provider addresses its SKUs by canonical identifier.
    pub package_id: CanonicalId,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub items: Vec<OrderItem>,
}

impl OrderRequest {
    pub fn single(package_id: CanonicalId) -> Self {
        Self {
            items: vec![OrderItem { package_id, quantity: 1 }],
        }
    }
}

/// Provider operations used by sync and fulfillment.
#[async_trait]
pub trait ProviderApi: Send + Sync {
    /// Full package catalog, grouped by country.
    async fn fetch_catalog(&self) -> Result<Vec<FeedCountry>, ProviderError>;

    /// Place an order. `idempotency_key` is forwarded so the provider can
    /// collapse repeats of the same purchase.
    async fn create_order(&self, request: &OrderRequest, idempotency_key: &str) -> Result<ProviderOrder, ProviderError>;

    async fn activate(&self, esim_id: &str) -> Result<ActivationDetails, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(ProviderError::from_status(503, "").is_transient());
        assert!(ProviderError::from_status(429, "slow down").is_transient());
        assert_eq!(
            ProviderError::from_status(404, "no such package"),
            ProviderError::Rejected {
                status: 404,
                body: "no such package".to_string()
            }
        );
    }

    #[test]
    fn order_request_uses_provider_field_names() {
        let id = CanonicalId::parse("esim-de-30days-5gb-all").unwrap();
        let json = serde_json::to_value(OrderRequest::single(id)).unwrap();
        assert_eq!(json["items"][0]["packageId"], "esim-de-30days-5gb-all");
        assert_eq!(json["items"][0]["quantity"], 1);
    }
}
