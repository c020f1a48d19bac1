//! reqwest-backed provider client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use simbridge_catalog::FeedBody;
use simbridge_catalog::feed::FeedCountry;
use simbridge_fulfillment::{ActivationDetails, ProviderOrder};

use super::retry::RetryPolicy;
use super::{OrderRequest, ProviderApi, ProviderError};
use crate::config::ProviderSettings;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Provider client over HTTPS with bearer auth.
///
/// Reads (catalog, activation) are retried per `retry`; order creation is
/// sent once per call and relies on the idempotency key instead.
#[derive(Debug, Clone)]
pub struct HttpProviderClient {
    client: Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl HttpProviderClient {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            retry: RetryPolicy::linear(settings.max_retries, Duration::from_secs(2)),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), body));
        }
        // A body cut short by a timeout or reset is transient; only a body
        // that arrived whole and does not parse is invalid.
        let body = response.bytes().await.map_err(transport_error)?;
        serde_json::from_slice(&body).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    async fn fetch_once(&self) -> Result<Vec<FeedCountry>, ProviderError> {
        let response = self
            .client
            .get(self.url("/api/esim/packages"))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport_error)?;
        let body: FeedBody = Self::read_json(response).await?;
        Ok(body.into_countries())
    }

    async fn activate_once(&self, esim_id: &str) -> Result<ActivationDetails, ProviderError> {
        let response = self
            .client
            .post(self.url("/api/esim/apply"))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "esimId": esim_id }))
            .send()
            .await
            .map_err(transport_error)?;
        let body: ApplyResponse = Self::read_json(response).await?;
        let esim = body.data.esim;
        Ok(ActivationDetails {
            lpa_code: esim.lpa_code,
            qr_code_url: esim.qr_code_url,
            activation_code: esim.activation_code,
            ios_quick_install: esim.ios_quick_install,
        })
    }
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_decode() {
        ProviderError::InvalidResponse(e.to_string())
    } else {
        ProviderError::Unavailable(e.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    data: OrderData,
}

#[derive(Debug, Deserialize)]
struct OrderData {
    id: Option<serde_json::Value>,
    #[serde(default)]
    items: Vec<OrderedItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderedItem {
    esim_id: Option<String>,
    iccid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApplyResponse {
    data: ApplyData,
}

#[derive(Debug, Deserialize)]
struct ApplyData {
    esim: AppliedEsim,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppliedEsim {
    lpa_code: Option<String>,
    qr_code_url: Option<String>,
    activation_code: Option<String>,
    ios_quick_install: Option<String>,
}

fn into_provider_order(body: OrderResponse) -> Result<ProviderOrder, ProviderError> {
    let order_id = match body.data.id {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => return Err(ProviderError::InvalidResponse("order response has no id".to_string())),
    };
    let first = body.data.items.into_iter().next();
    let (esim_id, iccid) = first.map(|i| (i.esim_id, i.iccid)).unwrap_or_default();
    Ok(ProviderOrder {
        order_id,
        esim_id,
        iccid,
    })
}

#[async_trait]
impl ProviderApi for HttpProviderClient {
    #[instrument(skip(self), err)]
    async fn fetch_catalog(&self) -> Result<Vec<FeedCountry>, ProviderError> {
        let countries = self.retry.run("fetch_catalog", || self.fetch_once()).await?;
        debug!(countries = countries.len(), "fetched provider catalog");
        Ok(countries)
    }

    #[instrument(skip(self, request), fields(items = request.items.len()), err)]
    async fn create_order(&self, request: &OrderRequest, idempotency_key: &str) -> Result<ProviderOrder, ProviderError> {
        let response = self
            .client
            .post(self.url("/api/esim/order"))
            .bearer_auth(&self.api_key)
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;
        let body: OrderResponse = Self::read_json(response).await?;
        into_provider_order(body)
    }

    #[instrument(skip(self), err)]
    async fn activate(&self, esim_id: &str) -> Result<ActivationDetails, ProviderError> {
        self.retry.run("activate", || self.activate_once(esim_id)).await
    }
}
