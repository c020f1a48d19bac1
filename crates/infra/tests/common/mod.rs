#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use simbridge_catalog::feed::FeedCountry;
use simbridge_catalog::{IdentifierGenerator, ProviderPackage, ResaleOffer, normalize_feed, Generation};
use simbridge_fulfillment::{ActivationDetails, ProviderOrder};
use simbridge_infra::provider::{OrderRequest, ProviderApi, ProviderError};
use simbridge_infra::store::{CatalogStore, InMemoryCatalogStore};

/// Scriptable provider that counts calls.
#[derive(Default)]
pub struct FakeProvider {
    pub feed: Mutex<Vec<FeedCountry>>,
    pub fetch_delay: Mutex<Duration>,
    pub order_delay: Mutex<Duration>,
    /// Consumed front to back; empty means success.
    pub order_failures: Mutex<VecDeque<ProviderError>>,
    pub activate_failures: Mutex<VecDeque<ProviderError>>,
    pub fetches: AtomicUsize,
    pub orders: AtomicUsize,
    pub activations: AtomicUsize,
    pub idempotency_keys: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_feed(feed: Vec<FeedCountry>) -> Arc<Self> {
        let provider = Self::default();
        *provider.feed.lock().unwrap() = feed;
        Arc::new(provider)
    }

    pub fn set_feed(&self, feed: Vec<FeedCountry>) {
        *self.feed.lock().unwrap() = feed;
    }

    pub fn orders(&self) -> usize {
        self.orders.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderApi for FakeProvider {
    async fn fetch_catalog(&self) -> Result<Vec<FeedCountry>, ProviderError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.feed.lock().unwrap().clone())
    }

    async fn create_order(&self, request: &OrderRequest, idempotency_key: &str) -> Result<ProviderOrder, ProviderError> {
        let n = self.orders.fetch_add(1, Ordering::SeqCst) + 1;
        self.idempotency_keys.lock().unwrap().push(idempotency_key.to_string());
        let delay = *self.order_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.order_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        assert_eq!(request.items.len(), 1);
        Ok(ProviderOrder {
            order_id: format!("ord-{n}"),
            esim_id: Some(format!("esim-{n}")),
            iccid: Some(format!("8900{n}")),
        })
    }

    async fn activate(&self, esim_id: &str) -> Result<ActivationDetails, ProviderError> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.activate_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(ActivationDetails {
            lpa_code: Some(format!("LPA:1$smdp.example${esim_id}")),
            qr_code_url: Some(format!("https://qr.example/{esim_id}.png")),
            activation_code: Some(format!("ACT-{esim_id}")),
            ios_quick_install: None,
        })
    }
}

/// `(package_id, country, days, gb, price)`
pub fn feed(packages: &[(&str, &str, u32, f64, f64)]) -> Vec<FeedCountry> {
    let mut countries: Vec<serde_json::Value> = Vec::new();
    for (id, country, days, gb, price) in packages {
        let package = json!({
            "packageId": id,
            "package": format!("{country} {gb}GB {days} days"),
            "price": price,
            "day": days,
            "dataAmount": gb,
            "dataUnit": "GB",
        });
        match countries.iter_mut().find(|c| c["countryCode"] == *country) {
            Some(existing) => existing["packages"].as_array_mut().unwrap().push(package),
            None => countries.push(json!({ "countryCode": country, "packages": [package] })),
        }
    }
    serde_json::from_value(serde_json::Value::Array(countries)).unwrap()
}

pub fn packages(feed_countries: Vec<FeedCountry>) -> Vec<ProviderPackage> {
    normalize_feed(feed_countries, &IdentifierGenerator::default(), Generation(1), Utc::now()).packages
}

/// Catalog with one published snapshot and one offer per listed package.
pub async fn seeded_catalog(
    rows: &[(&str, &str, u32, f64, f64)],
) -> (Arc<InMemoryCatalogStore>, Vec<ResaleOffer>) {
    let catalog = Arc::new(InMemoryCatalogStore::new());
    let pkgs = packages(feed(rows));
    catalog.publish_snapshot(Generation(1), &pkgs).await.unwrap();
    let mut offers = Vec::new();
    for pkg in &pkgs {
        let offer = ResaleOffer::from_package(pkg, 2500, Utc::now()).unwrap();
        catalog.insert_offer(&offer).await.unwrap();
        offers.push(offer);
    }
    (catalog, offers)
}
