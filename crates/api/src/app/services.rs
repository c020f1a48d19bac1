//! Service wiring: stores, provider client, and the jobs built on them.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use simbridge_catalog::{AuditPolicy, IdentifierGenerator};
use simbridge_infra::store::{
    CatalogStore, FulfillmentLedger, IdentityStore, InMemoryCatalogStore, InMemoryIdentityStore, InMemoryLedger,
    InMemorySyncRunStore, PostgresStores, SyncRunStore,
};
use simbridge_infra::{
    AuditRunner, CatalogSync, FulfillmentCoordinator, HttpProviderClient, IncidentSink, OfferCatalog, ProviderApi,
    Settings, SyncOptions, TracingIncidentSink,
};

/// The four persistence ports, backed by one implementation.
#[derive(Clone)]
pub struct Stores {
    pub catalog: Arc<dyn CatalogStore>,
    pub ledger: Arc<dyn FulfillmentLedger>,
    pub runs: Arc<dyn SyncRunStore>,
    pub identities: Arc<dyn IdentityStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            catalog: Arc::new(InMemoryCatalogStore::new()),
            ledger: Arc::new(InMemoryLedger::new()),
            runs: Arc::new(InMemorySyncRunStore::new()),
            identities: Arc::new(InMemoryIdentityStore::new()),
        }
    }

    /// Connect and apply the schema.
    pub async fn postgres(database_url: &str) -> anyhow::Result<Self> {
        let pg = PostgresStores::connect(database_url)
            .await
            .context("failed to connect to Postgres")?;
        pg.migrate().await.context("failed to apply schema")?;
        let pg = Arc::new(pg);
        Ok(Self {
            catalog: pg.clone(),
            ledger: pg.clone(),
            runs: pg.clone(),
            identities: pg,
        })
    }

    pub async fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        match &settings.database_url {
            Some(url) => {
                info!("using Postgres stores");
                Self::postgres(url).await
            }
            None => {
                info!("DATABASE_URL not set; using in-memory stores");
                Ok(Self::in_memory())
            }
        }
    }
}

/// Bearer secrets for the two protected surfaces.
#[derive(Debug, Clone)]
pub struct AccessTokens {
    pub webhook_secret: String,
    pub admin_token: String,
}

pub struct Services {
    pub coordinator: FulfillmentCoordinator,
    pub sync: CatalogSync,
    pub audit: AuditRunner,
    pub offers: OfferCatalog,
    pub runs: Arc<dyn SyncRunStore>,
    pub tokens: AccessTokens,
}

impl Services {
    pub fn new(
        settings: &Settings,
        stores: Stores,
        provider: Arc<dyn ProviderApi>,
        incidents: Arc<dyn IncidentSink>,
    ) -> Self {
        let coordinator = FulfillmentCoordinator::new(
            stores.catalog.clone(),
            stores.ledger.clone(),
            provider.clone(),
            incidents.clone(),
            settings.fulfillment_lease,
        );
        let sync = CatalogSync::new(
            provider,
            stores.catalog.clone(),
            stores.runs.clone(),
            incidents.clone(),
            SyncOptions {
                concurrency: settings.sync_concurrency,
                generator: IdentifierGenerator::new(settings.country_token),
                ..SyncOptions::default()
            },
        );
        let audit = AuditRunner::new(
            stores.catalog.clone(),
            stores.ledger,
            incidents,
            AuditPolicy {
                implausible_gb: settings.audit_implausible_gb,
            },
        );
        let offers = OfferCatalog::new(stores.catalog, settings.default_markup_bps);

        Self {
            coordinator,
            sync,
            audit,
            offers,
            runs: stores.runs,
            tokens: AccessTokens {
                webhook_secret: settings.webhook_secret.clone(),
                admin_token: settings.admin_token.clone(),
            },
        }
    }
}

/// Production wiring: configured stores, the HTTP provider client, and
/// incidents reported through tracing. Makes sure the guest identity exists.
pub async fn build_services(settings: &Settings) -> anyhow::Result<Services> {
    let stores = Stores::from_settings(settings).await?;
    stores
        .identities
        .ensure_guest()
        .await
        .context("failed to provision the guest identity")?;
    let provider = HttpProviderClient::new(&settings.provider).context("failed to build provider client")?;
    Ok(Services::new(
        settings,
        stores,
        Arc::new(provider),
        Arc::new(TracingIncidentSink),
    ))
}
