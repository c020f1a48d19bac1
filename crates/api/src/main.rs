use std::sync::Arc;

use anyhow::Context;

use simbridge_api::app;
use simbridge_infra::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    simbridge_observability::init();

    let settings = Settings::from_env().context("invalid configuration")?;
    let services = app::build_services(&settings).await?;
    let router = app::build_app(Arc::new(services));

    let listener = tokio::net::TcpListener::bind(settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router).await?;
    Ok(())
}
