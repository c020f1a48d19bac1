//! Axum router and service wiring.
//!
//! - `services.rs`: stores, provider client, and the jobs built on them
//! - `routes/`: handlers, one file per surface
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::middleware::{self, BearerSecret};

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AccessTokens, Services, Stores, build_services};

/// Build the full HTTP router.
pub fn build_app(services: Arc<Services>) -> Router {
    let webhooks = routes::webhooks::router().layer(axum::middleware::from_fn_with_state(
        BearerSecret(services.tokens.webhook_secret.clone()),
        middleware::require_bearer,
    ));
    let admin = routes::admin_router().layer(axum::middleware::from_fn_with_state(
        BearerSecret(services.tokens.admin_token.clone()),
        middleware::require_bearer,
    ));

    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/webhooks", webhooks)
        .nest("/admin", admin)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
