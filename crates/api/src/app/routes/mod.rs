use axum::Router;

pub mod catalog;
pub mod offers;
pub mod system;
pub mod webhooks;

/// Operator endpoints, mounted under `/admin`.
pub fn admin_router() -> Router {
    Router::new()
        .nest("/catalog", catalog::router())
        .merge(catalog::runs_router())
        .nest("/offers", offers::router())
}
