//! HTTP API: webhook intake, operator endpoints, and service wiring.

pub mod app;
pub mod middleware;
