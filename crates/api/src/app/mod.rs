//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, provider and pipeline wiring
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request DTOs and mapping to pipeline inputs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router over already-wired services.
pub fn build_app(services: Arc<AppServices>) -> Router {
    // Tenant routes: require a resolved tenant context.
    let tenant_scoped = routes::router().layer(axum::middleware::from_fn(
        middleware::tenant_middleware,
    ));

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/callbacks/provider", post(routes::callbacks::receive))
        .route("/runs", post(routes::runs::trigger))
        .route("/runs/status", get(routes::runs::status))
        .merge(tenant_scoped)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
