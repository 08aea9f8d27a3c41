use axum::{
    routing::{get, put},
    Router,
};

pub mod callbacks;
pub mod results;
pub mod runs;
pub mod searches;
pub mod subjects;
pub mod system;
pub mod tenant;

/// Router for all tenant-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/searches", searches::router())
        .nest("/subjects", subjects::router())
        .nest("/results", results::router())
        .route("/settings", get(tenant::get_settings).put(tenant::put_settings))
        .route("/reasons/:id/remediation", put(tenant::flag_reason))
        .route("/filters/:id", put(tenant::schedule_filter))
        .route("/stall-log", get(tenant::stall_log))
}
