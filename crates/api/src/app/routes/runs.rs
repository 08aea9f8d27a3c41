use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::errors;
use crate::app::services::AppServices;

/// Run the pipeline once, now. Returns `skipped` if another run holds the lock.
pub async fn trigger(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.pipeline.coordinator.run_once().await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

pub async fn status(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.pipeline.stores.run_lock.status().await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
