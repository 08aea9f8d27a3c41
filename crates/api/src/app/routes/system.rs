use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::services::AppServices;

/// Liveness plus a cheap store round-trip.
pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.pipeline.stores.run_lock.status().await {
        Ok(status) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ok",
                "runInProgress": status.running,
            })),
        )
            .into_response(),
        Err(e) => crate::app::errors::store_error_to_response(e),
    }
}
