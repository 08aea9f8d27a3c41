use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use mediawatch_infra::provider::CallbackPayload;

use crate::app::errors;
use crate::app::services::AppServices;

/// Provider result callback. Unattributable payloads are acknowledged and dropped so the
/// provider does not redeliver them; malformed payloads are rejected whole.
pub async fn receive(
    Extension(services): Extension<Arc<AppServices>>,
    Json(payload): Json<CallbackPayload>,
) -> axum::response::Response {
    let correlation_id = payload.correlation_id;
    let now = services.pipeline.clock.now();
    match services.pipeline.ingestor.ingest(payload, now).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => {
            tracing::warn!(correlation_id = %correlation_id, error = %e, "callback rejected");
            errors::pipeline_error_to_response(e)
        }
    }
}
