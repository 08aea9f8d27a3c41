use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{post, put},
    Json, Router,
};

use mediawatch_core::ResultId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/:id/determinations", post(record_determination).get(history))
        .route("/:id/deleted", put(set_deleted))
}

/// Append a determination; the subject's summary is refreshed in the same call.
pub async fn record_determination(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<i64>,
    Json(body): Json<dto::DeterminationRequest>,
) -> axum::response::Response {
    let determination = body.into_determination(tenant.tenant_id(), ResultId::new(id));
    let now = services.pipeline.clock.now();
    match services.pipeline.aggregator.record(determination, now).await {
        Ok(recorded) => (StatusCode::CREATED, Json(recorded)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn history(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<i64>,
) -> axum::response::Response {
    match services
        .pipeline
        .stores
        .determinations
        .history(tenant.tenant_id(), ResultId::new(id))
        .await
    {
        Ok(history) => (StatusCode::OK, Json(history)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Soft delete or restore a result, then refresh the subject's counts.
pub async fn set_deleted(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<i64>,
    Json(body): Json<dto::SetDeletedRequest>,
) -> axum::response::Response {
    let tenant_id = tenant.tenant_id();
    let settings = match services.pipeline.stores.tenants.get(tenant_id).await {
        Ok(s) => s,
        Err(e) => return errors::store_error_to_response(e),
    };
    let record = match services
        .pipeline
        .stores
        .results
        .set_deleted(tenant_id, ResultId::new(id), body.deleted, settings)
        .await
    {
        Ok(r) => r,
        Err(e) => return errors::store_error_to_response(e),
    };

    let now = services.pipeline.clock.now();
    if let Err(e) = services
        .pipeline
        .aggregator
        .refresh_summary(tenant_id, record.subject, now)
        .await
    {
        tracing::warn!(result_id = id, error = %e, "summary refresh failed after correction");
    }
    (StatusCode::OK, Json(record)).into_response()
}
