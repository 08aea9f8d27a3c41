use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use mediawatch_core::{FilterId, ReasonId};
use mediawatch_infra::tenants::TenantSettings;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::TenantContext;

const DEFAULT_STALL_LOG_LIMIT: usize = 100;

pub async fn get_settings(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    match services.pipeline.stores.tenants.get(tenant.tenant_id()).await {
        Ok(settings) => (StatusCode::OK, Json(settings)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn put_settings(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(settings): Json<TenantSettings>,
) -> axum::response::Response {
    match services
        .pipeline
        .stores
        .tenants
        .put(tenant.tenant_id(), settings)
        .await
    {
        Ok(()) => (StatusCode::OK, Json(settings)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Mark a determination reason as requiring remediation (or clear the mark).
pub async fn flag_reason(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<i64>,
    Json(body): Json<dto::RemediationFlagRequest>,
) -> axum::response::Response {
    match services
        .pipeline
        .stores
        .determinations
        .flag_reason(tenant.tenant_id(), ReasonId::new(id), body.required)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Register (or replace) a filter and its candidates; loaded on the next run.
pub async fn schedule_filter(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<i64>,
    Json(body): Json<dto::ScheduleFilterRequest>,
) -> axum::response::Response {
    let (assignment, candidates) = body.into_parts(tenant.tenant_id(), FilterId::new(id));
    let count = candidates.len();
    services.filters.schedule(assignment, candidates);
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "filterId": id, "candidates": count })),
    )
        .into_response()
}

pub async fn stall_log(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::LimitQuery>,
) -> axum::response::Response {
    let limit = query.limit.unwrap_or(DEFAULT_STALL_LOG_LIMIT);
    match services
        .pipeline
        .stores
        .stall_log
        .list(tenant.tenant_id(), limit)
        .await
    {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
