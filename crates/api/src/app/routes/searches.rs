use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(enqueue))
        .route("/attach", post(attach_refinement))
        .route("/wait", post(wait))
        .route("/stats", get(stats))
        .route("/usage", get(usage))
}

/// Interactive enqueue; dispatched ahead of filter-driven work.
pub async fn enqueue(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<dto::EnqueueSearchRequest>,
) -> axum::response::Response {
    let request = body.into_request(tenant.tenant_id());
    let now = services.pipeline.clock.now();
    match services.pipeline.enqueuer.enqueue_interactive(request, now).await {
        Ok(job) => (StatusCode::CREATED, Json(job)).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

pub async fn attach_refinement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<dto::AttachRefinementRequest>,
) -> axum::response::Response {
    let request = body.search.into_request(tenant.tenant_id());
    let now = services.pipeline.clock.now();
    match services
        .pipeline
        .correlator
        .attach_refinement(request, body.correlation_id, now)
        .await
    {
        Ok(outcome) => (StatusCode::CREATED, Json(outcome)).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

/// Block until the given jobs finish or the wait ceiling passes.
pub async fn wait(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<dto::WaitRequest>,
) -> axum::response::Response {
    if body.job_ids.is_empty() {
        return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "jobIds is empty");
    }
    let timeout = body.timeout_secs.map(Duration::from_secs);
    match services
        .pipeline
        .waiter
        .wait(tenant.tenant_id(), &body.job_ids, timeout)
        .await
    {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn stats(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    match services.pipeline.stores.jobs.stats(tenant.tenant_id()).await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn usage(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::UsageQuery>,
) -> axum::response::Response {
    match services
        .pipeline
        .stores
        .jobs
        .billable_count(tenant.tenant_id(), query.since)
        .await
    {
        Ok(billable) => (
            StatusCode::OK,
            Json(serde_json::json!({ "since": query.since, "billableSearches": billable })),
        )
            .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
