use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use mediawatch_core::ScreeningId;
use mediawatch_screening::{Subject, SubjectKind};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/:kind/:id/counts", get(counts))
        .route("/:kind/:id/summary", get(summary))
        .route("/:kind/:id/results", get(results))
}

fn parse_subject(kind: &str, id: i64) -> Result<Subject, axum::response::Response> {
    let kind: SubjectKind = kind.parse().map_err(errors::domain_error_to_response)?;
    Ok(Subject::from_parts(kind, id))
}

/// Live adjudication counts, optionally scoped to one screening round.
pub async fn counts(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path((kind, id)): Path<(String, i64)>,
    Query(query): Query<dto::CountsQuery>,
) -> axum::response::Response {
    let subject = match parse_subject(&kind, id) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let screening_id = query.screening_id.map(ScreeningId::new);
    match services
        .pipeline
        .aggregator
        .counts(tenant.tenant_id(), subject, screening_id)
        .await
    {
        Ok(counts) => (StatusCode::OK, Json(counts)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Cached list-view counters, including the pending-review counter.
pub async fn summary(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path((kind, id)): Path<(String, i64)>,
) -> axum::response::Response {
    let subject = match parse_subject(&kind, id) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match services
        .pipeline
        .stores
        .results
        .subject_summary(tenant.tenant_id(), subject)
        .await
    {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn results(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path((kind, id)): Path<(String, i64)>,
    Query(query): Query<dto::ResultsQuery>,
) -> axum::response::Response {
    let subject = match parse_subject(&kind, id) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match services
        .pipeline
        .stores
        .results
        .list_for_subject(tenant.tenant_id(), subject, query.include_deleted)
        .await
    {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
