use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use mediawatch_core::DomainError;
use mediawatch_infra::{PipelineError, StoreError};

pub fn pipeline_error_to_response(err: PipelineError) -> axum::response::Response {
    match err {
        PipelineError::Validation(e) => domain_error_to_response(e),
        PipelineError::Store(e) => store_error_to_response(e),
        PipelineError::Callback(e) => {
            json_error(StatusCode::BAD_REQUEST, "malformed_callback", e.to_string())
        }
        PipelineError::Filter(e) => {
            json_error(StatusCode::BAD_GATEWAY, "filter_unavailable", e.to_string())
        }
        e @ PipelineError::LockLost(_) => {
            json_error(StatusCode::CONFLICT, "run_lock_lost", e.to_string())
        }
    }
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        StoreError::TenantIsolation(msg) => {
            json_error(StatusCode::FORBIDDEN, "tenant_isolation", msg)
        }
        StoreError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        StoreError::Corrupt(msg) => {
            tracing::error!(error = %msg, "corrupt row");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "corrupt data")
        }
        StoreError::Storage(msg) => {
            tracing::error!(error = %msg, "storage failure");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_error", "storage unavailable")
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let code = match err {
        DomainError::Validation(_) => "validation_error",
        DomainError::InvalidId(_) => "invalid_id",
        _ => "invariant_violation",
    };
    json_error(StatusCode::BAD_REQUEST, code, err.to_string())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
