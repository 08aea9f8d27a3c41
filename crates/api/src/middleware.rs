use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use mediawatch_core::TenantId;

use crate::context::TenantContext;

pub const TENANT_HEADER: &str = "x-tenant-id";

/// Resolve the calling tenant from the `X-Tenant-Id` header. Requests without a valid
/// tenant never reach a tenant-scoped handler.
pub async fn tenant_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let tenant_id = extract_tenant(req.headers())?;
    req.extensions_mut().insert(TenantContext::new(tenant_id));
    Ok(next.run(req).await)
}

fn extract_tenant(headers: &HeaderMap) -> Result<TenantId, StatusCode> {
    let header = headers
        .get(TENANT_HEADER)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let raw = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?.trim();
    if raw.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    raw.parse().map_err(|_| StatusCode::BAD_REQUEST)
}
