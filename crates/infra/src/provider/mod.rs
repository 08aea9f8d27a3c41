//! The external screening provider: outbound submission and inbound callbacks.

pub mod callback;
pub mod http;
pub mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use mediawatch_core::{CorrelationId, TenantId};
use mediawatch_screening::SearchRequest;

pub use callback::{CallbackError, CallbackHit, CallbackPayload};
pub use http::HttpScreeningProvider;
pub use scripted::ScriptedProvider;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("provider rejected the search ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("provider unreachable: {0}")]
    Unreachable(String),
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireDateRange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    pub end: String,
}

/// Outbound search submission body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    pub subject_term: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refinement_term: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<WireDateRange>,
    /// Echoed back on the callback; always the owning tenant.
    pub tenant_id: TenantId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_tenant_id: Option<TenantId>,
}

impl SubmissionRequest {
    pub fn new(tenant_id: TenantId, request: &SearchRequest) -> Self {
        Self {
            subject_term: request.search_term.clone(),
            refinement_term: request.refinement_term.clone(),
            date_range: request.date_range.map(|r| WireDateRange {
                start: r.start.map(|d| d.format("%Y-%m-%d").to_string()),
                end: r.end.format("%Y-%m-%d").to_string(),
            }),
            tenant_id,
            provider_tenant_id: request.provider_tenant_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    pub correlation_id: CorrelationId,
}

/// Fire-and-forget submission: the provider answers with a correlation id now and
/// delivers results later through the callback endpoint.
#[async_trait]
pub trait ScreeningProvider: Send + Sync {
    async fn submit(&self, request: &SubmissionRequest) -> Result<CorrelationId, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use mediawatch_core::ProfileId;
    use mediawatch_screening::{DateRange, Subject};

    #[test]
    fn submission_wire_shape() {
        let tenant = TenantId::new();
        let request = SearchRequest {
            subject: Subject::Profile(ProfileId::new(1)),
            search_term: "Acme Corp".to_string(),
            refinement_term: None,
            date_range: Some(DateRange {
                start: None,
                end: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
            }),
            provider_tenant_id: None,
        };

        let json = serde_json::to_value(SubmissionRequest::new(tenant, &request)).unwrap();
        assert_eq!(json["subjectTerm"], "Acme Corp");
        assert_eq!(json["dateRange"]["end"], "2024-06-30");
        assert!(json["dateRange"].get("start").is_none());
        assert!(json.get("refinementTerm").is_none());
        assert_eq!(json["tenantId"], tenant.to_string());
    }
}
