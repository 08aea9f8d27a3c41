//! Outbound provider calls and the jobs they service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mediawatch_core::{CorrelationId, JobId, TenantId};

use crate::job::SearchRequest;

/// One outbound call to the provider. Several jobs may share it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCall {
    pub tenant_id: TenantId,
    pub correlation_id: CorrelationId,
    pub request: SearchRequest,
    /// Opened outside the dispatcher (interactive refinement on an unknown session).
    pub manual: bool,
    pub job_ids: Vec<JobId>,
    pub created_at: DateTime<Utc>,
}

impl SearchCall {
    pub fn new(
        tenant_id: TenantId,
        correlation_id: CorrelationId,
        request: SearchRequest,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id,
            correlation_id,
            request,
            manual: false,
            job_ids: Vec::new(),
            created_at: now,
        }
    }

    pub fn manual(mut self) -> Self {
        self.manual = true;
        self
    }
}
