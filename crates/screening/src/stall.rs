//! Audit trail for stalled jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mediawatch_core::{CorrelationId, JobId, TenantId};

use crate::job::{JobStatus, SearchJob, SearchRequest};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StallAction {
    /// Returned to the dispatch pool.
    Requeued,
    /// Requeue budget exhausted; job deleted.
    Abandoned,
}

impl StallAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StallAction::Requeued => "requeued",
            StallAction::Abandoned => "abandoned",
        }
    }
}

/// Append-only record of one requeue or purge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StallLogEntry {
    pub action: StallAction,
    pub tenant_id: TenantId,
    pub job_id: JobId,
    pub prior_status: JobStatus,
    pub request: SearchRequest,
    pub correlation_id: Option<CorrelationId>,
    pub times_requeued: u32,
    pub reason: String,
    pub logged_at: DateTime<Utc>,
}

impl StallLogEntry {
    /// Build an entry from the job as it was *before* the action.
    pub fn for_job(
        job: &SearchJob,
        action: StallAction,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            action,
            tenant_id: job.tenant_id,
            job_id: job.id,
            prior_status: job.status,
            request: job.request(),
            correlation_id: job.correlation_id,
            times_requeued: job.times_requeued,
            reason: reason.into(),
            logged_at: now,
        }
    }
}
