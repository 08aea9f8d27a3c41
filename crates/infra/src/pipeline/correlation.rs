//! Attaching interactive refinements to an existing provider session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use mediawatch_core::{CorrelationId, DomainError};
use mediawatch_screening::{EnqueueRequest, SearchCall, SearchJob};

use crate::error::PipelineError;
use crate::jobs::{JobStore, SearchCallStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachOutcome {
    pub job: SearchJob,
    /// Created when no job carried the correlation id yet.
    pub tracking_job: Option<SearchJob>,
    /// The call record was created here rather than by the dispatcher.
    pub manual_call: bool,
}

#[derive(Clone)]
pub struct Correlator {
    jobs: Arc<dyn JobStore>,
    calls: Arc<dyn SearchCallStore>,
}

impl Correlator {
    pub fn new(jobs: Arc<dyn JobStore>, calls: Arc<dyn SearchCallStore>) -> Self {
        Self { jobs, calls }
    }

    /// Store a refinement job already bound to `correlation_id`.
    ///
    /// The job skips dispatch and starts in `started`. If the session is unknown a
    /// manual call record and a tracking job for the base search are created, so
    /// the session is never left without an owning job.
    pub async fn attach_refinement(
        &self,
        request: EnqueueRequest,
        correlation_id: CorrelationId,
        now: DateTime<Utc>,
    ) -> Result<AttachOutcome, PipelineError> {
        let job = request.validate()?;
        if job.refinement_term.is_none() {
            return Err(DomainError::validation("refinement term is required").into());
        }
        let tenant_id = job.tenant_id;

        let existing = self
            .jobs
            .find_by_correlation(tenant_id, correlation_id)
            .await?;
        let tracking_job = if existing.is_empty() {
            let mut base = job.clone();
            base.refinement_term = None;
            base.manual = true;
            Some(self.jobs.insert(base.attached_to(correlation_id), now).await?)
        } else {
            None
        };

        let job = self.jobs.insert(job.attached_to(correlation_id), now).await?;
        let linked: Vec<_> = tracking_job
            .iter()
            .chain(std::iter::once(&job))
            .map(|j| j.id)
            .collect();

        let manual_call = match self.calls.find_call(tenant_id, correlation_id).await? {
            Some(_) => {
                for id in linked {
                    self.calls.link_job(tenant_id, correlation_id, id).await?;
                }
                false
            }
            None => {
                let mut call =
                    SearchCall::new(tenant_id, correlation_id, job.request().base(), now).manual();
                call.job_ids = linked;
                self.calls.record_call(call).await?;
                true
            }
        };

        info!(
            tenant_id = %tenant_id,
            correlation_id = %correlation_id,
            job_id = %job.id,
            manual_call,
            tracking_job = tracking_job.is_some(),
            "refinement attached"
        );
        Ok(AttachOutcome {
            job,
            tracking_job,
            manual_call,
        })
    }
}
