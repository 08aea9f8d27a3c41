//! Batch dispatch: claim ready jobs, submit them, record correlation ids.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use mediawatch_core::{CorrelationId, TenantId};
use mediawatch_screening::{JobStatus, SearchCall, SearchJob, SearchRequest};

use crate::config::PipelineConfig;
use crate::error::StoreError;
use crate::jobs::{JobStore, SearchCallStore, Transition, TransitionOutcome};
use crate::provider::{ScreeningProvider, SubmissionRequest};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub selected: u32,
    pub claimed: u32,
    /// Lost the claim to another worker.
    pub contended: u32,
    /// Provider calls made.
    pub submitted: u32,
    pub started: u32,
    /// Refinement jobs attached to an open session without a new call.
    pub attached: u32,
    pub stopped: u32,
}

impl DispatchReport {
    pub fn absorb(&mut self, other: DispatchReport) {
        self.selected += other.selected;
        self.claimed += other.claimed;
        self.contended += other.contended;
        self.submitted += other.submitted;
        self.started += other.started;
        self.attached += other.attached;
        self.stopped += other.stopped;
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    jobs: Arc<dyn JobStore>,
    calls: Arc<dyn SearchCallStore>,
    provider: Arc<dyn ScreeningProvider>,
    batch_limit: usize,
}

impl Dispatcher {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        calls: Arc<dyn SearchCallStore>,
        provider: Arc<dyn ScreeningProvider>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            jobs,
            calls,
            provider,
            batch_limit: config.ready_batch_limit,
        }
    }

    pub fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    /// One bounded dispatch step. Claims finish before any submission is attempted.
    pub async fn dispatch_batch(&self, now: DateTime<Utc>) -> Result<DispatchReport, StoreError> {
        let mut report = DispatchReport::default();
        let ready = self.jobs.select_ready(self.batch_limit).await?;
        report.selected = ready.len() as u32;

        let mut claimed = Vec::with_capacity(ready.len());
        for job in ready {
            match self
                .jobs
                .transition(job.id, JobStatus::Ready, Transition::Claim, now)
                .await?
            {
                TransitionOutcome::Applied(job) => claimed.push(job),
                TransitionOutcome::Contended => report.contended += 1,
            }
        }
        report.claimed = claimed.len() as u32;

        for ((tenant_id, request), group) in group_by_request(claimed) {
            if request.refinement_term.is_some() {
                if let Some(call) = self
                    .calls
                    .find_open_session(tenant_id, &request.base())
                    .await?
                {
                    report.attached += self
                        .start_all(&group, call.correlation_id, now)
                        .await?;
                    for job in &group {
                        self.calls
                            .link_job(tenant_id, call.correlation_id, job.id)
                            .await?;
                    }
                    debug!(
                        tenant_id = %tenant_id,
                        correlation_id = %call.correlation_id,
                        jobs = group.len(),
                        "refinement attached to open session"
                    );
                    continue;
                }
            }

            let submission = SubmissionRequest::new(tenant_id, &request);
            match self.provider.submit(&submission).await {
                Ok(correlation_id) => {
                    report.submitted += 1;
                    let mut call = SearchCall::new(tenant_id, correlation_id, request, now);
                    call.job_ids = group.iter().map(|j| j.id).collect();
                    self.calls.record_call(call).await?;
                    report.started += self.start_all(&group, correlation_id, now).await?;
                }
                Err(e) => {
                    warn!(
                        tenant_id = %tenant_id,
                        jobs = group.len(),
                        error = %e,
                        "provider submission failed; stopping jobs"
                    );
                    for job in &group {
                        let outcome = self
                            .jobs
                            .transition(job.id, JobStatus::Queued, Transition::Stop, now)
                            .await?;
                        if outcome.is_applied() {
                            report.stopped += 1;
                        }
                    }
                }
            }
        }

        if report.selected > 0 {
            info!(
                selected = report.selected,
                claimed = report.claimed,
                submitted = report.submitted,
                attached = report.attached,
                stopped = report.stopped,
                "dispatch batch complete"
            );
        }
        Ok(report)
    }

    async fn start_all(
        &self,
        group: &[SearchJob],
        correlation_id: CorrelationId,
        now: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        let mut started = 0;
        for job in group {
            match self
                .jobs
                .transition(job.id, JobStatus::Queued, Transition::Start(correlation_id), now)
                .await?
            {
                TransitionOutcome::Applied(_) => started += 1,
                TransitionOutcome::Contended => warn!(
                    job_id = %job.id,
                    correlation_id = %correlation_id,
                    "job left queued before it could be started"
                ),
            }
        }
        Ok(started)
    }
}

/// Group claimed jobs by identical request, keeping claim order.
fn group_by_request(jobs: Vec<SearchJob>) -> Vec<((TenantId, SearchRequest), Vec<SearchJob>)> {
    let mut index: HashMap<(TenantId, SearchRequest), usize> = HashMap::new();
    let mut groups: Vec<((TenantId, SearchRequest), Vec<SearchJob>)> = Vec::new();
    for job in jobs {
        let key = (job.tenant_id, job.request());
        match index.get(&key) {
            Some(&i) => groups[i].1.push(job),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, vec![job]));
            }
        }
    }
    groups
}
