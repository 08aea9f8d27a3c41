//! Job creation from filter candidates and interactive requests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use mediawatch_screening::{EnqueueRequest, Priority, SearchJob, Subject};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::filter::{Candidate, FilterAssignment, FilterProvider};
use crate::jobs::{JobStore, SearchCallStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub filters: u32,
    pub enqueued: u32,
    /// Skipped by only-new mode.
    pub suppressed: u32,
    /// Failed validation; never stored.
    pub rejected: u32,
    /// Filters whose candidates could not be read this run.
    pub failed_filters: u32,
}

#[derive(Clone)]
pub struct Enqueuer {
    jobs: Arc<dyn JobStore>,
    calls: Arc<dyn SearchCallStore>,
    filters: Arc<dyn FilterProvider>,
    page_size: usize,
}

impl Enqueuer {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        calls: Arc<dyn SearchCallStore>,
        filters: Arc<dyn FilterProvider>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            jobs,
            calls,
            filters,
            page_size: config.filter_page_size.max(1),
        }
    }

    /// Validate and store one job. Validation failures are returned, nothing is stored.
    pub async fn enqueue(
        &self,
        request: EnqueueRequest,
        now: DateTime<Utc>,
    ) -> Result<SearchJob, PipelineError> {
        let job = request.validate()?;
        let job = self.jobs.insert(job, now).await?;
        debug!(
            tenant_id = %job.tenant_id,
            job_id = %job.id,
            subject = %job.subject,
            priority = job.priority.as_i16(),
            "search job enqueued"
        );
        Ok(job)
    }

    /// Enqueue on behalf of a user. Always dispatched ahead of background work.
    pub async fn enqueue_interactive(
        &self,
        mut request: EnqueueRequest,
        now: DateTime<Utc>,
    ) -> Result<SearchJob, PipelineError> {
        request.priority = Priority::Interactive;
        self.enqueue(request, now).await
    }

    /// Drain every due filter into the job store, page by page.
    pub async fn load_pending(&self, now: DateTime<Utc>) -> Result<LoadReport, PipelineError> {
        let mut report = LoadReport::default();

        for assignment in self.filters.due_filters(now).await? {
            report.filters += 1;
            match self.load_filter(&assignment, now, &mut report).await {
                Ok(()) => self.filters.mark_loaded(&assignment, now).await?,
                Err(PipelineError::Filter(e)) => {
                    report.failed_filters += 1;
                    warn!(
                        tenant_id = %assignment.tenant_id,
                        filter_id = %assignment.filter_id,
                        error = %e,
                        "filter candidates unavailable; will retry next run"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            filters = report.filters,
            enqueued = report.enqueued,
            suppressed = report.suppressed,
            rejected = report.rejected,
            "pending searches loaded"
        );
        Ok(report)
    }

    async fn load_filter(
        &self,
        assignment: &FilterAssignment,
        now: DateTime<Utc>,
        report: &mut LoadReport,
    ) -> Result<(), PipelineError> {
        let mut after = None;
        loop {
            let page = self
                .filters
                .candidates(assignment, after, self.page_size)
                .await?;
            let Some(last) = page.last() else {
                return Ok(());
            };
            after = Some(last.cursor);
            let full_page = page.len() >= self.page_size;

            for candidate in page {
                let subject = Subject::from_parts(candidate.id_type, candidate.subject_id);
                if assignment.only_new
                    && self.calls.has_prior_call(assignment.tenant_id, subject).await?
                {
                    report.suppressed += 1;
                    continue;
                }

                match self.enqueue(request_for(assignment, &candidate), now).await {
                    Ok(_) => report.enqueued += 1,
                    Err(PipelineError::Validation(e)) => {
                        report.rejected += 1;
                        warn!(
                            tenant_id = %assignment.tenant_id,
                            filter_id = %assignment.filter_id,
                            subject = %subject,
                            error = %e,
                            "candidate rejected"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }

            if !full_page {
                return Ok(());
            }
        }
    }
}

fn request_for(assignment: &FilterAssignment, candidate: &Candidate) -> EnqueueRequest {
    EnqueueRequest {
        tenant_id: assignment.tenant_id,
        provider_tenant_id: assignment.provider_tenant_id,
        subject: Subject::from_parts(candidate.id_type, candidate.subject_id),
        name_origin: candidate.term_origin,
        search_term: candidate.term.clone(),
        refinement_term: assignment.refinement_term.clone(),
        date_start: assignment.date_start.clone(),
        date_end: assignment.date_end.clone(),
        priority: assignment.priority,
        filter_id: Some(assignment.filter_id),
        exempt: assignment.exempt,
    }
}
