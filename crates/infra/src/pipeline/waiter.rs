//! Synchronous completion wait for interactive callers.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::debug;

use mediawatch_core::{JobId, TenantId};
use mediawatch_screening::JobStatus;

use crate::config::PipelineConfig;
use crate::error::StoreError;
use crate::jobs::JobStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReport {
    pub finished: Vec<JobId>,
    pub outstanding: Vec<JobId>,
    /// Unknown to this tenant, or deleted (abandoned or purged) while waiting.
    pub missing: Vec<JobId>,
    pub timed_out: bool,
}

impl CompletionReport {
    pub fn is_complete(&self) -> bool {
        self.outstanding.is_empty()
    }
}

#[derive(Clone)]
pub struct CompletionWaiter {
    jobs: Arc<dyn JobStore>,
    ceiling: Duration,
    poll_interval: Duration,
}

impl CompletionWaiter {
    pub fn new(jobs: Arc<dyn JobStore>, config: &PipelineConfig) -> Self {
        Self {
            jobs,
            ceiling: config.wait_ceiling,
            poll_interval: config.wait_poll_interval,
        }
    }

    /// Poll until every job is finished, gone, or the ceiling passes. `timeout` is
    /// clamped to the configured ceiling.
    pub async fn wait(
        &self,
        tenant_id: TenantId,
        job_ids: &[JobId],
        timeout: Option<Duration>,
    ) -> Result<CompletionReport, StoreError> {
        let budget = timeout.map_or(self.ceiling, |t| t.min(self.ceiling));
        let deadline = Instant::now() + budget;

        loop {
            let report = self.check(tenant_id, job_ids).await?;
            if report.is_complete() {
                return Ok(report);
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(
                    tenant_id = %tenant_id,
                    outstanding = report.outstanding.len(),
                    "completion wait timed out"
                );
                return Ok(CompletionReport {
                    timed_out: true,
                    ..report
                });
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn check(
        &self,
        tenant_id: TenantId,
        job_ids: &[JobId],
    ) -> Result<CompletionReport, StoreError> {
        let statuses = self.jobs.statuses(tenant_id, job_ids).await?;
        let mut report = CompletionReport::default();
        for id in job_ids {
            match statuses.get(id) {
                Some(JobStatus::Finished) => report.finished.push(*id),
                Some(_) => report.outstanding.push(*id),
                None => report.missing.push(*id),
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{InMemoryJobStore, Transition};
    use chrono::Utc;
    use mediawatch_core::{CorrelationId, ProfileId};
    use mediawatch_screening::{EnqueueRequest, NameOrigin, Priority, Subject};

    fn config() -> PipelineConfig {
        PipelineConfig {
            wait_ceiling: Duration::from_secs(5),
            wait_poll_interval: Duration::from_millis(100),
            ..PipelineConfig::default()
        }
    }

    async fn started(jobs: &InMemoryJobStore, tenant: TenantId) -> JobId {
        let request = EnqueueRequest {
            tenant_id: tenant,
            provider_tenant_id: None,
            subject: Subject::Profile(ProfileId::new(1)),
            name_origin: NameOrigin::Name,
            search_term: "Acme Corp".to_string(),
            refinement_term: None,
            date_start: None,
            date_end: None,
            priority: Priority::Interactive,
            filter_id: None,
            exempt: false,
        };
        let job = request.validate().unwrap().attached_to(CorrelationId::new(1));
        jobs.insert(job, Utc::now()).await.unwrap().id
    }

    #[tokio::test(start_paused = true)]
    async fn returns_once_all_jobs_finish() {
        let jobs = InMemoryJobStore::arc();
        let tenant = TenantId::new();
        let id = started(&jobs, tenant).await;
        let waiter = CompletionWaiter::new(jobs.clone(), &config());

        let finisher = {
            let jobs = jobs.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(350)).await;
                jobs.transition(id, JobStatus::Started, Transition::Finish, Utc::now())
                    .await
                    .unwrap();
            })
        };

        let report = waiter.wait(tenant, &[id], None).await.unwrap();
        finisher.await.unwrap();
        assert_eq!(report.finished, vec![id]);
        assert!(!report.timed_out);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_at_the_ceiling() {
        let jobs = InMemoryJobStore::arc();
        let tenant = TenantId::new();
        let id = started(&jobs, tenant).await;
        let waiter = CompletionWaiter::new(jobs, &config());

        let began = Instant::now();
        let report = waiter
            .wait(tenant, &[id], Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert!(report.timed_out);
        assert_eq!(report.outstanding, vec![id]);
        assert!(began.elapsed() <= Duration::from_secs(6));
    }

    #[tokio::test]
    async fn foreign_and_unknown_jobs_are_missing() {
        let jobs = InMemoryJobStore::arc();
        let id = started(&jobs, TenantId::new()).await;
        let waiter = CompletionWaiter::new(jobs, &config());

        let report = waiter
            .wait(TenantId::new(), &[id, JobId::new(999)], None)
            .await
            .unwrap();
        assert!(report.is_complete());
        assert_eq!(report.missing.len(), 2);
    }
}
