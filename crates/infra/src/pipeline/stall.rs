//! Stall recovery: requeue jobs that stopped making progress, abandon the hopeless.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use mediawatch_screening::{SearchJob, StallAction, StallLogEntry};

use crate::config::PipelineConfig;
use crate::error::StoreError;
use crate::jobs::{JobStore, StallLog, Transition, TransitionOutcome};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StallReport {
    pub scanned: u32,
    pub requeued: u32,
    pub abandoned: u32,
    /// Moved on (callback, other worker) between the scan and the update.
    pub contended: u32,
}

#[derive(Clone)]
pub struct StallDetector {
    jobs: Arc<dyn JobStore>,
    log: Arc<dyn StallLog>,
    timeout: Duration,
    requeue_limit: u32,
    batch_limit: usize,
}

impl StallDetector {
    pub fn new(jobs: Arc<dyn JobStore>, log: Arc<dyn StallLog>, config: &PipelineConfig) -> Self {
        Self {
            jobs,
            log,
            timeout: config.stall_timeout,
            requeue_limit: config.requeue_limit,
            batch_limit: config.stall_batch_limit,
        }
    }

    /// Handle one batch of jobs dispatched more than the stall timeout ago.
    pub async fn process(&self, now: DateTime<Utc>) -> Result<StallReport, StoreError> {
        let mut report = StallReport::default();
        let stalled = self
            .jobs
            .find_stalled(now - self.timeout, self.batch_limit)
            .await?;
        report.scanned = stalled.len() as u32;

        for job in stalled {
            if job.times_requeued < self.requeue_limit {
                self.requeue(&job, now, &mut report).await?;
            } else {
                self.abandon(&job, now, &mut report).await?;
            }
        }

        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                requeued = report.requeued,
                abandoned = report.abandoned,
                contended = report.contended,
                "stalled jobs processed"
            );
        }
        Ok(report)
    }

    async fn requeue(
        &self,
        job: &SearchJob,
        now: DateTime<Utc>,
        report: &mut StallReport,
    ) -> Result<(), StoreError> {
        let outcome = self
            .jobs
            .transition(
                job.id,
                job.status,
                Transition::Requeue {
                    limit: self.requeue_limit,
                },
                now,
            )
            .await?;
        match outcome {
            TransitionOutcome::Applied(_) => {
                report.requeued += 1;
                let reason = format!("no progress in {} since {}", job.status.as_str(), job.created_at);
                self.log
                    .append(StallLogEntry::for_job(job, StallAction::Requeued, reason, now))
                    .await
            }
            TransitionOutcome::Contended => {
                report.contended += 1;
                Ok(())
            }
        }
    }

    async fn abandon(
        &self,
        job: &SearchJob,
        now: DateTime<Utc>,
        report: &mut StallReport,
    ) -> Result<(), StoreError> {
        if !self.jobs.delete(job.id, job.status).await? {
            report.contended += 1;
            return Ok(());
        }
        report.abandoned += 1;
        warn!(
            tenant_id = %job.tenant_id,
            job_id = %job.id,
            status = job.status.as_str(),
            times_requeued = job.times_requeued,
            "requeue limit reached; job abandoned"
        );
        let reason = format!("requeue limit {} reached", self.requeue_limit);
        self.log
            .append(StallLogEntry::for_job(job, StallAction::Abandoned, reason, now))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{InMemoryJobStore, InMemoryStallLog};
    use mediawatch_core::{CorrelationId, ProfileId, TenantId};
    use mediawatch_screening::{EnqueueRequest, JobStatus, NameOrigin, Priority, Subject};

    fn detector(limit: u32) -> (StallDetector, Arc<InMemoryJobStore>, Arc<InMemoryStallLog>) {
        let jobs = InMemoryJobStore::arc();
        let log = InMemoryStallLog::arc();
        let config = PipelineConfig {
            stall_timeout: Duration::hours(1),
            requeue_limit: limit,
            ..PipelineConfig::default()
        };
        (StallDetector::new(jobs.clone(), log.clone(), &config), jobs, log)
    }

    async fn started(jobs: &InMemoryJobStore, tenant: TenantId, at: DateTime<Utc>) -> SearchJob {
        let request = EnqueueRequest {
            tenant_id: tenant,
            provider_tenant_id: None,
            subject: Subject::Profile(ProfileId::new(1)),
            name_origin: NameOrigin::Name,
            search_term: "Acme Corp".to_string(),
            refinement_term: None,
            date_start: None,
            date_end: None,
            priority: Priority::Background,
            filter_id: None,
            exempt: false,
        };
        let job = request.validate().unwrap().attached_to(CorrelationId::new(77));
        jobs.insert(job, at).await.unwrap()
    }

    #[tokio::test]
    async fn stalled_job_is_requeued_and_logged() {
        let (detector, jobs, log) = detector(3);
        let tenant = TenantId::new();
        let t0 = Utc::now();
        let job = started(&jobs, tenant, t0).await;

        let report = detector.process(t0 + Duration::minutes(30)).await.unwrap();
        assert_eq!(report.scanned, 0);

        let later = t0 + Duration::hours(2);
        let report = detector.process(later).await.unwrap();
        assert_eq!(report.requeued, 1);

        let job = jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Ready);
        assert_eq!(job.times_requeued, 1);
        assert_eq!(job.correlation_id, None);
        assert_eq!(job.created_at, later);

        let entries = log.list(tenant, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, StallAction::Requeued);
        assert_eq!(entries[0].prior_status, JobStatus::Started);
        assert_eq!(entries[0].correlation_id, Some(CorrelationId::new(77)));
    }

    #[tokio::test]
    async fn job_at_limit_is_abandoned() {
        let (detector, jobs, log) = detector(0);
        let tenant = TenantId::new();
        let t0 = Utc::now();
        let job = started(&jobs, tenant, t0).await;

        let report = detector.process(t0 + Duration::hours(2)).await.unwrap();
        assert_eq!(report.abandoned, 1);
        assert!(jobs.get(job.id).await.unwrap().is_none());
        assert_eq!(log.list(tenant, 10).await.unwrap()[0].action, StallAction::Abandoned);
    }

    #[tokio::test]
    async fn ready_jobs_are_never_stalled() {
        let (detector, jobs, _) = detector(3);
        let t0 = Utc::now();
        let request = EnqueueRequest {
            tenant_id: TenantId::new(),
            provider_tenant_id: None,
            subject: Subject::Profile(ProfileId::new(1)),
            name_origin: NameOrigin::Name,
            search_term: "Acme Corp".to_string(),
            refinement_term: None,
            date_start: None,
            date_end: None,
            priority: Priority::Background,
            filter_id: None,
            exempt: false,
        };
        jobs.insert(request.validate().unwrap(), t0).await.unwrap();

        let report = detector.process(t0 + Duration::days(1)).await.unwrap();
        assert_eq!(report.scanned, 0);
    }
}
