//! Inbound callback handling: dedup, store, finish jobs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use mediawatch_core::{CorrelationId, JobId};
use mediawatch_screening::{JobStatus, NewResultRecord};

use crate::adjudication::AdjudicationAggregator;
use crate::error::PipelineError;
use crate::jobs::{JobStore, Transition};
use crate::provider::CallbackPayload;
use crate::results::ResultStore;
use crate::tenants::TenantSettingsStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub correlation_id: CorrelationId,
    /// Job the stored results are attributed to.
    pub job_id: JobId,
    pub received: u32,
    pub inserted: u32,
    pub skipped: u32,
    pub pending_review_added: u32,
    pub jobs_finished: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum IngestOutcome {
    Ingested(IngestReport),
    /// Nothing to attribute the payload to; acknowledged and discarded.
    Dropped { reason: String },
}

#[derive(Clone)]
pub struct Ingestor {
    jobs: Arc<dyn JobStore>,
    results: Arc<dyn ResultStore>,
    tenants: Arc<dyn TenantSettingsStore>,
    aggregator: AdjudicationAggregator,
}

impl Ingestor {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        results: Arc<dyn ResultStore>,
        tenants: Arc<dyn TenantSettingsStore>,
        aggregator: AdjudicationAggregator,
    ) -> Self {
        Self {
            jobs,
            results,
            tenants,
            aggregator,
        }
    }

    /// Process one callback. Malformed payloads are rejected whole before anything is
    /// written; a redelivered payload inserts nothing new.
    pub async fn ingest(
        &self,
        payload: CallbackPayload,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome, PipelineError> {
        let hits = payload.validate()?;
        let tenant_id = payload.tenant_id;
        let correlation_id = payload.correlation_id;

        let jobs = self
            .jobs
            .find_by_correlation(tenant_id, correlation_id)
            .await?;
        let started: Vec<_> = jobs
            .iter()
            .filter(|j| j.status == JobStatus::Started)
            .collect();
        let Some(owner) = started.first() else {
            let reason = if jobs.is_empty() {
                "no job carries this correlation id"
            } else {
                "no started job for this correlation id"
            };
            warn!(
                tenant_id = %tenant_id,
                correlation_id = %correlation_id,
                hits = hits.len(),
                reason,
                "callback dropped"
            );
            return Ok(IngestOutcome::Dropped {
                reason: reason.to_string(),
            });
        };

        let settings = self.tenants.get(tenant_id).await?;
        let received = hits.len() as u32;
        let records = hits
            .into_iter()
            .map(|hit| NewResultRecord::new(tenant_id, owner.id, owner.subject, hit))
            .collect();
        let outcome = self
            .results
            .insert_deduplicated(tenant_id, owner.subject, records, settings, now)
            .await?;

        let mut jobs_finished = 0;
        for job in &started {
            let finished = self
                .jobs
                .transition(job.id, JobStatus::Started, Transition::Finish, now)
                .await?;
            if finished.is_applied() {
                jobs_finished += 1;
            }
        }

        if let Err(e) = self
            .aggregator
            .refresh_summary(tenant_id, owner.subject, now)
            .await
        {
            warn!(
                tenant_id = %tenant_id,
                subject = %owner.subject,
                error = %e,
                "summary refresh failed after ingest"
            );
        }

        let report = IngestReport {
            correlation_id,
            job_id: owner.id,
            received,
            inserted: outcome.inserted.len() as u32,
            skipped: outcome.skipped,
            pending_review_added: outcome.pending_review_added,
            jobs_finished,
        };
        info!(
            tenant_id = %tenant_id,
            correlation_id = %correlation_id,
            job_id = %owner.id,
            received,
            inserted = report.inserted,
            skipped = report.skipped,
            "callback ingested"
        );
        Ok(IngestOutcome::Ingested(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjudication::InMemoryDeterminationStore;
    use crate::jobs::InMemoryJobStore;
    use crate::provider::{CallbackError, CallbackHit};
    use crate::results::InMemoryResultStore;
    use crate::tenants::InMemoryTenantSettings;
    use mediawatch_core::{ProfileId, TenantId};
    use mediawatch_screening::{EnqueueRequest, NameOrigin, Priority, SearchJob, Subject};

    struct Fixture {
        jobs: Arc<InMemoryJobStore>,
        results: Arc<InMemoryResultStore>,
        ingestor: Ingestor,
    }

    fn fixture() -> Fixture {
        let jobs = InMemoryJobStore::arc();
        let results = InMemoryResultStore::arc();
        let aggregator = AdjudicationAggregator::new(results.clone(), InMemoryDeterminationStore::arc());
        let ingestor = Ingestor::new(
            jobs.clone(),
            results.clone(),
            InMemoryTenantSettings::arc(),
            aggregator,
        );
        Fixture {
            jobs,
            results,
            ingestor,
        }
    }

    async fn started_job(f: &Fixture, tenant: TenantId, corr: i64) -> SearchJob {
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
        let job = request.validate().unwrap().attached_to(CorrelationId::new(corr));
        f.jobs.insert(job, Utc::now()).await.unwrap()
    }

    fn hit(url: &str) -> CallbackHit {
        CallbackHit {
            title: Some("Acme fined".to_string()),
            url: Some(url.to_string()),
            snippet: Some("...".to_string()),
            published_date: Some("2024-03-01".to_string()),
            relevance: Some(0.9),
        }
    }

    fn payload(tenant: TenantId, corr: i64, hits: Vec<CallbackHit>) -> CallbackPayload {
        CallbackPayload {
            correlation_id: CorrelationId::new(corr),
            tenant_id: tenant,
            hits,
        }
    }

    #[tokio::test]
    async fn stores_hits_and_finishes_jobs() {
        let f = fixture();
        let tenant = TenantId::new();
        let job = started_job(&f, tenant, 77).await;

        let outcome = f
            .ingestor
            .ingest(payload(tenant, 77, vec![hit("http://a"), hit("http://b")]), Utc::now())
            .await
            .unwrap();
        let IngestOutcome::Ingested(report) = outcome else {
            panic!("expected ingest");
        };
        assert_eq!(report.inserted, 2);
        assert_eq!(report.pending_review_added, 2);
        assert_eq!(report.jobs_finished, 1);
        assert_eq!(f.jobs.get(job.id).await.unwrap().unwrap().status, JobStatus::Finished);
    }

    #[tokio::test]
    async fn unknown_correlation_is_dropped() {
        let f = fixture();
        let outcome = f
            .ingestor
            .ingest(payload(TenantId::new(), 9, vec![hit("http://a")]), Utc::now())
            .await
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::Dropped { .. }));
    }

    #[tokio::test]
    async fn malformed_payload_writes_nothing() {
        let f = fixture();
        let tenant = TenantId::new();
        let job = started_job(&f, tenant, 5).await;
        let mut bad = hit("http://b");
        bad.url = None;

        let err = f
            .ingestor
            .ingest(payload(tenant, 5, vec![hit("http://a"), bad]), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Callback(CallbackError::MissingField { index: 1, field: "url" })
        ));
        assert!(f.results.list_for_subject(tenant, job.subject, true).await.unwrap().is_empty());
        assert_eq!(f.jobs.get(job.id).await.unwrap().unwrap().status, JobStatus::Started);
    }

    #[tokio::test]
    async fn redelivery_after_finish_is_dropped() {
        let f = fixture();
        let tenant = TenantId::new();
        started_job(&f, tenant, 3).await;
        let body = payload(tenant, 3, vec![hit("http://a")]);
        f.ingestor.ingest(body.clone(), Utc::now()).await.unwrap();

        let again = f.ingestor.ingest(body, Utc::now()).await.unwrap();
        assert!(matches!(again, IngestOutcome::Dropped { .. }));
    }
}
