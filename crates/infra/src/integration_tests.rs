//! End-to-end pipeline tests over the in-memory stores.
//!
//! Enqueue → run (load, stall, dispatch, cleanup) → callback → results and counts.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use mediawatch_core::{CorrelationId, ProfileId, TenantId};
    use mediawatch_screening::{
        DedupMode, EnqueueRequest, JobStatus, NameOrigin, Priority, StallAction,
        StuckAssessment, Subject,
    };

    use crate::alert::RecordingAlertChannel;
    use crate::clock::{Clock, ManualClock};
    use crate::config::PipelineConfig;
    use crate::filter::InMemoryFilterProvider;
    use crate::jobs::{Transition, TransitionOutcome};
    use crate::pipeline::{IngestOutcome, Pipeline, RunOutcome};
    use crate::provider::{CallbackHit, CallbackPayload, ProviderError, ScriptedProvider};
    use crate::stores::Stores;
    use crate::tenants::TenantSettings;

    struct Harness {
        pipeline: Pipeline,
        clock: Arc<ManualClock>,
        provider: Arc<ScriptedProvider>,
        alerts: Arc<RecordingAlertChannel>,
    }

    fn harness(config: PipelineConfig) -> Harness {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let provider = Arc::new(ScriptedProvider::starting_at(77));
        let alerts = Arc::new(RecordingAlertChannel::default());
        let pipeline = Pipeline::new(
            Stores::in_memory(),
            InMemoryFilterProvider::arc(),
            provider.clone(),
            alerts.clone(),
            clock.clone(),
            config,
        );
        Harness {
            pipeline,
            clock,
            provider,
            alerts,
        }
    }

    fn default_harness() -> Harness {
        harness(PipelineConfig {
            stall_timeout: Duration::hours(1),
            stuck_threshold: Duration::hours(2),
            requeue_limit: 3,
            ..PipelineConfig::default()
        })
    }

    fn acme(tenant: TenantId) -> EnqueueRequest {
        EnqueueRequest {
            tenant_id: tenant,
            provider_tenant_id: None,
            subject: Subject::Profile(ProfileId::new(42)),
            name_origin: NameOrigin::Name,
            search_term: "Acme Corp".to_string(),
            refinement_term: None,
            date_start: None,
            date_end: None,
            priority: Priority::Background,
            filter_id: None,
            exempt: false,
        }
    }

    fn story(url: &str, published: &str) -> CallbackHit {
        CallbackHit {
            title: Some("Acme Corp under investigation".to_string()),
            url: Some(url.to_string()),
            snippet: Some("Regulators opened an inquiry".to_string()),
            published_date: Some(published.to_string()),
            relevance: Some(0.8),
        }
    }

    fn callback(tenant: TenantId, corr: i64, hits: Vec<CallbackHit>) -> CallbackPayload {
        CallbackPayload {
            correlation_id: CorrelationId::new(corr),
            tenant_id: tenant,
            hits,
        }
    }

    async fn run(h: &Harness) -> RunOutcome {
        h.pipeline.coordinator.run_once().await.unwrap()
    }

    #[tokio::test]
    async fn enqueue_dispatch_callback_raises_pending_review() {
        let h = default_harness();
        let tenant = TenantId::new();
        let job = h
            .pipeline
            .enqueuer
            .enqueue_interactive(acme(tenant), h.clock.now())
            .await
            .unwrap();

        assert!(matches!(run(&h).await, RunOutcome::Completed(_)));
        let job = h.pipeline.stores.jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Started);
        assert_eq!(job.correlation_id, Some(CorrelationId::new(77)));
        assert_eq!(h.provider.submissions()[0].subject_term, "Acme Corp");

        let outcome = h
            .pipeline
            .ingestor
            .ingest(
                callback(tenant, 77, vec![story("http://news/acme", "2024-05-02")]),
                h.clock.now(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::Ingested(_)));

        let job = h.pipeline.stores.jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Finished);
        let summary = h
            .pipeline
            .stores
            .results
            .subject_summary(tenant, job.subject)
            .await
            .unwrap();
        assert_eq!(summary.pending_review, 1);
        assert_eq!(summary.counts.undetermined, 1);
    }

    #[tokio::test]
    async fn stalled_job_is_requeued_and_redispatched() {
        let h = default_harness();
        let tenant = TenantId::new();
        let job = h.pipeline.enqueuer.enqueue(acme(tenant), h.clock.now()).await.unwrap();
        run(&h).await;

        h.clock.advance(Duration::hours(2));
        let RunOutcome::Completed(report) = run(&h).await else {
            panic!("expected a completed run");
        };
        assert_eq!(report.stalled.requeued, 1);
        assert_eq!(report.dispatch.submitted, 1);

        let job = h.pipeline.stores.jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.times_requeued, 1);
        assert_eq!(job.status, JobStatus::Started);
        assert_eq!(job.correlation_id, Some(CorrelationId::new(78)));

        let log = h.pipeline.stores.stall_log.list(tenant, 10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].correlation_id, Some(CorrelationId::new(77)));
    }

    #[tokio::test]
    async fn job_is_requeued_up_to_the_limit_then_abandoned() {
        let h = harness(PipelineConfig {
            stall_timeout: Duration::hours(1),
            requeue_limit: 2,
            ..PipelineConfig::default()
        });
        let tenant = TenantId::new();
        let job = h.pipeline.enqueuer.enqueue(acme(tenant), h.clock.now()).await.unwrap();
        run(&h).await;

        for _ in 0..3 {
            h.clock.advance(Duration::hours(2));
            run(&h).await;
        }

        assert!(h.pipeline.stores.jobs.get(job.id).await.unwrap().is_none());
        let actions: Vec<_> = h
            .pipeline
            .stores
            .stall_log
            .list(tenant, 10)
            .await
            .unwrap()
            .into_iter()
            .rev()
            .map(|e| (e.action, e.times_requeued))
            .collect();
        assert_eq!(
            actions,
            vec![
                (StallAction::Requeued, 0),
                (StallAction::Requeued, 1),
                (StallAction::Abandoned, 2),
            ]
        );
    }

    #[tokio::test]
    async fn stuck_run_is_released_and_alerted() {
        let h = default_harness();
        h.pipeline.stores.run_lock.try_acquire(h.clock.now()).await.unwrap();

        h.clock.advance(Duration::hours(3));
        assert_eq!(
            run(&h).await,
            RunOutcome::Skipped {
                assessment: StuckAssessment::SlowButProgressing
            }
        );

        h.clock.advance(Duration::minutes(15));
        let RunOutcome::Recovered { alert } = run(&h).await else {
            panic!("expected recovery");
        };
        assert_eq!(alert.detected_at, h.clock.now());
        assert_eq!(alert.phases.len(), 5);
        assert_eq!(h.alerts.raised().len(), 1);
        assert!(!h.pipeline.stores.run_lock.status().await.unwrap().running);
    }

    #[tokio::test]
    async fn a_job_is_claimed_and_submitted_once() {
        let h = default_harness();
        let tenant = TenantId::new();
        let job = h.pipeline.enqueuer.enqueue(acme(tenant), h.clock.now()).await.unwrap();
        let jobs = &h.pipeline.stores.jobs;

        let first = jobs.select_ready(10).await.unwrap();
        let second = jobs.select_ready(10).await.unwrap();
        assert_eq!(first, second);

        let now = h.clock.now();
        let a = jobs.transition(job.id, JobStatus::Ready, Transition::Claim, now).await.unwrap();
        let b = jobs.transition(job.id, JobStatus::Ready, Transition::Claim, now).await.unwrap();
        assert!(a.is_applied());
        assert_eq!(b, TransitionOutcome::Contended);

        // Back to ready, then two overlapping runs: only one may hold the lock.
        jobs.transition(job.id, JobStatus::Queued, Transition::Stop, now).await.unwrap();
        jobs.transition(job.id, JobStatus::Stopped, Transition::Requeue { limit: 3 }, now)
            .await
            .unwrap();
        let (x, y) = tokio::join!(run(&h), run(&h));
        let completed = [&x, &y]
            .iter()
            .filter(|o| matches!(o, RunOutcome::Completed(_)))
            .count();
        assert!(completed >= 1);
        assert_eq!(h.provider.submissions().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_callback_is_idempotent() {
        let h = default_harness();
        let tenant = TenantId::new();
        let job = h.pipeline.enqueuer.enqueue(acme(tenant), h.clock.now()).await.unwrap();
        run(&h).await;

        let body = callback(
            tenant,
            77,
            vec![
                story("http://news/1", "2024-05-02"),
                story("http://news/2", "2024-05-03"),
            ],
        );
        h.pipeline.ingestor.ingest(body.clone(), h.clock.now()).await.unwrap();
        let again = h.pipeline.ingestor.ingest(body, h.clock.now()).await.unwrap();
        assert!(matches!(again, IngestOutcome::Dropped { .. }));

        let stored = h
            .pipeline
            .stores
            .results
            .list_for_subject(tenant, job.subject, true)
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
        let summary = h.pipeline.stores.results.subject_summary(tenant, job.subject).await.unwrap();
        assert_eq!(summary.pending_review, 2);
    }

    async fn revised_story_inserted(mode: DedupMode) -> u32 {
        let h = default_harness();
        let tenant = TenantId::new();
        h.pipeline
            .stores
            .tenants
            .put(
                tenant,
                TenantSettings {
                    dedup_mode: mode,
                    review_required: true,
                },
            )
            .await
            .unwrap();

        h.pipeline.enqueuer.enqueue(acme(tenant), h.clock.now()).await.unwrap();
        run(&h).await;
        h.pipeline
            .ingestor
            .ingest(callback(tenant, 77, vec![story("http://news/1", "2024-05-02")]), h.clock.now())
            .await
            .unwrap();

        h.pipeline.enqueuer.enqueue(acme(tenant), h.clock.now()).await.unwrap();
        run(&h).await;
        let outcome = h
            .pipeline
            .ingestor
            .ingest(callback(tenant, 78, vec![story("http://news/1", "2024-06-10")]), h.clock.now())
            .await
            .unwrap();
        match outcome {
            IngestOutcome::Ingested(report) => report.inserted,
            other => panic!("expected ingest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn revision_hiding_tenants_skip_republished_stories() {
        assert_eq!(revised_story_inserted(DedupMode::Standard).await, 1);
        assert_eq!(revised_story_inserted(DedupMode::HideRevisions).await, 0);
    }

    #[tokio::test]
    async fn refinement_attaches_to_the_live_session() {
        let h = default_harness();
        let tenant = TenantId::new();
        let base = h.pipeline.enqueuer.enqueue(acme(tenant), h.clock.now()).await.unwrap();
        run(&h).await;

        let mut refine = acme(tenant);
        refine.refinement_term = Some("fraud".to_string());
        let attached = h
            .pipeline
            .correlator
            .attach_refinement(refine, CorrelationId::new(77), h.clock.now())
            .await
            .unwrap();
        assert!(!attached.manual_call);
        assert_eq!(attached.job.status, JobStatus::Started);

        let IngestOutcome::Ingested(report) = h
            .pipeline
            .ingestor
            .ingest(callback(tenant, 77, vec![story("http://news/9", "2024-05-02")]), h.clock.now())
            .await
            .unwrap()
        else {
            panic!("expected ingest");
        };
        assert_eq!(report.jobs_finished, 2);
        assert_eq!(report.job_id, attached.job.id);

        let jobs = &h.pipeline.stores.jobs;
        assert_eq!(jobs.get(base.id).await.unwrap().unwrap().status, JobStatus::Finished);
        assert_eq!(h.provider.submissions().len(), 1);
    }

    #[tokio::test]
    async fn submission_failure_stops_then_recovers() {
        let h = default_harness();
        let tenant = TenantId::new();
        h.provider.fail_next(ProviderError::Rejected {
            status: 503,
            body: "maintenance".to_string(),
        });
        let job = h.pipeline.enqueuer.enqueue(acme(tenant), h.clock.now()).await.unwrap();

        let RunOutcome::Completed(report) = run(&h).await else {
            panic!("expected a completed run");
        };
        assert_eq!(report.dispatch.stopped, 1);
        let stopped = h.pipeline.stores.jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(stopped.status, JobStatus::Stopped);
        assert!(stopped.check_invariants().is_ok());

        h.clock.advance(Duration::hours(2));
        run(&h).await;
        let job = h.pipeline.stores.jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Started);
        assert_eq!(job.times_requeued, 1);
    }
}
