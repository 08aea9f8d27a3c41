//! One pipeline run: load, stall recovery, dispatch, cleanup, under the run lock.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use mediawatch_core::RunId;
use mediawatch_screening::{Phase, RunStatus, StuckAssessment};

use crate::alert::{AlertChannel, StuckRunAlert};
use crate::clock::Clock;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::jobs::JobStore;
use crate::run_lock::{LeaseOutcome, LockAttempt, PhaseEdge, RunLock};

use super::dispatcher::{DispatchReport, Dispatcher};
use super::enqueuer::{Enqueuer, LoadReport};
use super::stall::{StallDetector, StallReport};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub load: LoadReport,
    pub stalled: StallReport,
    pub dispatch: DispatchReport,
    pub dispatch_rounds: u32,
    pub purged: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum RunOutcome {
    Completed(RunReport),
    /// Another run holds the lock and is not considered stuck.
    Skipped { assessment: StuckAssessment },
    /// The previous run was stuck; its lock was released and an alert raised.
    Recovered { alert: StuckRunAlert },
    /// This run was judged stuck by another runner and stopped at the next phase boundary.
    Preempted { run_id: RunId },
}

#[derive(Clone)]
pub struct RunCoordinator {
    clock: Arc<dyn Clock>,
    lock: Arc<dyn RunLock>,
    jobs: Arc<dyn JobStore>,
    alerts: Arc<dyn AlertChannel>,
    enqueuer: Enqueuer,
    stall: StallDetector,
    dispatcher: Dispatcher,
    config: PipelineConfig,
}

impl RunCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: Arc<dyn Clock>,
        lock: Arc<dyn RunLock>,
        jobs: Arc<dyn JobStore>,
        alerts: Arc<dyn AlertChannel>,
        enqueuer: Enqueuer,
        stall: StallDetector,
        dispatcher: Dispatcher,
        config: PipelineConfig,
    ) -> Self {
        Self {
            clock,
            lock,
            jobs,
            alerts,
            enqueuer,
            stall,
            dispatcher,
            config,
        }
    }

    /// Execute one run if the lock is free. The lock is released whatever the phases return.
    pub async fn run_once(&self) -> Result<RunOutcome, PipelineError> {
        match self.lock.try_acquire(self.clock.now()).await? {
            LockAttempt::Held(status) => self.inspect_held(status).await,
            LockAttempt::Acquired { run_id, .. } => {
                info!(run_id = %run_id, "pipeline run started");
                let result = self.run_phases(run_id).await;
                let released = self.lock.release(run_id, self.clock.now()).await;
                let report = match result {
                    Ok(report) => report,
                    Err(PipelineError::LockLost(run_id)) => {
                        warn!(run_id = %run_id, "run lock taken over; stopping run");
                        return Ok(RunOutcome::Preempted { run_id });
                    }
                    Err(e) => return Err(e),
                };
                if released? == LeaseOutcome::NotHolder {
                    warn!(run_id = %run_id, "run lock taken over before release");
                    return Ok(RunOutcome::Preempted { run_id });
                }
                info!(
                    run_id = %run_id,
                    enqueued = report.load.enqueued,
                    requeued = report.stalled.requeued,
                    abandoned = report.stalled.abandoned,
                    submitted = report.dispatch.submitted,
                    purged = report.purged,
                    "pipeline run finished"
                );
                Ok(RunOutcome::Completed(report))
            }
        }
    }

    async fn run_phases(&self, run_id: RunId) -> Result<RunReport, PipelineError> {
        let mut report = RunReport::default();

        self.stamp(run_id, Phase::PendingSearchLoad, PhaseEdge::Start).await?;
        report.load = self.enqueuer.load_pending(self.clock.now()).await?;
        self.stamp(run_id, Phase::PendingSearchLoad, PhaseEdge::Finish).await?;

        self.stamp(run_id, Phase::StalledProcessing, PhaseEdge::Start).await?;
        report.stalled = self.stall.process(self.clock.now()).await?;
        self.stamp(run_id, Phase::StalledProcessing, PhaseEdge::Finish).await?;

        self.stamp(run_id, Phase::ReadyProcessing, PhaseEdge::Start).await?;
        let limit = self.dispatcher.batch_limit();
        for _ in 0..self.config.max_dispatch_rounds.max(1) {
            let batch = self.dispatcher.dispatch_batch(self.clock.now()).await?;
            report.dispatch_rounds += 1;
            report.dispatch.absorb(batch);
            if (batch.selected as usize) < limit {
                break;
            }
        }
        self.stamp(run_id, Phase::ReadyProcessing, PhaseEdge::Finish).await?;

        self.stamp(run_id, Phase::Cleanup, PhaseEdge::Start).await?;
        let now = self.clock.now();
        report.purged = self
            .jobs
            .purge_finished(now - self.config.finished_retention, self.config.cleanup_batch_limit)
            .await?;
        self.stamp(run_id, Phase::Cleanup, PhaseEdge::Finish).await?;

        Ok(report)
    }

    /// Heartbeat a phase boundary. Fails with `LockLost` once another runner has taken over.
    async fn stamp(&self, run_id: RunId, phase: Phase, edge: PhaseEdge) -> Result<(), PipelineError> {
        match self
            .lock
            .heartbeat(run_id, phase, edge, self.clock.now())
            .await?
        {
            LeaseOutcome::Applied => Ok(()),
            LeaseOutcome::NotHolder => Err(PipelineError::LockLost(run_id)),
        }
    }

    async fn inspect_held(&self, status: RunStatus) -> Result<RunOutcome, PipelineError> {
        let now = self.clock.now();
        let current = self.jobs.snapshot().await?;
        let assessment = status.assess(now, self.config.stuck_threshold, &current);

        match assessment {
            StuckAssessment::Stuck => {
                let Some(before) = self.lock.force_release(status.holder, now).await? else {
                    info!("run lock changed hands during the stuck check; skipping");
                    return Ok(RunOutcome::Skipped {
                        assessment: StuckAssessment::Running,
                    });
                };
                let alert = StuckRunAlert::new(&before, now);
                error!(
                    run_id = ?before.holder,
                    started_at = ?before.run.started_at,
                    in_flight = current.total(),
                    "previous pipeline run stuck; lock released"
                );
                if let Err(e) = self.alerts.stuck_run(&alert).await {
                    warn!(error = %e, "stuck-run alert not delivered");
                }
                Ok(RunOutcome::Recovered { alert })
            }
            StuckAssessment::SlowButProgressing => {
                self.lock.record_snapshot(status.holder, current).await?;
                info!(in_flight = current.total(), "previous run slow but progressing; skipping");
                Ok(RunOutcome::Skipped { assessment })
            }
            StuckAssessment::Idle | StuckAssessment::Running => {
                info!("previous run still active; skipping");
                Ok(RunOutcome::Skipped { assessment })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::RecordingAlertChannel;
    use crate::clock::ManualClock;
    use crate::error::StoreError;
    use crate::filter::{Candidate, FilterAssignment, InMemoryFilterProvider};
    use crate::jobs::{InMemoryJobStore, InMemoryStallLog};
    use crate::provider::ScriptedProvider;
    use crate::run_lock::InMemoryRunLock;
    use chrono::{DateTime, Duration, Utc};
    use mediawatch_core::{FilterId, TenantId};
    use mediawatch_screening::{InFlightSnapshot, NameOrigin, Priority, SubjectKind};

    struct Fixture {
        clock: Arc<ManualClock>,
        lock: Arc<InMemoryRunLock>,
        jobs: Arc<InMemoryJobStore>,
        filters: Arc<InMemoryFilterProvider>,
        alerts: Arc<RecordingAlertChannel>,
        coordinator: RunCoordinator,
    }

    fn fixture(config: PipelineConfig) -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let lock = InMemoryRunLock::arc();
        let jobs = InMemoryJobStore::arc();
        let filters = InMemoryFilterProvider::arc();
        let alerts = Arc::new(RecordingAlertChannel::default());
        let provider = Arc::new(ScriptedProvider::default());

        let coordinator = RunCoordinator::new(
            clock.clone(),
            lock.clone(),
            jobs.clone(),
            alerts.clone(),
            Enqueuer::new(jobs.clone(), jobs.clone(), filters.clone(), &config),
            StallDetector::new(jobs.clone(), InMemoryStallLog::arc(), &config),
            Dispatcher::new(jobs.clone(), jobs.clone(), provider, &config),
            config,
        );
        Fixture {
            clock,
            lock,
            jobs,
            filters,
            alerts,
            coordinator,
        }
    }

    fn schedule(f: &Fixture, tenant: TenantId, n: i64) {
        let assignment = FilterAssignment {
            tenant_id: tenant,
            provider_tenant_id: None,
            filter_id: FilterId::new(1),
            refinement_term: None,
            date_start: None,
            date_end: None,
            priority: Priority::Background,
            only_new: false,
            exempt: false,
        };
        let candidates = (1..=n)
            .map(|i| Candidate {
                cursor: i,
                subject_id: i,
                id_type: SubjectKind::Profile,
                term: format!("Subject {i}"),
                term_origin: NameOrigin::Name,
                record_type: "company".to_string(),
            })
            .collect();
        f.filters.schedule(assignment, candidates);
    }

    #[tokio::test]
    async fn full_run_dispatches_in_rounds_and_releases() {
        let f = fixture(PipelineConfig {
            ready_batch_limit: 2,
            max_dispatch_rounds: 10,
            ..PipelineConfig::default()
        });
        let tenant = TenantId::new();
        schedule(&f, tenant, 5);

        let outcome = f.coordinator.run_once().await.unwrap();
        let RunOutcome::Completed(report) = outcome else {
            panic!("expected a completed run, got {outcome:?}");
        };
        assert_eq!(report.load.enqueued, 5);
        assert_eq!(report.dispatch.started, 5);
        assert_eq!(report.dispatch_rounds, 3);
        assert_eq!(f.jobs.stats(tenant).await.unwrap().started, 5);

        let status = f.lock.status().await.unwrap();
        assert!(!status.running);
        assert!(status.cleanup.finished_at.is_some());
    }

    #[tokio::test]
    async fn dispatch_rounds_are_capped() {
        let f = fixture(PipelineConfig {
            ready_batch_limit: 1,
            max_dispatch_rounds: 2,
            ..PipelineConfig::default()
        });
        let tenant = TenantId::new();
        schedule(&f, tenant, 4);

        f.coordinator.run_once().await.unwrap();
        let stats = f.jobs.stats(tenant).await.unwrap();
        assert_eq!(stats.started, 2);
        assert_eq!(stats.ready, 2);
    }

    #[tokio::test]
    async fn held_lock_is_skipped_then_recovered_when_stuck() {
        let f = fixture(PipelineConfig {
            stuck_threshold: Duration::hours(2),
            ..PipelineConfig::default()
        });
        let LockAttempt::Acquired { run_id: stuck, .. } =
            f.lock.try_acquire(f.clock.now()).await.unwrap()
        else {
            panic!("lock should be free");
        };

        let outcome = f.coordinator.run_once().await.unwrap();
        assert_eq!(outcome, RunOutcome::Skipped { assessment: StuckAssessment::Running });

        f.clock.advance(Duration::hours(3));
        let outcome = f.coordinator.run_once().await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Skipped { assessment: StuckAssessment::SlowButProgressing }
        );
        assert!(f.alerts.raised().is_empty());

        f.clock.advance(Duration::minutes(10));
        let outcome = f.coordinator.run_once().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Recovered { .. }));
        assert_eq!(f.alerts.raised().len(), 1);
        assert!(!f.lock.status().await.unwrap().running);

        let outcome = f.coordinator.run_once().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(_)));

        // The stuck run's late release is ignored.
        assert_eq!(
            f.lock.release(stuck, f.clock.now()).await.unwrap(),
            LeaseOutcome::NotHolder
        );
    }

    #[tokio::test]
    async fn run_stops_when_its_lock_is_taken_over() {
        let f = fixture(PipelineConfig::default());
        let tenant = TenantId::new();
        schedule(&f, tenant, 3);

        let takeover = Arc::new(Takeover {
            inner: f.lock.clone(),
            successor: std::sync::Mutex::new(None),
        });
        let coordinator = RunCoordinator {
            lock: takeover.clone(),
            ..f.coordinator
        };

        let outcome = coordinator.run_once().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Preempted { .. }));

        // Nothing past the first phase ran, and the successor still holds the lock.
        let stats = f.jobs.stats(tenant).await.unwrap();
        assert_eq!(stats.started, 0);
        assert_eq!(stats.finished, 0);
        let successor = takeover.successor.lock().unwrap().expect("successor acquired");
        assert!(f.lock.status().await.unwrap().is_held_by(successor));
    }

    /// Run lock that another runner force-releases and re-acquires as soon as the
    /// first phase finishes.
    struct Takeover {
        inner: Arc<InMemoryRunLock>,
        successor: std::sync::Mutex<Option<RunId>>,
    }

    #[async_trait::async_trait]
    impl RunLock for Takeover {
        async fn try_acquire(&self, now: DateTime<Utc>) -> Result<LockAttempt, StoreError> {
            self.inner.try_acquire(now).await
        }

        async fn heartbeat(
            &self,
            run_id: RunId,
            phase: Phase,
            edge: PhaseEdge,
            now: DateTime<Utc>,
        ) -> Result<LeaseOutcome, StoreError> {
            let outcome = self.inner.heartbeat(run_id, phase, edge, now).await?;
            if phase == Phase::PendingSearchLoad && edge == PhaseEdge::Finish {
                self.inner.force_release(Some(run_id), now).await?;
                if let LockAttempt::Acquired { run_id: next, .. } = self.inner.try_acquire(now).await? {
                    *self.successor.lock().unwrap() = Some(next);
                }
            }
            Ok(outcome)
        }

        async fn release(&self, run_id: RunId, now: DateTime<Utc>) -> Result<LeaseOutcome, StoreError> {
            self.inner.release(run_id, now).await
        }

        async fn force_release(
            &self,
            expected: Option<RunId>,
            now: DateTime<Utc>,
        ) -> Result<Option<RunStatus>, StoreError> {
            self.inner.force_release(expected, now).await
        }

        async fn record_snapshot(
            &self,
            expected: Option<RunId>,
            snapshot: InFlightSnapshot,
        ) -> Result<LeaseOutcome, StoreError> {
            self.inner.record_snapshot(expected, snapshot).await
        }

        async fn status(&self) -> Result<RunStatus, StoreError> {
            self.inner.status().await
        }
    }
}
