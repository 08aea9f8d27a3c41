//! Job storage: search jobs, their conditional transitions, and the call relation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use mediawatch_core::{CorrelationId, JobId, TenantId};
use mediawatch_screening::{
    InFlightSnapshot, JobStatus, NewSearchJob, SearchCall, SearchJob, SearchRequest, Subject,
};

use crate::error::StoreError;

/// A state change applied through a compare-and-set on the job's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Claim,
    Start(CorrelationId),
    Finish,
    Stop,
    /// Return to `ready`; only while `times_requeued < limit`.
    Requeue { limit: u32 },
}

impl Transition {
    /// Whether the transition is legal out of `from`.
    pub fn permits(&self, from: JobStatus) -> bool {
        match self {
            Transition::Claim => from == JobStatus::Ready,
            Transition::Start(_) => from == JobStatus::Queued,
            Transition::Finish => from == JobStatus::Started,
            Transition::Stop => !from.is_terminal(),
            Transition::Requeue { .. } => from.is_stallable(),
        }
    }

    pub fn target(&self) -> JobStatus {
        match self {
            Transition::Claim => JobStatus::Queued,
            Transition::Start(_) => JobStatus::Started,
            Transition::Finish => JobStatus::Finished,
            Transition::Stop => JobStatus::Stopped,
            Transition::Requeue { .. } => JobStatus::Ready,
        }
    }
}

/// Result of a conditional update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The row matched the expected state and now holds the new one.
    Applied(SearchJob),
    /// Another worker moved (or removed) the job first. The caller does not own it.
    Contended,
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub ready: u64,
    pub queued: u64,
    pub started: u64,
    pub finished: u64,
    pub stopped: u64,
}

impl JobStats {
    pub fn record(&mut self, status: JobStatus, n: u64) {
        match status {
            JobStatus::Ready => self.ready += n,
            JobStatus::Queued => self.queued += n,
            JobStatus::Started => self.started += n,
            JobStatus::Finished => self.finished += n,
            JobStatus::Stopped => self.stopped += n,
        }
    }
}

/// Job store abstraction.
///
/// Every status change goes through [`JobStore::transition`], which succeeds only if
/// the job is still in `expected`. That compare-and-set is the only per-job
/// concurrency control in the system.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a validated job; the store assigns the id.
    async fn insert(&self, job: NewSearchJob, now: DateTime<Utc>)
    -> Result<SearchJob, StoreError>;

    async fn get(&self, job_id: JobId) -> Result<Option<SearchJob>, StoreError>;

    /// Up to `limit` ready jobs without a correlation id: highest priority first,
    /// ascending id within a tier.
    async fn select_ready(&self, limit: usize) -> Result<Vec<SearchJob>, StoreError>;

    async fn transition(
        &self,
        job_id: JobId,
        expected: JobStatus,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError>;

    /// Delete a job if it is still in `expected`.
    async fn delete(&self, job_id: JobId, expected: JobStatus) -> Result<bool, StoreError>;

    /// Jobs carrying `correlation_id`, newest (`created_at`, then id) first.
    async fn find_by_correlation(
        &self,
        tenant_id: TenantId,
        correlation_id: CorrelationId,
    ) -> Result<Vec<SearchJob>, StoreError>;

    /// Dispatched jobs (`queued`/`started`/`stopped`) created before `cutoff`, oldest first.
    async fn find_stalled(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SearchJob>, StoreError>;

    /// Delete up to `limit` finished jobs last touched before `cutoff`.
    async fn purge_finished(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<u64, StoreError>;

    /// Current statuses of the given jobs; deleted jobs are absent from the map.
    async fn statuses(
        &self,
        tenant_id: TenantId,
        job_ids: &[JobId],
    ) -> Result<HashMap<JobId, JobStatus>, StoreError>;

    /// Global in-flight counts (stuck-run detection).
    async fn snapshot(&self) -> Result<InFlightSnapshot, StoreError>;

    async fn stats(&self, tenant_id: TenantId) -> Result<JobStats, StoreError>;

    /// Non-exempt jobs created for the tenant since `since` (usage accounting).
    async fn billable_count(
        &self,
        tenant_id: TenantId,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}

/// The SearchCall ↔ SearchJob relation.
#[async_trait]
pub trait SearchCallStore: Send + Sync {
    /// Record a call and link the given jobs to it. Recording an existing
    /// `(tenant, correlation_id)` only adds the links.
    async fn record_call(&self, call: SearchCall) -> Result<SearchCall, StoreError>;

    async fn link_job(
        &self,
        tenant_id: TenantId,
        correlation_id: CorrelationId,
        job_id: JobId,
    ) -> Result<(), StoreError>;

    async fn find_call(
        &self,
        tenant_id: TenantId,
        correlation_id: CorrelationId,
    ) -> Result<Option<SearchCall>, StoreError>;

    /// Newest call for `request` that still has a `started` job awaiting results.
    async fn find_open_session(
        &self,
        tenant_id: TenantId,
        request: &SearchRequest,
    ) -> Result<Option<SearchCall>, StoreError>;

    /// Whether any call was ever made for the subject.
    async fn has_prior_call(
        &self,
        tenant_id: TenantId,
        subject: Subject,
    ) -> Result<bool, StoreError>;
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    jobs: BTreeMap<JobId, SearchJob>,
    calls: HashMap<(TenantId, CorrelationId), SearchCall>,
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    inner: RwLock<Inner>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner.read().map_err(|_| StoreError::poisoned())
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>, StoreError> {
        self.inner.write().map_err(|_| StoreError::poisoned())
    }
}

fn apply(job: &mut SearchJob, transition: Transition, now: DateTime<Utc>) -> bool {
    let result = match transition {
        Transition::Claim => job.claim(now),
        Transition::Start(c) => job.start(c, now),
        Transition::Finish => job.finish(now),
        Transition::Stop => job.stop(now),
        Transition::Requeue { limit } => job.requeue(limit, now),
    };
    result.is_ok()
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(
        &self,
        job: NewSearchJob,
        now: DateTime<Utc>,
    ) -> Result<SearchJob, StoreError> {
        let mut inner = self.write()?;
        inner.next_id += 1;
        let job = job.into_job(JobId::new(inner.next_id), now);
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<SearchJob>, StoreError> {
        Ok(self.read()?.jobs.get(&job_id).cloned())
    }

    async fn select_ready(&self, limit: usize) -> Result<Vec<SearchJob>, StoreError> {
        let inner = self.read()?;
        let mut ready: Vec<_> = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Ready && j.correlation_id.is_none())
            .cloned()
            .collect();
        // BTreeMap iteration is already id-ascending; a stable sort keeps that within a tier.
        ready.sort_by(|a, b| b.priority.cmp(&a.priority));
        ready.truncate(limit);
        Ok(ready)
    }

    async fn transition(
        &self,
        job_id: JobId,
        expected: JobStatus,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut inner = self.write()?;
        let Some(job) = inner.jobs.get_mut(&job_id) else {
            return Ok(TransitionOutcome::Contended);
        };
        if job.status != expected {
            return Ok(TransitionOutcome::Contended);
        }
        let mut next = job.clone();
        if !apply(&mut next, transition, now) {
            return Ok(TransitionOutcome::Contended);
        }
        *job = next.clone();
        Ok(TransitionOutcome::Applied(next))
    }

    async fn delete(&self, job_id: JobId, expected: JobStatus) -> Result<bool, StoreError> {
        let mut inner = self.write()?;
        match inner.jobs.get(&job_id) {
            Some(job) if job.status == expected => {
                inner.jobs.remove(&job_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_by_correlation(
        &self,
        tenant_id: TenantId,
        correlation_id: CorrelationId,
    ) -> Result<Vec<SearchJob>, StoreError> {
        let inner = self.read()?;
        let mut jobs: Vec<_> = inner
            .jobs
            .values()
            .filter(|j| j.tenant_id == tenant_id && j.correlation_id == Some(correlation_id))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(jobs)
    }

    async fn find_stalled(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SearchJob>, StoreError> {
        let inner = self.read()?;
        let mut stalled: Vec<_> = inner
            .jobs
            .values()
            .filter(|j| j.status.is_stallable() && j.created_at < cutoff)
            .cloned()
            .collect();
        stalled.sort_by_key(|j| (j.created_at, j.id));
        stalled.truncate(limit);
        Ok(stalled)
    }

    async fn purge_finished(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<u64, StoreError> {
        let mut inner = self.write()?;
        let doomed: Vec<JobId> = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Finished && j.updated_at < cutoff)
            .map(|j| j.id)
            .take(limit)
            .collect();
        for id in &doomed {
            inner.jobs.remove(id);
        }
        Ok(doomed.len() as u64)
    }

    async fn statuses(
        &self,
        tenant_id: TenantId,
        job_ids: &[JobId],
    ) -> Result<HashMap<JobId, JobStatus>, StoreError> {
        let inner = self.read()?;
        Ok(job_ids
            .iter()
            .filter_map(|id| inner.jobs.get(id))
            .filter(|j| j.tenant_id == tenant_id)
            .map(|j| (j.id, j.status))
            .collect())
    }

    async fn snapshot(&self) -> Result<InFlightSnapshot, StoreError> {
        let inner = self.read()?;
        let mut snapshot = InFlightSnapshot::default();
        for job in inner.jobs.values() {
            snapshot.record(job.status, 1);
        }
        Ok(snapshot)
    }

    async fn stats(&self, tenant_id: TenantId) -> Result<JobStats, StoreError> {
        let inner = self.read()?;
        let mut stats = JobStats::default();
        for job in inner.jobs.values().filter(|j| j.tenant_id == tenant_id) {
            stats.record(job.status, 1);
        }
        Ok(stats)
    }

    async fn billable_count(
        &self,
        tenant_id: TenantId,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .jobs
            .values()
            .filter(|j| j.tenant_id == tenant_id && !j.exempt && j.created_at >= since)
            .count() as u64)
    }
}

#[async_trait]
impl SearchCallStore for InMemoryJobStore {
    async fn record_call(&self, call: SearchCall) -> Result<SearchCall, StoreError> {
        let mut inner = self.write()?;
        let key = (call.tenant_id, call.correlation_id);
        let stored = inner.calls.entry(key).or_insert_with(|| SearchCall {
            job_ids: Vec::new(),
            ..call.clone()
        });
        for id in call.job_ids {
            if !stored.job_ids.contains(&id) {
                stored.job_ids.push(id);
            }
        }
        Ok(stored.clone())
    }

    async fn link_job(
        &self,
        tenant_id: TenantId,
        correlation_id: CorrelationId,
        job_id: JobId,
    ) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        let call = inner
            .calls
            .get_mut(&(tenant_id, correlation_id))
            .ok_or_else(|| StoreError::NotFound(format!("search call {correlation_id}")))?;
        if !call.job_ids.contains(&job_id) {
            call.job_ids.push(job_id);
        }
        Ok(())
    }

    async fn find_call(
        &self,
        tenant_id: TenantId,
        correlation_id: CorrelationId,
    ) -> Result<Option<SearchCall>, StoreError> {
        Ok(self.read()?.calls.get(&(tenant_id, correlation_id)).cloned())
    }

    async fn find_open_session(
        &self,
        tenant_id: TenantId,
        request: &SearchRequest,
    ) -> Result<Option<SearchCall>, StoreError> {
        let inner = self.read()?;
        let open = inner
            .calls
            .values()
            .filter(|c| c.tenant_id == tenant_id && &c.request == request)
            .filter(|c| {
                c.job_ids.iter().any(|id| {
                    inner.jobs.get(id).is_some_and(|j| {
                        j.status == JobStatus::Started && j.correlation_id == Some(c.correlation_id)
                    })
                })
            })
            .max_by_key(|c| c.created_at)
            .cloned();
        Ok(open)
    }

    async fn has_prior_call(
        &self,
        tenant_id: TenantId,
        subject: Subject,
    ) -> Result<bool, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .calls
            .values()
            .any(|c| c.tenant_id == tenant_id && c.request.subject == subject))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediawatch_core::ProfileId;
    use mediawatch_screening::{EnqueueRequest, NameOrigin, Priority};

    fn test_tenant() -> TenantId {
        TenantId::new()
    }

    fn new_job(tenant: TenantId, subject: i64, priority: Priority) -> NewSearchJob {
        EnqueueRequest {
            tenant_id: tenant,
            provider_tenant_id: None,
            subject: Subject::Profile(ProfileId::new(subject)),
            name_origin: NameOrigin::Name,
            search_term: format!("Subject {subject}"),
            refinement_term: None,
            date_start: None,
            date_end: None,
            priority,
            filter_id: None,
            exempt: false,
        }
        .validate()
        .unwrap()
    }

    #[tokio::test]
    async fn select_ready_orders_by_priority_then_id() {
        let store = InMemoryJobStore::new();
        let tenant = test_tenant();
        let now = Utc::now();

        let a = store.insert(new_job(tenant, 1, Priority::Background), now).await.unwrap();
        let b = store.insert(new_job(tenant, 2, Priority::Interactive), now).await.unwrap();
        let c = store.insert(new_job(tenant, 3, Priority::Background), now).await.unwrap();
        let d = store.insert(new_job(tenant, 4, Priority::Interactive), now).await.unwrap();

        let ids: Vec<_> = store.select_ready(10).await.unwrap().iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![b.id, d.id, a.id, c.id]);

        assert_eq!(store.select_ready(1).await.unwrap()[0].id, b.id);
    }

    #[tokio::test]
    async fn claim_is_compare_and_set() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        let job = store.insert(new_job(test_tenant(), 1, Priority::Background), now).await.unwrap();

        let first = store.transition(job.id, JobStatus::Ready, Transition::Claim, now).await.unwrap();
        let second = store.transition(job.id, JobStatus::Ready, Transition::Claim, now).await.unwrap();

        assert!(first.is_applied());
        assert_eq!(second, TransitionOutcome::Contended);
        assert_eq!(store.get(job.id).await.unwrap().unwrap().status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn illegal_transition_is_reported_as_contended() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        let job = store.insert(new_job(test_tenant(), 1, Priority::Background), now).await.unwrap();

        let outcome = store.transition(job.id, JobStatus::Ready, Transition::Finish, now).await.unwrap();
        assert_eq!(outcome, TransitionOutcome::Contended);
        assert_eq!(store.get(job.id).await.unwrap().unwrap().status, JobStatus::Ready);
    }

    #[tokio::test]
    async fn stalled_scan_skips_ready_and_finished() {
        let store = InMemoryJobStore::new();
        let tenant = test_tenant();
        let then = Utc::now() - chrono::Duration::hours(5);

        let ready = store.insert(new_job(tenant, 1, Priority::Background), then).await.unwrap();
        let queued = store.insert(new_job(tenant, 2, Priority::Background), then).await.unwrap();
        store.transition(queued.id, JobStatus::Ready, Transition::Claim, then).await.unwrap();

        let stalled = store.find_stalled(Utc::now(), 10).await.unwrap();
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].id, queued.id);
        assert_ne!(stalled[0].id, ready.id);
    }

    #[tokio::test]
    async fn statuses_are_tenant_scoped() {
        let store = InMemoryJobStore::new();
        let tenant = test_tenant();
        let now = Utc::now();
        let job = store.insert(new_job(tenant, 1, Priority::Background), now).await.unwrap();

        assert_eq!(store.statuses(tenant, &[job.id]).await.unwrap().len(), 1);
        assert!(store.statuses(test_tenant(), &[job.id]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_session_requires_a_started_job() {
        let store = InMemoryJobStore::new();
        let tenant = test_tenant();
        let now = Utc::now();
        let job = store.insert(new_job(tenant, 1, Priority::Background), now).await.unwrap();
        let request = job.request();
        let corr = CorrelationId::new(77);

        store.transition(job.id, JobStatus::Ready, Transition::Claim, now).await.unwrap();
        let mut call = SearchCall::new(tenant, corr, request.clone(), now);
        call.job_ids.push(job.id);
        store.record_call(call).await.unwrap();

        assert!(store.find_open_session(tenant, &request).await.unwrap().is_none());

        store.transition(job.id, JobStatus::Queued, Transition::Start(corr), now).await.unwrap();
        let open = store.find_open_session(tenant, &request).await.unwrap().unwrap();
        assert_eq!(open.correlation_id, corr);
        assert!(store.has_prior_call(tenant, request.subject).await.unwrap());

        store.transition(job.id, JobStatus::Started, Transition::Finish, now).await.unwrap();
        assert!(store.find_open_session(tenant, &request).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn billable_count_excludes_exempt_jobs() {
        let store = InMemoryJobStore::new();
        let tenant = test_tenant();
        let now = Utc::now();
        store.insert(new_job(tenant, 1, Priority::Background), now).await.unwrap();
        let mut exempt = new_job(tenant, 2, Priority::Background);
        exempt.exempt = true;
        store.insert(exempt, now).await.unwrap();

        assert_eq!(store.billable_count(tenant, now).await.unwrap(), 1);
    }
}
