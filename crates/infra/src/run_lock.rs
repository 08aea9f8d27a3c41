//! The whole-pipeline run lock.
//!
//! A single [`RunStatus`] record guards against two pipeline runs overlapping. It does
//! not serialize individual job claims; those rely on the job store's compare-and-set.
//!
//! Every acquisition is stamped with a fresh [`RunId`]. Heartbeats, release and forced
//! release only act while the lock is still held by the run they name, so a run that was
//! recovered as stuck cannot free the lock of the run that replaced it.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use mediawatch_core::RunId;
use mediawatch_screening::{InFlightSnapshot, Phase, RunStatus};

use crate::error::StoreError;
use crate::pg::{decode, map_sqlx_error};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt {
    Acquired { run_id: RunId, status: RunStatus },
    /// Someone else holds the lock; their current status.
    Held(RunStatus),
}

/// Result of an operation that requires holding the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    Applied,
    /// The lock is free or held by a different run; nothing was written.
    NotHolder,
}

impl LeaseOutcome {
    fn when(held: bool) -> Self {
        if held {
            LeaseOutcome::Applied
        } else {
            LeaseOutcome::NotHolder
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEdge {
    Start,
    Finish,
}

#[async_trait]
pub trait RunLock: Send + Sync {
    async fn try_acquire(&self, now: DateTime<Utc>) -> Result<LockAttempt, StoreError>;

    /// Stamp a phase boundary on the lock held by `run_id`.
    async fn heartbeat(
        &self,
        run_id: RunId,
        phase: Phase,
        edge: PhaseEdge,
        now: DateTime<Utc>,
    ) -> Result<LeaseOutcome, StoreError>;

    async fn release(&self, run_id: RunId, now: DateTime<Utc>) -> Result<LeaseOutcome, StoreError>;

    /// Release a lock held by another run, provided it is still held by `expected`.
    /// Returns the status as it was before release, or `None` if the holder changed.
    async fn force_release(
        &self,
        expected: Option<RunId>,
        now: DateTime<Utc>,
    ) -> Result<Option<RunStatus>, StoreError>;

    /// Remember the in-flight counts seen by a stuck check of `expected`'s run.
    async fn record_snapshot(
        &self,
        expected: Option<RunId>,
        snapshot: InFlightSnapshot,
    ) -> Result<LeaseOutcome, StoreError>;

    async fn status(&self) -> Result<RunStatus, StoreError>;
}

fn acquire(status: &mut RunStatus, now: DateTime<Utc>) -> LockAttempt {
    let run_id = RunId::new();
    if status.acquire(run_id, now) {
        LockAttempt::Acquired {
            run_id,
            status: status.clone(),
        }
    } else {
        LockAttempt::Held(status.clone())
    }
}

fn apply_edge(
    status: &mut RunStatus,
    run_id: RunId,
    phase: Phase,
    edge: PhaseEdge,
    now: DateTime<Utc>,
) -> LeaseOutcome {
    if !status.is_held_by(run_id) {
        return LeaseOutcome::NotHolder;
    }
    match edge {
        PhaseEdge::Start => status.stamp_start(phase, now),
        PhaseEdge::Finish => status.stamp_finish(phase, now),
    }
    LeaseOutcome::Applied
}

fn release(status: &mut RunStatus, run_id: RunId, now: DateTime<Utc>) -> LeaseOutcome {
    let held = status.is_held_by(run_id);
    if held {
        status.release(now);
    }
    LeaseOutcome::when(held)
}

fn still_held_by(status: &RunStatus, expected: Option<RunId>) -> bool {
    status.running && status.holder == expected
}

fn force_release(
    status: &mut RunStatus,
    expected: Option<RunId>,
    now: DateTime<Utc>,
) -> Option<RunStatus> {
    if !still_held_by(status, expected) {
        return None;
    }
    let before = status.clone();
    status.release(now);
    Some(before)
}

fn record_snapshot(
    status: &mut RunStatus,
    expected: Option<RunId>,
    snapshot: InFlightSnapshot,
) -> LeaseOutcome {
    let held = still_held_by(status, expected);
    if held {
        status.snapshot = Some(snapshot);
    }
    LeaseOutcome::when(held)
}

#[derive(Debug, Default)]
pub struct InMemoryRunLock {
    status: Mutex<RunStatus>,
}

impl InMemoryRunLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn with<T>(&self, f: impl FnOnce(&mut RunStatus) -> T) -> Result<T, StoreError> {
        let mut status = self.status.lock().map_err(|_| StoreError::poisoned())?;
        Ok(f(&mut status))
    }
}

#[async_trait]
impl RunLock for InMemoryRunLock {
    async fn try_acquire(&self, now: DateTime<Utc>) -> Result<LockAttempt, StoreError> {
        self.with(|s| acquire(s, now))
    }

    async fn heartbeat(
        &self,
        run_id: RunId,
        phase: Phase,
        edge: PhaseEdge,
        now: DateTime<Utc>,
    ) -> Result<LeaseOutcome, StoreError> {
        self.with(|s| apply_edge(s, run_id, phase, edge, now))
    }

    async fn release(&self, run_id: RunId, now: DateTime<Utc>) -> Result<LeaseOutcome, StoreError> {
        self.with(|s| release(s, run_id, now))
    }

    async fn force_release(
        &self,
        expected: Option<RunId>,
        now: DateTime<Utc>,
    ) -> Result<Option<RunStatus>, StoreError> {
        self.with(|s| force_release(s, expected, now))
    }

    async fn record_snapshot(
        &self,
        expected: Option<RunId>,
        snapshot: InFlightSnapshot,
    ) -> Result<LeaseOutcome, StoreError> {
        self.with(|s| record_snapshot(s, expected, snapshot))
    }

    async fn status(&self) -> Result<RunStatus, StoreError> {
        self.with(|s| s.clone())
    }
}

/// Postgres run lock on the singleton `run_status` row (`id = 1`).
///
/// Each operation is a `SELECT ... FOR UPDATE` read-modify-write in one transaction,
/// so two runners racing for the lock are serialized on the row.
#[derive(Debug, Clone)]
pub struct PostgresRunLock {
    pool: Arc<PgPool>,
}

impl PostgresRunLock {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn mutate<T, F>(&self, operation: &str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut RunStatus) -> T + Send,
        T: Send,
    {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        let row = sqlx::query("SELECT status FROM run_status WHERE id = 1 FOR UPDATE")
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        let mut status = match row {
            Some(row) => parse_status(row.try_get("status").map_err(decode("run status"))?)?,
            None => RunStatus::default(),
        };

        let out = f(&mut status);

        let json = serde_json::to_value(&status)
            .map_err(|e| StoreError::Corrupt(format!("run status: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO run_status (id, running, status)
            VALUES (1, $1, $2)
            ON CONFLICT (id) DO UPDATE SET running = EXCLUDED.running, status = EXCLUDED.status
            "#,
        )
        .bind(status.running)
        .bind(json)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        Ok(out)
    }
}

fn parse_status(value: serde_json::Value) -> Result<RunStatus, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Corrupt(format!("run status: {e}")))
}

#[async_trait]
impl RunLock for PostgresRunLock {
    #[instrument(skip(self), err)]
    async fn try_acquire(&self, now: DateTime<Utc>) -> Result<LockAttempt, StoreError> {
        self.mutate("try_acquire_run_lock", |s| acquire(s, now)).await
    }

    #[instrument(skip(self), fields(run_id = %run_id, phase = phase.as_str()), err)]
    async fn heartbeat(
        &self,
        run_id: RunId,
        phase: Phase,
        edge: PhaseEdge,
        now: DateTime<Utc>,
    ) -> Result<LeaseOutcome, StoreError> {
        self.mutate("run_heartbeat", |s| apply_edge(s, run_id, phase, edge, now))
            .await
    }

    #[instrument(skip(self), fields(run_id = %run_id), err)]
    async fn release(&self, run_id: RunId, now: DateTime<Utc>) -> Result<LeaseOutcome, StoreError> {
        self.mutate("release_run_lock", |s| release(s, run_id, now)).await
    }

    #[instrument(skip(self), err)]
    async fn force_release(
        &self,
        expected: Option<RunId>,
        now: DateTime<Utc>,
    ) -> Result<Option<RunStatus>, StoreError> {
        self.mutate("force_release_run_lock", |s| force_release(s, expected, now))
            .await
    }

    #[instrument(skip(self, snapshot), err)]
    async fn record_snapshot(
        &self,
        expected: Option<RunId>,
        snapshot: InFlightSnapshot,
    ) -> Result<LeaseOutcome, StoreError> {
        self.mutate("record_run_snapshot", |s| record_snapshot(s, expected, snapshot))
            .await
    }

    #[instrument(skip(self), err)]
    async fn status(&self) -> Result<RunStatus, StoreError> {
        let row = sqlx::query("SELECT status FROM run_status WHERE id = 1")
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("run_status", e))?;
        match row {
            Some(row) => parse_status(row.try_get("status").map_err(decode("run status"))?),
            None => Ok(RunStatus::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn acquired(lock: &InMemoryRunLock, now: DateTime<Utc>) -> RunId {
        match lock.try_acquire(now).await.unwrap() {
            LockAttempt::Acquired { run_id, .. } => run_id,
            other => panic!("expected to acquire, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_acquire_sees_held_lock() {
        let lock = InMemoryRunLock::new();
        let now = Utc::now();

        let run_id = acquired(&lock, now).await;
        assert_eq!(
            lock.heartbeat(run_id, Phase::ReadyProcessing, PhaseEdge::Start, now).await.unwrap(),
            LeaseOutcome::Applied
        );

        match lock.try_acquire(now).await.unwrap() {
            LockAttempt::Held(status) => {
                assert!(status.running);
                assert_eq!(status.holder, Some(run_id));
                assert_eq!(status.ready_processing.started_at, Some(now));
            }
            other => panic!("expected held lock, got {other:?}"),
        }

        assert_eq!(lock.release(run_id, now).await.unwrap(), LeaseOutcome::Applied);
        assert!(!lock.status().await.unwrap().running);
    }

    #[tokio::test]
    async fn force_release_returns_prior_status() {
        let lock = InMemoryRunLock::new();
        let now = Utc::now();
        let run_id = acquired(&lock, now).await;
        lock.record_snapshot(Some(run_id), InFlightSnapshot::default()).await.unwrap();

        let before = lock.force_release(Some(run_id), now).await.unwrap().unwrap();
        assert!(before.running);
        assert!(before.snapshot.is_some());

        let after = lock.status().await.unwrap();
        assert!(!after.running);
        assert!(after.snapshot.is_none());
        assert!(after.holder.is_none());
    }

    #[tokio::test]
    async fn recovered_run_cannot_touch_its_successor() {
        let lock = InMemoryRunLock::new();
        let now = Utc::now();

        let stuck = acquired(&lock, now).await;
        lock.force_release(Some(stuck), now).await.unwrap().unwrap();
        let successor = acquired(&lock, now).await;

        // The recovered run wakes up and carries on as if it still held the lock.
        assert_eq!(
            lock.heartbeat(stuck, Phase::Cleanup, PhaseEdge::Start, now).await.unwrap(),
            LeaseOutcome::NotHolder
        );
        assert_eq!(lock.release(stuck, now).await.unwrap(), LeaseOutcome::NotHolder);

        let status = lock.status().await.unwrap();
        assert!(status.is_held_by(successor));
        assert!(status.cleanup.started_at.is_none());
        assert!(matches!(lock.try_acquire(now).await.unwrap(), LockAttempt::Held(_)));
    }

    #[tokio::test]
    async fn force_release_of_a_replaced_holder_is_refused() {
        let lock = InMemoryRunLock::new();
        let now = Utc::now();

        // A stuck check observed `first`, which then released normally.
        let first = acquired(&lock, now).await;
        lock.release(first, now).await.unwrap();
        let second = acquired(&lock, now).await;

        assert_eq!(lock.force_release(Some(first), now).await.unwrap(), None);
        assert_eq!(
            lock.record_snapshot(Some(first), InFlightSnapshot::default()).await.unwrap(),
            LeaseOutcome::NotHolder
        );
        let status = lock.status().await.unwrap();
        assert!(status.is_held_by(second));
        assert!(status.snapshot.is_none());
    }
}
