//! Pipeline run status: the whole-pipeline lock record and stuck-run detection.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use mediawatch_core::RunId;

use crate::job::JobStatus;

/// Pipeline phases, in execution order. `Run` spans the whole run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Run,
    PendingSearchLoad,
    StalledProcessing,
    ReadyProcessing,
    Cleanup,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Run,
        Phase::PendingSearchLoad,
        Phase::StalledProcessing,
        Phase::ReadyProcessing,
        Phase::Cleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Run => "run",
            Phase::PendingSearchLoad => "pending_search_load",
            Phase::StalledProcessing => "stalled_processing",
            Phase::ReadyProcessing => "ready_processing",
            Phase::Cleanup => "cleanup",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseWindow {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Counts of not-yet-finished jobs by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InFlightSnapshot {
    pub ready: u64,
    pub queued: u64,
    pub started: u64,
    pub stopped: u64,
}

impl InFlightSnapshot {
    pub fn record(&mut self, status: JobStatus, n: u64) {
        match status {
            JobStatus::Ready => self.ready += n,
            JobStatus::Queued => self.queued += n,
            JobStatus::Started => self.started += n,
            JobStatus::Stopped => self.stopped += n,
            JobStatus::Finished => {}
        }
    }

    pub fn total(&self) -> u64 {
        self.ready + self.queued + self.started + self.stopped
    }
}

/// Verdict of a second runner looking at a held lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StuckAssessment {
    /// Lock is free.
    Idle,
    /// Held for less than the stuck threshold.
    Running,
    /// Held too long, but in-flight counts moved since the last check (or no prior check).
    SlowButProgressing,
    /// Held too long and in-flight counts identical across two checks.
    Stuck,
}

/// Singleton run-status record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunStatus {
    pub running: bool,
    /// The run holding the lock; cleared on release.
    pub holder: Option<RunId>,
    pub run: PhaseWindow,
    pub pending_search_load: PhaseWindow,
    pub stalled_processing: PhaseWindow,
    pub ready_processing: PhaseWindow,
    pub cleanup: PhaseWindow,
    /// In-flight counts seen by the previous stuck check.
    pub snapshot: Option<InFlightSnapshot>,
}

impl RunStatus {
    pub fn window(&self, phase: Phase) -> &PhaseWindow {
        match phase {
            Phase::Run => &self.run,
            Phase::PendingSearchLoad => &self.pending_search_load,
            Phase::StalledProcessing => &self.stalled_processing,
            Phase::ReadyProcessing => &self.ready_processing,
            Phase::Cleanup => &self.cleanup,
        }
    }

    pub fn window_mut(&mut self, phase: Phase) -> &mut PhaseWindow {
        match phase {
            Phase::Run => &mut self.run,
            Phase::PendingSearchLoad => &mut self.pending_search_load,
            Phase::StalledProcessing => &mut self.stalled_processing,
            Phase::ReadyProcessing => &mut self.ready_processing,
            Phase::Cleanup => &mut self.cleanup,
        }
    }

    /// Take the lock for `holder`. Returns false (and changes nothing) if already running.
    pub fn acquire(&mut self, holder: RunId, now: DateTime<Utc>) -> bool {
        if self.running {
            return false;
        }
        self.running = true;
        self.holder = Some(holder);
        self.snapshot = None;
        for phase in Phase::ALL {
            *self.window_mut(phase) = PhaseWindow::default();
        }
        self.run.started_at = Some(now);
        true
    }

    pub fn stamp_start(&mut self, phase: Phase, now: DateTime<Utc>) {
        let w = self.window_mut(phase);
        w.started_at = Some(now);
        w.finished_at = None;
    }

    pub fn stamp_finish(&mut self, phase: Phase, now: DateTime<Utc>) {
        self.window_mut(phase).finished_at = Some(now);
    }

    pub fn is_held_by(&self, holder: RunId) -> bool {
        self.running && self.holder == Some(holder)
    }

    pub fn release(&mut self, now: DateTime<Utc>) {
        self.running = false;
        self.holder = None;
        self.snapshot = None;
        self.run.finished_at = Some(now);
    }

    /// Compare the current in-flight counts against the previous check.
    ///
    /// Does not mutate; callers persist `current` as the new snapshot unless the
    /// verdict is [`StuckAssessment::Stuck`].
    pub fn assess(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
        current: &InFlightSnapshot,
    ) -> StuckAssessment {
        if !self.running {
            return StuckAssessment::Idle;
        }
        let held_for = self.run.started_at.map(|s| now - s);
        match held_for {
            Some(elapsed) if elapsed <= threshold => StuckAssessment::Running,
            _ => match &self.snapshot {
                Some(prev) if prev == current => StuckAssessment::Stuck,
                _ => StuckAssessment::SlowButProgressing,
            },
        }
    }

    /// Phase timestamps in a flat, log/alert friendly form.
    pub fn phase_report(&self) -> Vec<(Phase, PhaseWindow)> {
        Phase::ALL.iter().map(|p| (*p, *self.window(*p))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(started: u64) -> InFlightSnapshot {
        InFlightSnapshot {
            started,
            ..Default::default()
        }
    }

    #[test]
    fn acquire_is_exclusive_until_release() {
        let now = Utc::now();
        let (first, second) = (RunId::new(), RunId::new());
        let mut status = RunStatus::default();
        assert!(status.acquire(first, now));
        assert!(!status.acquire(second, now));
        assert_eq!(status.run.started_at, Some(now));
        assert!(status.is_held_by(first));
        assert!(!status.is_held_by(second));

        status.release(now);
        assert!(!status.running);
        assert!(!status.is_held_by(first));
        assert!(status.acquire(second, now));
        assert_eq!(status.holder, Some(second));
    }

    #[test]
    fn stuck_requires_two_identical_snapshots_past_threshold() {
        let start = Utc::now();
        let threshold = Duration::hours(2);
        let mut status = RunStatus::default();
        status.acquire(RunId::new(), start);

        let early = start + Duration::minutes(30);
        assert_eq!(status.assess(early, threshold, &snapshot(4)), StuckAssessment::Running);

        let late = start + Duration::hours(3);
        assert_eq!(
            status.assess(late, threshold, &snapshot(4)),
            StuckAssessment::SlowButProgressing
        );
        status.snapshot = Some(snapshot(4));

        assert_eq!(
            status.assess(late, threshold, &snapshot(3)),
            StuckAssessment::SlowButProgressing
        );
        status.snapshot = Some(snapshot(3));

        assert_eq!(status.assess(late, threshold, &snapshot(3)), StuckAssessment::Stuck);
    }

    #[test]
    fn idle_lock_is_never_stuck() {
        let status = RunStatus::default();
        assert_eq!(
            status.assess(Utc::now(), Duration::zero(), &InFlightSnapshot::default()),
            StuckAssessment::Idle
        );
    }

    #[test]
    fn snapshot_ignores_finished() {
        let mut s = InFlightSnapshot::default();
        s.record(JobStatus::Finished, 10);
        s.record(JobStatus::Queued, 2);
        assert_eq!(s.total(), 2);
    }
}
