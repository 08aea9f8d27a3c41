//! Search jobs and their status state machine.
//!
//! ```text
//! ready ──claim──▶ queued ──start──▶ started ──finish──▶ finished
//!   ▲                │                  │
//!   └────requeue─────┴───── stopped ◀───┘   (stop: any non-finished state)
//! ```
//!
//! `finished` is terminal. Requeue returns a dispatched job to `ready`, clearing its
//! correlation id and bumping `times_requeued`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use mediawatch_core::{CorrelationId, DomainError, DomainResult, FilterId, JobId, TenantId};

use crate::subject::{NameOrigin, Subject};

/// Job execution status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed by the dispatcher
    Ready,
    /// Claimed, submission to the provider in progress
    Queued,
    /// Accepted by the provider, awaiting the result callback
    Started,
    /// Results ingested
    Finished,
    /// Submission or processing failed; eligible for the stall path
    Stopped,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Ready,
        JobStatus::Queued,
        JobStatus::Started,
        JobStatus::Finished,
        JobStatus::Stopped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Ready => "ready",
            JobStatus::Queued => "queued",
            JobStatus::Started => "started",
            JobStatus::Finished => "finished",
            JobStatus::Stopped => "stopped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|st| st.as_str() == s)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished)
    }

    /// States the stall detector may reclaim.
    pub fn is_stallable(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Started | JobStatus::Stopped)
    }

    /// Whether a job in this state must / must not carry a correlation id.
    ///
    /// `Some(false)`: must be absent, `Some(true)`: must be present,
    /// `None`: either (a stopped job may have failed before or after submission).
    pub fn requires_correlation(&self) -> Option<bool> {
        match self {
            JobStatus::Ready | JobStatus::Queued => Some(false),
            JobStatus::Started | JobStatus::Finished => Some(true),
            JobStatus::Stopped => None,
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatch priority tier. Higher tiers are claimed first.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background / batch (0)
    Background,
    /// User-triggered (1)
    Interactive,
}

impl Priority {
    pub fn as_i16(&self) -> i16 {
        match self {
            Priority::Background => 0,
            Priority::Interactive => 1,
        }
    }

    pub fn from_i16(v: i16) -> Self {
        if v >= 1 {
            Priority::Interactive
        } else {
            Priority::Background
        }
    }
}

/// Publication window restricting a provider search. The start may be open.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: NaiveDate,
}

impl DateRange {
    /// Parse a raw `(start, end)` pair supplied by a caller.
    ///
    /// A start without an end is rejected; both must be `YYYY-MM-DD` dates and
    /// `start <= end`. `(None, None)` means "no restriction".
    pub fn parse(start: Option<&str>, end: Option<&str>) -> DomainResult<Option<Self>> {
        let start = start.map(str::trim).filter(|s| !s.is_empty());
        let end = end.map(str::trim).filter(|s| !s.is_empty());

        match (start, end) {
            (None, None) => Ok(None),
            (Some(_), None) => Err(DomainError::validation(
                "date range start supplied without an end",
            )),
            (start, Some(end)) => {
                let end = parse_date("end", end)?;
                let start = start.map(|s| parse_date("start", s)).transpose()?;
                if let Some(start) = start {
                    if start > end {
                        return Err(DomainError::validation(format!(
                            "date range start {start} is after end {end}"
                        )));
                    }
                }
                Ok(Some(Self { start, end }))
            }
        }
    }
}

fn parse_date(which: &str, raw: &str) -> DomainResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| DomainError::validation(format!("date range {which} '{raw}': {e}")))
}

/// The provider-facing parameters of a search. Jobs with equal requests (within a
/// tenant) are serviced by one provider call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchRequest {
    pub subject: Subject,
    pub search_term: String,
    pub refinement_term: Option<String>,
    pub date_range: Option<DateRange>,
    pub provider_tenant_id: Option<TenantId>,
}

impl SearchRequest {
    /// The session-opening request a refinement is layered onto.
    pub fn base(&self) -> SearchRequest {
        SearchRequest {
            refinement_term: None,
            ..self.clone()
        }
    }
}

/// Raw enqueue input, from the filter provider or an interactive user action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub tenant_id: TenantId,
    pub provider_tenant_id: Option<TenantId>,
    pub subject: Subject,
    pub name_origin: NameOrigin,
    pub search_term: String,
    pub refinement_term: Option<String>,
    pub date_start: Option<String>,
    pub date_end: Option<String>,
    pub priority: Priority,
    pub filter_id: Option<FilterId>,
    pub exempt: bool,
}

impl EnqueueRequest {
    /// Validate into a job ready for insertion. Rejected requests never reach the store.
    pub fn validate(self) -> DomainResult<NewSearchJob> {
        let search_term = self.search_term.trim().to_string();
        if search_term.is_empty() {
            return Err(DomainError::validation("search term is required"));
        }

        let date_range = DateRange::parse(self.date_start.as_deref(), self.date_end.as_deref())?;
        let refinement_term = self
            .refinement_term
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Ok(NewSearchJob {
            tenant_id: self.tenant_id,
            provider_tenant_id: self.provider_tenant_id,
            subject: self.subject,
            name_origin: self.name_origin,
            search_term,
            refinement_term,
            date_range,
            priority: self.priority,
            filter_id: self.filter_id,
            exempt: self.exempt,
            correlation_id: None,
            manual: false,
        })
    }
}

/// A validated job not yet assigned an id by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSearchJob {
    pub tenant_id: TenantId,
    pub provider_tenant_id: Option<TenantId>,
    pub subject: Subject,
    pub name_origin: NameOrigin,
    pub search_term: String,
    pub refinement_term: Option<String>,
    pub date_range: Option<DateRange>,
    pub priority: Priority,
    pub filter_id: Option<FilterId>,
    pub exempt: bool,
    /// Pre-attached provider session. Jobs created with one start in `started`.
    pub correlation_id: Option<CorrelationId>,
    /// Tracking job created so that an externally opened session is never orphaned.
    pub manual: bool,
}

impl NewSearchJob {
    /// Attach an already-open provider session to this job.
    pub fn attached_to(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn into_job(self, id: JobId, now: DateTime<Utc>) -> SearchJob {
        let status = if self.correlation_id.is_some() {
            JobStatus::Started
        } else {
            JobStatus::Ready
        };
        SearchJob {
            id,
            tenant_id: self.tenant_id,
            provider_tenant_id: self.provider_tenant_id,
            subject: self.subject,
            name_origin: self.name_origin,
            search_term: self.search_term,
            refinement_term: self.refinement_term,
            date_range: self.date_range,
            priority: self.priority,
            status,
            correlation_id: self.correlation_id,
            times_requeued: 0,
            exempt: self.exempt,
            filter_id: self.filter_id,
            manual: self.manual,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One unit of adverse-media search work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchJob {
    pub id: JobId,
    pub tenant_id: TenantId,
    pub provider_tenant_id: Option<TenantId>,
    pub subject: Subject,
    pub name_origin: NameOrigin,
    pub search_term: String,
    pub refinement_term: Option<String>,
    pub date_range: Option<DateRange>,
    pub priority: Priority,
    pub status: JobStatus,
    pub correlation_id: Option<CorrelationId>,
    pub times_requeued: u32,
    /// Excluded from tenant usage accounting.
    pub exempt: bool,
    pub filter_id: Option<FilterId>,
    pub manual: bool,
    /// Reset on requeue; the stall clock runs from here.
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SearchJob {
    pub fn request(&self) -> SearchRequest {
        SearchRequest {
            subject: self.subject,
            search_term: self.search_term.clone(),
            refinement_term: self.refinement_term.clone(),
            date_range: self.date_range,
            provider_tenant_id: self.provider_tenant_id,
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.priority == Priority::Interactive
    }

    /// Check the correlation id / status invariant.
    pub fn check_invariants(&self) -> DomainResult<()> {
        match self.status.requires_correlation() {
            Some(true) if self.correlation_id.is_none() => Err(DomainError::invariant(format!(
                "job {} is {} without a correlation id",
                self.id, self.status
            ))),
            Some(false) if self.correlation_id.is_some() => Err(DomainError::invariant(format!(
                "job {} is {} but carries a correlation id",
                self.id, self.status
            ))),
            _ => Ok(()),
        }
    }

    /// `ready → queued`.
    pub fn claim(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.expect(JobStatus::Ready, "claim")?;
        self.status = JobStatus::Queued;
        self.updated_at = now;
        Ok(())
    }

    /// `queued → started`, recording the provider's correlation id.
    pub fn start(&mut self, correlation_id: CorrelationId, now: DateTime<Utc>) -> DomainResult<()> {
        self.expect(JobStatus::Queued, "start")?;
        self.status = JobStatus::Started;
        self.correlation_id = Some(correlation_id);
        self.updated_at = now;
        Ok(())
    }

    /// `started → finished`.
    pub fn finish(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.expect(JobStatus::Started, "finish")?;
        self.status = JobStatus::Finished;
        self.updated_at = now;
        Ok(())
    }

    /// Any non-finished state `→ stopped`.
    pub fn stop(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(DomainError::illegal_transition(format!(
                "job {} is finished and cannot be stopped",
                self.id
            )));
        }
        self.status = JobStatus::Stopped;
        self.updated_at = now;
        Ok(())
    }

    /// `queued | started | stopped → ready`. Refused once `limit` requeues were spent.
    pub fn requeue(&mut self, limit: u32, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.status.is_stallable() {
            return Err(DomainError::illegal_transition(format!(
                "job {} cannot be requeued from {}",
                self.id, self.status
            )));
        }
        if self.times_requeued >= limit {
            return Err(DomainError::invariant(format!(
                "job {} already requeued {} times (limit {limit})",
                self.id, self.times_requeued
            )));
        }
        self.status = JobStatus::Ready;
        self.correlation_id = None;
        self.times_requeued += 1;
        self.created_at = now;
        self.updated_at = now;
        Ok(())
    }

    fn expect(&self, expected: JobStatus, op: &str) -> DomainResult<()> {
        if self.status != expected {
            return Err(DomainError::illegal_transition(format!(
                "cannot {op} job {} in status {} (expected {expected})",
                self.id, self.status
            )));
        }
        Ok(())
    }
}
