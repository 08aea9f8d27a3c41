//! The Filter Provider boundary: which subjects are due for a search round.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use mediawatch_core::{FilterId, TenantId};
use mediawatch_screening::{NameOrigin, Priority, SubjectKind};

#[derive(Debug, Clone, Error)]
pub enum FilterError {
    #[error("filter provider unavailable: {0}")]
    Unavailable(String),
    #[error("unknown filter {0}")]
    UnknownFilter(FilterId),
}

/// A tenant filter rule due for a search round, with the settings shared by every
/// candidate it yields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterAssignment {
    pub tenant_id: TenantId,
    pub provider_tenant_id: Option<TenantId>,
    pub filter_id: FilterId,
    /// Tenant-level refinement term appended to every search.
    pub refinement_term: Option<String>,
    pub date_start: Option<String>,
    pub date_end: Option<String>,
    pub priority: Priority,
    /// Skip subjects that already had a provider call for this tenant.
    pub only_new: bool,
    pub exempt: bool,
}

/// One candidate subject. `cursor` orders the filter's result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub cursor: i64,
    pub subject_id: i64,
    pub id_type: SubjectKind,
    pub term: String,
    pub term_origin: NameOrigin,
    pub record_type: String,
}

#[async_trait]
pub trait FilterProvider: Send + Sync {
    async fn due_filters(&self, now: DateTime<Utc>) -> Result<Vec<FilterAssignment>, FilterError>;

    /// Next page of candidates with `cursor > after`, ascending.
    async fn candidates(
        &self,
        assignment: &FilterAssignment,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Candidate>, FilterError>;

    /// The filter's candidates were all enqueued; it is not due again until rescheduled.
    async fn mark_loaded(
        &self,
        assignment: &FilterAssignment,
        now: DateTime<Utc>,
    ) -> Result<(), FilterError>;
}

#[derive(Debug, Clone)]
struct Entry {
    assignment: FilterAssignment,
    candidates: Vec<Candidate>,
    due: bool,
}

/// In-memory filter provider for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryFilterProvider {
    entries: RwLock<Vec<Entry>>,
}

impl InMemoryFilterProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register (or reschedule) a filter with its candidate set.
    pub fn schedule(&self, assignment: FilterAssignment, mut candidates: Vec<Candidate>) {
        candidates.sort_by_key(|c| c.cursor);
        let Ok(mut entries) = self.entries.write() else {
            return;
        };
        entries.retain(|e| {
            (e.assignment.tenant_id, e.assignment.filter_id)
                != (assignment.tenant_id, assignment.filter_id)
        });
        entries.push(Entry {
            assignment,
            candidates,
            due: true,
        });
    }
}

fn poisoned() -> FilterError {
    FilterError::Unavailable("in-memory filter provider lock poisoned".to_string())
}

#[async_trait]
impl FilterProvider for InMemoryFilterProvider {
    async fn due_filters(&self, _now: DateTime<Utc>) -> Result<Vec<FilterAssignment>, FilterError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries
            .iter()
            .filter(|e| e.due)
            .map(|e| e.assignment.clone())
            .collect())
    }

    async fn candidates(
        &self,
        assignment: &FilterAssignment,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Candidate>, FilterError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        let entry = entries
            .iter()
            .find(|e| {
                e.assignment.tenant_id == assignment.tenant_id
                    && e.assignment.filter_id == assignment.filter_id
            })
            .ok_or(FilterError::UnknownFilter(assignment.filter_id))?;
        Ok(entry
            .candidates
            .iter()
            .filter(|c| after.is_none_or(|a| c.cursor > a))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_loaded(
        &self,
        assignment: &FilterAssignment,
        _now: DateTime<Utc>,
    ) -> Result<(), FilterError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        for e in entries.iter_mut().filter(|e| {
            e.assignment.tenant_id == assignment.tenant_id
                && e.assignment.filter_id == assignment.filter_id
        }) {
            e.due = false;
        }
        Ok(())
    }
}
