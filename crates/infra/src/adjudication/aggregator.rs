//! Read-through adjudication counts per subject.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use mediawatch_core::{ScreeningId, TenantId};
use mediawatch_screening::{AdjudicationCounts, Determination, NewDetermination, Subject};

use super::store::DeterminationStore;
use crate::error::StoreError;
use crate::results::{ResultStore, SubjectSummary};

/// Derives counts from the latest determination of each live result. Nothing here is
/// cached as ground truth; [`AdjudicationAggregator::refresh_summary`] only writes the
/// list-view copy.
#[derive(Clone)]
pub struct AdjudicationAggregator {
    results: Arc<dyn ResultStore>,
    determinations: Arc<dyn DeterminationStore>,
}

impl AdjudicationAggregator {
    pub fn new(results: Arc<dyn ResultStore>, determinations: Arc<dyn DeterminationStore>) -> Self {
        Self {
            results,
            determinations,
        }
    }

    /// Counts for a subject. `screening_id = None` uses the latest determination across
    /// all screening rounds.
    pub async fn counts(
        &self,
        tenant_id: TenantId,
        subject: Subject,
        screening_id: Option<ScreeningId>,
    ) -> Result<AdjudicationCounts, StoreError> {
        let results = self
            .results
            .list_for_subject(tenant_id, subject, false)
            .await?;
        let ids: Vec<_> = results.iter().map(|r| r.id).collect();
        if ids.is_empty() {
            return Ok(AdjudicationCounts::default());
        }

        let latest = self
            .determinations
            .latest_for(tenant_id, screening_id, &ids)
            .await?;
        let reasons = self.determinations.remediation_reasons(tenant_id).await?;
        Ok(AdjudicationCounts::tally(&ids, &latest, &reasons))
    }

    /// Recompute the subject's counts and store them on its summary row.
    pub async fn refresh_summary(
        &self,
        tenant_id: TenantId,
        subject: Subject,
        now: DateTime<Utc>,
    ) -> Result<SubjectSummary, StoreError> {
        let counts = self.counts(tenant_id, subject, None).await?;
        let summary = self
            .results
            .store_summary(tenant_id, subject, counts, now)
            .await?;
        debug!(
            tenant_id = %tenant_id,
            subject = %subject,
            undetermined = counts.undetermined,
            matched = counts.matched,
            false_positive = counts.false_positive,
            "subject summary refreshed"
        );
        Ok(summary)
    }

    /// Append a determination for a result of this tenant, then refresh the summary.
    pub async fn record(
        &self,
        determination: NewDetermination,
        now: DateTime<Utc>,
    ) -> Result<Determination, StoreError> {
        let result = self
            .results
            .get(determination.tenant_id, determination.result_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("result {}", determination.result_id)))?;

        let appended = self.determinations.append(determination, now).await?;
        self.refresh_summary(result.tenant_id, result.subject, now)
            .await?;
        Ok(appended)
    }
}
