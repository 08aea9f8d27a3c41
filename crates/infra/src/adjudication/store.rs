//! Append-only determination log and the remediation reason catalogue.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use mediawatch_core::{ReasonId, ResultId, ScreeningId, TenantId};
use mediawatch_screening::determination::latest;
use mediawatch_screening::{Determination, NewDetermination};

use crate::error::StoreError;

#[async_trait]
pub trait DeterminationStore: Send + Sync {
    async fn append(
        &self,
        determination: NewDetermination,
        now: DateTime<Utc>,
    ) -> Result<Determination, StoreError>;

    /// Latest determination per result, optionally scoped to one screening round.
    /// Results without any determination are absent from the map.
    async fn latest_for(
        &self,
        tenant_id: TenantId,
        screening_id: Option<ScreeningId>,
        result_ids: &[ResultId],
    ) -> Result<HashMap<ResultId, Determination>, StoreError>;

    /// Full history of one result, in append order.
    async fn history(
        &self,
        tenant_id: TenantId,
        result_id: ResultId,
    ) -> Result<Vec<Determination>, StoreError>;

    /// Reasons whose matches require remediation.
    async fn remediation_reasons(&self, tenant_id: TenantId) -> Result<HashSet<ReasonId>, StoreError>;

    async fn flag_reason(
        &self,
        tenant_id: TenantId,
        reason_id: ReasonId,
        requires_remediation: bool,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct Inner {
    log: Vec<Determination>,
    reasons: HashMap<TenantId, HashSet<ReasonId>>,
}

#[derive(Debug, Default)]
pub struct InMemoryDeterminationStore {
    inner: RwLock<Inner>,
}

impl InMemoryDeterminationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl DeterminationStore for InMemoryDeterminationStore {
    async fn append(
        &self,
        determination: NewDetermination,
        now: DateTime<Utc>,
    ) -> Result<Determination, StoreError> {
        let determination = determination.into_determination(now);
        self.inner
            .write()
            .map_err(|_| StoreError::poisoned())?
            .log
            .push(determination.clone());
        Ok(determination)
    }

    async fn latest_for(
        &self,
        tenant_id: TenantId,
        screening_id: Option<ScreeningId>,
        result_ids: &[ResultId],
    ) -> Result<HashMap<ResultId, Determination>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::poisoned())?;
        let wanted: HashSet<ResultId> = result_ids.iter().copied().collect();

        let mut grouped: HashMap<ResultId, Vec<&Determination>> = HashMap::new();
        for d in inner.log.iter().filter(|d| {
            d.tenant_id == tenant_id
                && wanted.contains(&d.result_id)
                && screening_id.is_none_or(|s| d.screening_id == s)
        }) {
            grouped.entry(d.result_id).or_default().push(d);
        }

        Ok(grouped
            .into_iter()
            .filter_map(|(id, history)| latest(history).map(|d| (id, d.clone())))
            .collect())
    }

    async fn history(
        &self,
        tenant_id: TenantId,
        result_id: ResultId,
    ) -> Result<Vec<Determination>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::poisoned())?;
        Ok(inner
            .log
            .iter()
            .filter(|d| d.tenant_id == tenant_id && d.result_id == result_id)
            .cloned()
            .collect())
    }

    async fn remediation_reasons(&self, tenant_id: TenantId) -> Result<HashSet<ReasonId>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::poisoned())?;
        Ok(inner.reasons.get(&tenant_id).cloned().unwrap_or_default())
    }

    async fn flag_reason(
        &self,
        tenant_id: TenantId,
        reason_id: ReasonId,
        requires_remediation: bool,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::poisoned())?;
        let reasons = inner.reasons.entry(tenant_id).or_default();
        if requires_remediation {
            reasons.insert(reason_id);
        } else {
            reasons.remove(&reason_id);
        }
        Ok(())
    }
}
