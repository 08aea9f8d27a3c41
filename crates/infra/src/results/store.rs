//! Result record storage with per-subject deduplication.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use mediawatch_core::{ResultId, TenantId};
use mediawatch_screening::{AdjudicationCounts, NewResultRecord, ResultRecord, Subject};

use crate::error::StoreError;
use crate::tenants::TenantSettings;

/// What one deduplicated insert did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertOutcome {
    pub inserted: Vec<ResultRecord>,
    /// Hits whose dedup hash was already present (in the store or earlier in the batch).
    pub skipped: u32,
    /// Inserted hits whose url had never been seen for the subject, deleted records included.
    pub first_seen: u32,
    /// Amount the pending-review counter was raised by.
    pub pending_review_added: u32,
}

/// Cached list-view counters for one subject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSummary {
    pub pending_review: u32,
    pub counts: AdjudicationCounts,
    pub refreshed_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert the hits that are not duplicates for `(tenant, subject)` under the tenant's
    /// dedup mode, and raise the pending-review counter by the first-seen count when the
    /// tenant requires review. All or nothing.
    async fn insert_deduplicated(
        &self,
        tenant_id: TenantId,
        subject: Subject,
        records: Vec<NewResultRecord>,
        settings: TenantSettings,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome, StoreError>;

    async fn get(&self, tenant_id: TenantId, id: ResultId) -> Result<Option<ResultRecord>, StoreError>;

    /// Records for the subject in insertion order.
    async fn list_for_subject(
        &self,
        tenant_id: TenantId,
        subject: Subject,
        include_deleted: bool,
    ) -> Result<Vec<ResultRecord>, StoreError>;

    /// Soft delete (`true`) or restore (`false`). A restore whose dedup hash under the
    /// tenant's mode matches a live record is refused with [`StoreError::Conflict`].
    async fn set_deleted(
        &self,
        tenant_id: TenantId,
        id: ResultId,
        deleted: bool,
        settings: TenantSettings,
    ) -> Result<ResultRecord, StoreError>;

    async fn subject_summary(
        &self,
        tenant_id: TenantId,
        subject: Subject,
    ) -> Result<SubjectSummary, StoreError>;

    /// Overwrite the cached counts. The pending-review counter is reset once nothing
    /// is left undetermined.
    async fn store_summary(
        &self,
        tenant_id: TenantId,
        subject: Subject,
        counts: AdjudicationCounts,
        now: DateTime<Utc>,
    ) -> Result<SubjectSummary, StoreError>;
}

/// Dedup decisions for one batch, shared by the in-memory and Postgres stores.
///
/// `existing` holds `(dedup hash, url, deleted)` for every record already stored for
/// the subject, deleted ones included.
pub(crate) fn plan_inserts(
    existing: &[(String, String, bool)],
    records: Vec<NewResultRecord>,
    settings: TenantSettings,
) -> (Vec<(NewResultRecord, bool)>, u32) {
    let mut live_hashes: HashSet<String> = existing
        .iter()
        .filter(|(_, _, deleted)| !deleted)
        .map(|(hash, _, _)| hash.clone())
        .collect();
    let mut seen_urls: HashSet<String> = existing.iter().map(|(_, url, _)| url.clone()).collect();

    let mut accepted = Vec::new();
    let mut skipped = 0;
    for record in records {
        let hash = record.hashes.for_mode(settings.dedup_mode).to_string();
        if !live_hashes.insert(hash) {
            skipped += 1;
            continue;
        }
        let first_seen = seen_urls.insert(record.hit.url.trim().to_string());
        accepted.push((record, first_seen));
    }
    (accepted, skipped)
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    records: BTreeMap<ResultId, ResultRecord>,
    summaries: HashMap<(TenantId, Subject), SubjectSummary>,
}

/// In-memory result store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    inner: RwLock<Inner>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn insert_deduplicated(
        &self,
        tenant_id: TenantId,
        subject: Subject,
        records: Vec<NewResultRecord>,
        settings: TenantSettings,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome, StoreError> {
        if let Some(foreign) = records
            .iter()
            .find(|r| r.tenant_id != tenant_id || r.subject != subject)
        {
            return Err(StoreError::TenantIsolation(format!(
                "result for {} / {} in batch for {tenant_id} / {subject}",
                foreign.tenant_id, foreign.subject
            )));
        }

        let mut inner = self.inner.write().map_err(|_| StoreError::poisoned())?;
        let existing: Vec<_> = inner
            .records
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.subject == subject)
            .map(|r| {
                (
                    r.dedup_hash(settings.dedup_mode).to_string(),
                    r.url.trim().to_string(),
                    r.deleted,
                )
            })
            .collect();

        let (accepted, skipped) = plan_inserts(&existing, records, settings);

        let mut outcome = InsertOutcome {
            skipped,
            ..Default::default()
        };
        for (record, first_seen) in accepted {
            inner.next_id += 1;
            let record = record.into_record(ResultId::new(inner.next_id), now);
            inner.records.insert(record.id, record.clone());
            outcome.inserted.push(record);
            if first_seen {
                outcome.first_seen += 1;
            }
        }

        if settings.review_required && outcome.first_seen > 0 {
            let summary = inner.summaries.entry((tenant_id, subject)).or_default();
            summary.pending_review += outcome.first_seen;
            outcome.pending_review_added = outcome.first_seen;
        }
        Ok(outcome)
    }

    async fn get(&self, tenant_id: TenantId, id: ResultId) -> Result<Option<ResultRecord>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::poisoned())?;
        Ok(inner
            .records
            .get(&id)
            .filter(|r| r.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_for_subject(
        &self,
        tenant_id: TenantId,
        subject: Subject,
        include_deleted: bool,
    ) -> Result<Vec<ResultRecord>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::poisoned())?;
        Ok(inner
            .records
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.subject == subject)
            .filter(|r| include_deleted || !r.deleted)
            .cloned()
            .collect())
    }

    async fn set_deleted(
        &self,
        tenant_id: TenantId,
        id: ResultId,
        deleted: bool,
        settings: TenantSettings,
    ) -> Result<ResultRecord, StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::poisoned())?;
        let record = inner
            .records
            .get(&id)
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("result {id}")))?;

        if !deleted && record.deleted {
            // Restoring must not reintroduce a duplicate.
            let hash = record.dedup_hash(settings.dedup_mode);
            let clash = inner.records.values().any(|r| {
                r.id != id
                    && !r.deleted
                    && r.tenant_id == tenant_id
                    && r.subject == record.subject
                    && r.dedup_hash(settings.dedup_mode) == hash
            });
            if clash {
                return Err(StoreError::Conflict(format!(
                    "result {id} duplicates a live record and cannot be restored"
                )));
            }
        }

        let stored = inner
            .records
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("result {id}")))?;
        stored.deleted = deleted;
        Ok(stored.clone())
    }

    async fn subject_summary(
        &self,
        tenant_id: TenantId,
        subject: Subject,
    ) -> Result<SubjectSummary, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::poisoned())?;
        Ok(inner
            .summaries
            .get(&(tenant_id, subject))
            .copied()
            .unwrap_or_default())
    }

    async fn store_summary(
        &self,
        tenant_id: TenantId,
        subject: Subject,
        counts: AdjudicationCounts,
        now: DateTime<Utc>,
    ) -> Result<SubjectSummary, StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::poisoned())?;
        let summary = inner.summaries.entry((tenant_id, subject)).or_default();
        summary.counts = counts;
        summary.refreshed_at = Some(now);
        if counts.undetermined == 0 {
            summary.pending_review = 0;
        }
        Ok(*summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use mediawatch_core::{JobId, ProfileId};
    use mediawatch_screening::{DedupMode, Hit};

    fn hit(url: &str, title: &str, published: Option<(i32, u32, u32)>) -> Hit {
        Hit {
            title: title.to_string(),
            url: url.to_string(),
            snippet: String::new(),
            published_date: published.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
            relevance: 0.5,
        }
    }

    fn records(tenant: TenantId, subject: Subject, hits: Vec<Hit>) -> Vec<NewResultRecord> {
        hits.into_iter()
            .map(|h| NewResultRecord::new(tenant, JobId::new(1), subject, h))
            .collect()
    }

    fn settings(mode: DedupMode) -> TenantSettings {
        TenantSettings {
            dedup_mode: mode,
            review_required: true,
        }
    }

    #[tokio::test]
    async fn second_insert_of_same_hits_is_skipped() {
        let store = InMemoryResultStore::new();
        let tenant = TenantId::new();
        let subject = Subject::Profile(ProfileId::new(1));
        let batch = vec![hit("http://a", "X", None), hit("http://b", "Y", None)];

        let first = store
            .insert_deduplicated(tenant, subject, records(tenant, subject, batch.clone()), settings(DedupMode::Standard), Utc::now())
            .await
            .unwrap();
        let second = store
            .insert_deduplicated(tenant, subject, records(tenant, subject, batch), settings(DedupMode::Standard), Utc::now())
            .await
            .unwrap();

        assert_eq!(first.inserted.len(), 2);
        assert_eq!(first.first_seen, 2);
        assert!(second.inserted.is_empty());
        assert_eq!(second.skipped, 2);
        assert_eq!(store.subject_summary(tenant, subject).await.unwrap().pending_review, 2);
    }

    #[tokio::test]
    async fn revision_hiding_ignores_publish_date() {
        let store = InMemoryResultStore::new();
        let tenant = TenantId::new();
        let subject = Subject::Profile(ProfileId::new(1));
        let batch = vec![
            hit("http://a", "X", Some((2024, 1, 1))),
            hit("http://a", "X", Some((2024, 2, 1))),
        ];

        let hiding = store
            .insert_deduplicated(tenant, subject, records(tenant, subject, batch.clone()), settings(DedupMode::HideRevisions), Utc::now())
            .await
            .unwrap();
        assert_eq!(hiding.inserted.len(), 1);
        assert_eq!(hiding.skipped, 1);

        let other = Subject::Profile(ProfileId::new(2));
        let standard = store
            .insert_deduplicated(tenant, other, records(tenant, other, batch), settings(DedupMode::Standard), Utc::now())
            .await
            .unwrap();
        assert_eq!(standard.inserted.len(), 2);
        // Same url twice: only the first is new.
        assert_eq!(standard.first_seen, 1);
    }

    #[tokio::test]
    async fn deleted_records_do_not_block_reinsert_but_count_as_seen() {
        let store = InMemoryResultStore::new();
        let tenant = TenantId::new();
        let subject = Subject::Person(mediawatch_core::PersonId::new(5));
        let batch = vec![hit("http://a", "X", None)];

        let first = store
            .insert_deduplicated(tenant, subject, records(tenant, subject, batch.clone()), settings(DedupMode::Standard), Utc::now())
            .await
            .unwrap();
        store
            .set_deleted(tenant, first.inserted[0].id, true, settings(DedupMode::Standard))
            .await
            .unwrap();

        let again = store
            .insert_deduplicated(tenant, subject, records(tenant, subject, batch), settings(DedupMode::Standard), Utc::now())
            .await
            .unwrap();
        assert_eq!(again.inserted.len(), 1);
        assert_eq!(again.first_seen, 0);

        // The deleted copy now clashes with the live one.
        let err = store
            .set_deleted(tenant, first.inserted[0].id, false, settings(DedupMode::Standard))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.list_for_subject(tenant, subject, false).await.unwrap().len(), 1);
        assert_eq!(store.list_for_subject(tenant, subject, true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn restore_on_revision_hiding_tenant_checks_publish_insensitive_hash() {
        let store = InMemoryResultStore::new();
        let tenant = TenantId::new();
        let subject = Subject::Profile(ProfileId::new(3));
        let hiding = settings(DedupMode::HideRevisions);

        let original = store
            .insert_deduplicated(tenant, subject, records(tenant, subject, vec![hit("http://a", "X", Some((2024, 1, 1)))]), hiding, Utc::now())
            .await
            .unwrap();
        let original_id = original.inserted[0].id;
        store.set_deleted(tenant, original_id, true, hiding).await.unwrap();

        let republished = store
            .insert_deduplicated(tenant, subject, records(tenant, subject, vec![hit("http://a", "X", Some((2024, 1, 2)))]), hiding, Utc::now())
            .await
            .unwrap();
        assert_eq!(republished.inserted.len(), 1);

        let err = store
            .set_deleted(tenant, original_id, false, hiding)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.list_for_subject(tenant, subject, false).await.unwrap().len(), 1);

        // Under standard dedup the two revisions are distinct hits.
        let restored = store
            .set_deleted(tenant, original_id, false, settings(DedupMode::Standard))
            .await
            .unwrap();
        assert!(!restored.deleted);
    }

    #[tokio::test]
    async fn no_review_tenants_do_not_count_pending() {
        let store = InMemoryResultStore::new();
        let tenant = TenantId::new();
        let subject = Subject::Profile(ProfileId::new(1));
        let outcome = store
            .insert_deduplicated(
                tenant,
                subject,
                records(tenant, subject, vec![hit("http://a", "X", None)]),
                TenantSettings {
                    dedup_mode: DedupMode::Standard,
                    review_required: false,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.first_seen, 1);
        assert_eq!(outcome.pending_review_added, 0);
    }

    #[tokio::test]
    async fn foreign_records_are_rejected() {
        let store = InMemoryResultStore::new();
        let tenant = TenantId::new();
        let subject = Subject::Profile(ProfileId::new(1));
        let batch = records(TenantId::new(), subject, vec![hit("http://a", "X", None)]);
        let err = store
            .insert_deduplicated(tenant, subject, batch, settings(DedupMode::Standard), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TenantIsolation(_)));
    }

    #[tokio::test]
    async fn summary_refresh_resets_pending_when_nothing_undetermined() {
        let store = InMemoryResultStore::new();
        let tenant = TenantId::new();
        let subject = Subject::Profile(ProfileId::new(1));
        store
            .insert_deduplicated(tenant, subject, records(tenant, subject, vec![hit("http://a", "X", None)]), settings(DedupMode::Standard), Utc::now())
            .await
            .unwrap();

        let pending = AdjudicationCounts {
            undetermined: 1,
            ..Default::default()
        };
        assert_eq!(store.store_summary(tenant, subject, pending, Utc::now()).await.unwrap().pending_review, 1);

        let done = AdjudicationCounts {
            matched: 1,
            ..Default::default()
        };
        let summary = store.store_summary(tenant, subject, done, Utc::now()).await.unwrap();
        assert_eq!(summary.pending_review, 0);
        assert_eq!(summary.counts.matched, 1);
    }
}
