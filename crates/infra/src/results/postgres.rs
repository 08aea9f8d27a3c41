//! Postgres-backed result store.
//!
//! `insert_deduplicated` runs in one transaction holding a per-subject advisory lock,
//! so concurrent or duplicated callbacks for the same subject are serialized and the
//! dedup check cannot race the insert.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use mediawatch_core::{JobId, ResultId, TenantId};
use mediawatch_screening::{AdjudicationCounts, DedupMode, NewResultRecord, ResultRecord, Subject};

use super::store::{InsertOutcome, ResultStore, SubjectSummary, plan_inserts};
use crate::error::StoreError;
use crate::pg::{decode, map_sqlx_error, subject_from_row};
use crate::tenants::TenantSettings;

const RESULT_COLUMNS: &str = r#"
    id, tenant_id, job_id, subject_kind, subject_id, title, url, snippet,
    published_date, relevance, content_hash, content_hash_no_publish, deleted, created_at
"#;

#[derive(Debug, Clone)]
pub struct PostgresResultStore {
    pool: Arc<PgPool>,
}

impl PostgresResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn dedup_column(mode: DedupMode) -> &'static str {
    match mode {
        DedupMode::Standard => "content_hash",
        DedupMode::HideRevisions => "content_hash_no_publish",
    }
}

fn subject_lock_key(tenant_id: TenantId, subject: Subject) -> String {
    format!("search_results:{tenant_id}:{subject}")
}

#[async_trait]
impl ResultStore for PostgresResultStore {
    #[instrument(
        skip(self, records, settings),
        fields(tenant_id = %tenant_id, subject = %subject, hits = records.len()),
        err
    )]
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

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("insert_results", e))?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(subject_lock_key(tenant_id, subject))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_results", e))?;

        let hash_column = dedup_column(settings.dedup_mode);
        let sql = format!(
            r#"
            SELECT {hash_column} AS dedup_hash, url, deleted
            FROM search_results
            WHERE tenant_id = $1 AND subject_kind = $2 AND subject_id = $3
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(subject.kind().as_str())
            .bind(subject.raw_id())
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_results", e))?;

        let mut existing = Vec::with_capacity(rows.len());
        for row in &rows {
            let d = decode("existing result");
            let hash: String = row.try_get("dedup_hash").map_err(&d)?;
            let url: String = row.try_get("url").map_err(&d)?;
            let deleted: bool = row.try_get("deleted").map_err(&d)?;
            existing.push((hash, url.trim().to_string(), deleted));
        }

        let (accepted, skipped) = plan_inserts(&existing, records, settings);

        let mut outcome = InsertOutcome {
            skipped,
            ..Default::default()
        };
        let insert_sql = format!(
            r#"
            INSERT INTO search_results (
                tenant_id, job_id, subject_kind, subject_id, title, url, snippet,
                published_date, relevance, content_hash, content_hash_no_publish, deleted, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, FALSE, $12)
            RETURNING {RESULT_COLUMNS}
            "#
        );
        for (record, first_seen) in accepted {
            let row = sqlx::query(&insert_sql)
                .bind(record.tenant_id.as_uuid())
                .bind(record.job_id.get())
                .bind(record.subject.kind().as_str())
                .bind(record.subject.raw_id())
                .bind(&record.hit.title)
                .bind(&record.hit.url)
                .bind(&record.hit.snippet)
                .bind(record.hit.published_date)
                .bind(record.hit.relevance)
                .bind(&record.hashes.full)
                .bind(&record.hashes.no_publish)
                .bind(now)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("insert_results", e))?;
            outcome.inserted.push(result_from_row(&row)?);
            if first_seen {
                outcome.first_seen += 1;
            }
        }

        if settings.review_required && outcome.first_seen > 0 {
            sqlx::query(
                r#"
                INSERT INTO subject_summaries (tenant_id, subject_kind, subject_id, pending_review)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (tenant_id, subject_kind, subject_id)
                DO UPDATE SET pending_review = subject_summaries.pending_review + EXCLUDED.pending_review
                "#,
            )
            .bind(tenant_id.as_uuid())
            .bind(subject.kind().as_str())
            .bind(subject.raw_id())
            .bind(outcome.first_seen as i32)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_results", e))?;
            outcome.pending_review_added = outcome.first_seen;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("insert_results", e))?;

        debug!(
            inserted = outcome.inserted.len(),
            skipped = outcome.skipped,
            first_seen = outcome.first_seen,
            "results deduplicated"
        );
        Ok(outcome)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, result_id = %id), err)]
    async fn get(&self, tenant_id: TenantId, id: ResultId) -> Result<Option<ResultRecord>, StoreError> {
        let sql = format!("SELECT {RESULT_COLUMNS} FROM search_results WHERE tenant_id = $1 AND id = $2");
        let row = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_result", e))?;
        row.as_ref().map(result_from_row).transpose()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, subject = %subject), err)]
    async fn list_for_subject(
        &self,
        tenant_id: TenantId,
        subject: Subject,
        include_deleted: bool,
    ) -> Result<Vec<ResultRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT {RESULT_COLUMNS}
            FROM search_results
            WHERE tenant_id = $1 AND subject_kind = $2 AND subject_id = $3
              AND ($4 OR deleted = FALSE)
            ORDER BY id ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(subject.kind().as_str())
            .bind(subject.raw_id())
            .bind(include_deleted)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_results", e))?;
        rows.iter().map(result_from_row).collect()
    }

    #[instrument(skip(self, settings), fields(tenant_id = %tenant_id, result_id = %id), err)]
    async fn set_deleted(
        &self,
        tenant_id: TenantId,
        id: ResultId,
        deleted: bool,
        settings: TenantSettings,
    ) -> Result<ResultRecord, StoreError> {
        let Some(record) = self.get(tenant_id, id).await? else {
            return Err(StoreError::NotFound(format!("result {id}")));
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("set_result_deleted", e))?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(subject_lock_key(tenant_id, record.subject))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_result_deleted", e))?;

        if !deleted && record.deleted {
            let hash_column = dedup_column(settings.dedup_mode);
            let sql = format!(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM search_results
                    WHERE tenant_id = $1 AND subject_kind = $2 AND subject_id = $3
                      AND id <> $4 AND deleted = FALSE AND {hash_column} = $5
                ) AS clash
                "#
            );
            let clash: bool = sqlx::query(&sql)
                .bind(tenant_id.as_uuid())
                .bind(record.subject.kind().as_str())
                .bind(record.subject.raw_id())
                .bind(id.get())
                .bind(record.dedup_hash(settings.dedup_mode))
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("set_result_deleted", e))?
                .try_get("clash")
                .map_err(decode("restore clash"))?;
            if clash {
                return Err(StoreError::Conflict(format!(
                    "result {id} duplicates a live record and cannot be restored"
                )));
            }
        }

        let sql = format!(
            "UPDATE search_results SET deleted = $3 WHERE tenant_id = $1 AND id = $2 RETURNING {RESULT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(id.get())
            .bind(deleted)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_result_deleted", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("set_result_deleted", e))?;
        result_from_row(&row)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, subject = %subject), err)]
    async fn subject_summary(
        &self,
        tenant_id: TenantId,
        subject: Subject,
    ) -> Result<SubjectSummary, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT pending_review, undetermined, false_positive, matched, remediation, refreshed_at
            FROM subject_summaries
            WHERE tenant_id = $1 AND subject_kind = $2 AND subject_id = $3
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(subject.kind().as_str())
        .bind(subject.raw_id())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("subject_summary", e))?;

        row.as_ref()
            .map(summary_from_row)
            .transpose()
            .map(Option::unwrap_or_default)
    }

    #[instrument(skip(self, counts), fields(tenant_id = %tenant_id, subject = %subject), err)]
    async fn store_summary(
        &self,
        tenant_id: TenantId,
        subject: Subject,
        counts: AdjudicationCounts,
        now: DateTime<Utc>,
    ) -> Result<SubjectSummary, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO subject_summaries (
                tenant_id, subject_kind, subject_id, pending_review,
                undetermined, false_positive, matched, remediation, refreshed_at
            )
            VALUES ($1, $2, $3, 0, $4, $5, $6, $7, $8)
            ON CONFLICT (tenant_id, subject_kind, subject_id)
            DO UPDATE SET
                undetermined = EXCLUDED.undetermined,
                false_positive = EXCLUDED.false_positive,
                matched = EXCLUDED.matched,
                remediation = EXCLUDED.remediation,
                refreshed_at = EXCLUDED.refreshed_at,
                pending_review = CASE WHEN EXCLUDED.undetermined = 0 THEN 0
                                      ELSE subject_summaries.pending_review END
            RETURNING pending_review, undetermined, false_positive, matched, remediation, refreshed_at
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(subject.kind().as_str())
        .bind(subject.raw_id())
        .bind(counts.undetermined as i32)
        .bind(counts.false_positive as i32)
        .bind(counts.matched as i32)
        .bind(counts.remediation as i32)
        .bind(now)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("store_summary", e))?;
        summary_from_row(&row)
    }
}

fn count(row: &PgRow, column: &str) -> Result<u32, StoreError> {
    let n: i32 = row.try_get(column).map_err(decode("subject summary"))?;
    Ok(n.max(0) as u32)
}

fn summary_from_row(row: &PgRow) -> Result<SubjectSummary, StoreError> {
    Ok(SubjectSummary {
        pending_review: count(row, "pending_review")?,
        counts: AdjudicationCounts {
            undetermined: count(row, "undetermined")?,
            false_positive: count(row, "false_positive")?,
            matched: count(row, "matched")?,
            remediation: count(row, "remediation")?,
        },
        refreshed_at: row.try_get("refreshed_at").map_err(decode("subject summary"))?,
    })
}

fn result_from_row(row: &PgRow) -> Result<ResultRecord, StoreError> {
    let d = decode("search result");
    let id: i64 = row.try_get("id").map_err(&d)?;
    let tenant_id: uuid::Uuid = row.try_get("tenant_id").map_err(&d)?;
    let job_id: i64 = row.try_get("job_id").map_err(&d)?;
    Ok(ResultRecord {
        id: ResultId::new(id),
        tenant_id: TenantId::from_uuid(tenant_id),
        job_id: JobId::new(job_id),
        subject: subject_from_row(row)?,
        title: row.try_get("title").map_err(&d)?,
        url: row.try_get("url").map_err(&d)?,
        snippet: row.try_get("snippet").map_err(&d)?,
        published_date: row.try_get("published_date").map_err(&d)?,
        relevance: row.try_get("relevance").map_err(&d)?,
        content_hash: row.try_get("content_hash").map_err(&d)?,
        content_hash_no_publish: row.try_get("content_hash_no_publish").map_err(&d)?,
        deleted: row.try_get("deleted").map_err(&d)?,
        created_at: row.try_get("created_at").map_err(&d)?,
    })
}
