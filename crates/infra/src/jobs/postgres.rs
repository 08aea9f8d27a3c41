//! Postgres-backed job, search-call and stall-log stores.
//!
//! Every status change is a single `UPDATE ... WHERE id = $1 AND status = $2`.
//! Zero affected rows means another worker won the race and the caller
//! gets [`TransitionOutcome::Contended`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use mediawatch_core::{CorrelationId, FilterId, JobId, TenantId};
use mediawatch_screening::{
    DateRange, InFlightSnapshot, JobStatus, NameOrigin, NewSearchJob, Priority, SearchCall,
    SearchJob, SearchRequest, StallAction, StallLogEntry, Subject,
};

use super::stall_log::StallLog;
use super::store::{JobStats, JobStore, SearchCallStore, Transition, TransitionOutcome};
use crate::error::StoreError;
use crate::pg::{decode, map_sqlx_error, subject_from_row};

const JOB_COLUMNS: &str = r#"
    id, tenant_id, provider_tenant_id, subject_kind, subject_id, name_origin,
    search_term, refinement_term, date_start, date_end, priority, status,
    correlation_id, times_requeued, exempt, filter_id, manual, created_at, updated_at
"#;

/// Postgres job store. Also implements [`SearchCallStore`] and [`StallLog`].
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(tenant_id = %job.tenant_id, subject = %job.subject), err)]
    async fn insert(
        &self,
        job: NewSearchJob,
        now: DateTime<Utc>,
    ) -> Result<SearchJob, StoreError> {
        let status = if job.correlation_id.is_some() {
            JobStatus::Started
        } else {
            JobStatus::Ready
        };
        let (date_start, date_end) = split_range(job.date_range);

        let sql = format!(
            r#"
            INSERT INTO search_jobs (
                tenant_id, provider_tenant_id, subject_kind, subject_id, name_origin,
                search_term, refinement_term, date_start, date_end, priority, status,
                correlation_id, times_requeued, exempt, filter_id, manual, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 0, $13, $14, $15, $16, $16)
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(job.tenant_id.as_uuid())
            .bind(job.provider_tenant_id.map(|t| *t.as_uuid()))
            .bind(job.subject.kind().as_str())
            .bind(job.subject.raw_id())
            .bind(job.name_origin.as_str())
            .bind(&job.search_term)
            .bind(&job.refinement_term)
            .bind(date_start)
            .bind(date_end)
            .bind(job.priority.as_i16())
            .bind(status.as_str())
            .bind(job.correlation_id.map(|c| c.get()))
            .bind(job.exempt)
            .bind(job.filter_id.map(|f| f.get()))
            .bind(job.manual)
            .bind(now)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_job", e))?;

        job_from_row(&row)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn get(&self, job_id: JobId) -> Result<Option<SearchJob>, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM search_jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(job_id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?;
        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn select_ready(&self, limit: usize) -> Result<Vec<SearchJob>, StoreError> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM search_jobs
            WHERE status = 'ready' AND correlation_id IS NULL
            ORDER BY priority DESC, id ASC
            LIMIT $1
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("select_ready", e))?;
        rows.iter().map(job_from_row).collect()
    }

    #[instrument(
        skip(self),
        fields(job_id = %job_id, expected = %expected, target = %transition.target()),
        err
    )]
    async fn transition(
        &self,
        job_id: JobId,
        expected: JobStatus,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError> {
        if !transition.permits(expected) {
            return Ok(TransitionOutcome::Contended);
        }

        let target = transition.target().as_str();
        let (set_clause, extra_where) = match transition {
            Transition::Start(_) => ("correlation_id = $5", ""),
            Transition::Requeue { .. } => (
                "correlation_id = NULL, times_requeued = times_requeued + 1, created_at = $4",
                "AND times_requeued < $5",
            ),
            Transition::Claim | Transition::Finish | Transition::Stop => ("", ""),
        };
        let set_clause = if set_clause.is_empty() {
            String::new()
        } else {
            format!(", {set_clause}")
        };
        let sql = format!(
            r#"
            UPDATE search_jobs
            SET status = $3, updated_at = $4 {set_clause}
            WHERE id = $1 AND status = $2 {extra_where}
            RETURNING {JOB_COLUMNS}
            "#
        );

        let mut query = sqlx::query(&sql)
            .bind(job_id.get())
            .bind(expected.as_str())
            .bind(target)
            .bind(now);
        query = match transition {
            Transition::Start(correlation_id) => query.bind(correlation_id.get()),
            Transition::Requeue { limit } => query.bind(limit as i32),
            _ => query,
        };

        let row = query
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("transition_job", e))?;

        match row {
            Some(row) => Ok(TransitionOutcome::Applied(job_from_row(&row)?)),
            None => Ok(TransitionOutcome::Contended),
        }
    }

    #[instrument(skip(self), fields(job_id = %job_id, expected = %expected), err)]
    async fn delete(&self, job_id: JobId, expected: JobStatus) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM search_jobs WHERE id = $1 AND status = $2")
            .bind(job_id.get())
            .bind(expected.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_job", e))?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, correlation_id = %correlation_id), err)]
    async fn find_by_correlation(
        &self,
        tenant_id: TenantId,
        correlation_id: CorrelationId,
    ) -> Result<Vec<SearchJob>, StoreError> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM search_jobs
            WHERE tenant_id = $1 AND correlation_id = $2
            ORDER BY created_at DESC, id DESC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(correlation_id.get())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_correlation", e))?;
        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn find_stalled(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SearchJob>, StoreError> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM search_jobs
            WHERE status IN ('queued', 'started', 'stopped') AND created_at < $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .bind(limit as i64)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_stalled", e))?;
        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn purge_finished(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM search_jobs
            WHERE id IN (
                SELECT id FROM search_jobs
                WHERE status = 'finished' AND updated_at < $1
                ORDER BY id
                LIMIT $2
            )
            AND status = 'finished'
            "#,
        )
        .bind(cutoff)
        .bind(limit as i64)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("purge_finished", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, job_ids), fields(tenant_id = %tenant_id, count = job_ids.len()), err)]
    async fn statuses(
        &self,
        tenant_id: TenantId,
        job_ids: &[JobId],
    ) -> Result<HashMap<JobId, JobStatus>, StoreError> {
        let ids: Vec<i64> = job_ids.iter().map(|id| id.get()).collect();
        let rows = sqlx::query(
            "SELECT id, status FROM search_jobs WHERE tenant_id = $1 AND id = ANY($2)",
        )
        .bind(tenant_id.as_uuid())
        .bind(ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("job_statuses", e))?;

        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id").map_err(decode("job status"))?;
            let status: String = row.try_get("status").map_err(decode("job status"))?;
            out.insert(JobId::new(id), parse_status(&status)?);
        }
        Ok(out)
    }

    #[instrument(skip(self), err)]
    async fn snapshot(&self) -> Result<InFlightSnapshot, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS n
            FROM search_jobs
            WHERE status <> 'finished'
            GROUP BY status
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("in_flight_snapshot", e))?;

        let mut snapshot = InFlightSnapshot::default();
        for (status, n) in status_counts(&rows)? {
            snapshot.record(status, n);
        }
        Ok(snapshot)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn stats(&self, tenant_id: TenantId) -> Result<JobStats, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS n
            FROM search_jobs
            WHERE tenant_id = $1
            GROUP BY status
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("job_stats", e))?;

        let mut stats = JobStats::default();
        for (status, n) in status_counts(&rows)? {
            stats.record(status, n);
        }
        Ok(stats)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn billable_count(
        &self,
        tenant_id: TenantId,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS n
            FROM search_jobs
            WHERE tenant_id = $1 AND exempt = FALSE AND created_at >= $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(since)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("billable_count", e))?
        .try_get("n")
        .map_err(decode("billable count"))?;
        Ok(n.max(0) as u64)
    }
}

#[async_trait]
impl SearchCallStore for PostgresJobStore {
    #[instrument(
        skip(self, call),
        fields(tenant_id = %call.tenant_id, correlation_id = %call.correlation_id),
        err
    )]
    async fn record_call(&self, call: SearchCall) -> Result<SearchCall, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("record_call", e))?;

        let (date_start, date_end) = split_range(call.request.date_range);
        sqlx::query(
            r#"
            INSERT INTO search_calls (
                tenant_id, correlation_id, provider_tenant_id, subject_kind, subject_id,
                search_term, refinement_term, date_start, date_end, manual, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (tenant_id, correlation_id) DO NOTHING
            "#,
        )
        .bind(call.tenant_id.as_uuid())
        .bind(call.correlation_id.get())
        .bind(call.request.provider_tenant_id.map(|t| *t.as_uuid()))
        .bind(call.request.subject.kind().as_str())
        .bind(call.request.subject.raw_id())
        .bind(&call.request.search_term)
        .bind(&call.request.refinement_term)
        .bind(date_start)
        .bind(date_end)
        .bind(call.manual)
        .bind(call.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("record_call", e))?;

        for job_id in &call.job_ids {
            sqlx::query(
                r#"
                INSERT INTO search_call_jobs (tenant_id, correlation_id, job_id)
                VALUES ($1, $2, $3)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(call.tenant_id.as_uuid())
            .bind(call.correlation_id.get())
            .bind(job_id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("record_call", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("record_call", e))?;

        self.find_call(call.tenant_id, call.correlation_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("search call {}", call.correlation_id)))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, correlation_id = %correlation_id), err)]
    async fn link_job(
        &self,
        tenant_id: TenantId,
        correlation_id: CorrelationId,
        job_id: JobId,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO search_call_jobs (tenant_id, correlation_id, job_id)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(correlation_id.get())
        .bind(job_id.get())
        .execute(&*self.pool)
        .await
        .map_err(|e| match map_sqlx_error("link_job", e) {
            // FK violation: the call itself was never recorded.
            StoreError::Storage(msg) if msg.contains("foreign key") => {
                StoreError::NotFound(format!("search call {correlation_id}"))
            }
            other => other,
        })?;
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, correlation_id = %correlation_id), err)]
    async fn find_call(
        &self,
        tenant_id: TenantId,
        correlation_id: CorrelationId,
    ) -> Result<Option<SearchCall>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT c.*,
                   COALESCE(
                       ARRAY(
                           SELECT j.job_id FROM search_call_jobs j
                           WHERE j.tenant_id = c.tenant_id AND j.correlation_id = c.correlation_id
                           ORDER BY j.job_id
                       ),
                       '{}'
                   ) AS job_ids
            FROM search_calls c
            WHERE c.tenant_id = $1 AND c.correlation_id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(correlation_id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_call", e))?;
        row.as_ref().map(call_from_row).transpose()
    }

    #[instrument(skip(self, request), fields(tenant_id = %tenant_id, subject = %request.subject), err)]
    async fn find_open_session(
        &self,
        tenant_id: TenantId,
        request: &SearchRequest,
    ) -> Result<Option<SearchCall>, StoreError> {
        let (date_start, date_end) = split_range(request.date_range);
        let row = sqlx::query(
            r#"
            SELECT c.correlation_id
            FROM search_calls c
            WHERE c.tenant_id = $1
              AND c.subject_kind = $2 AND c.subject_id = $3
              AND c.search_term = $4
              AND c.refinement_term IS NOT DISTINCT FROM $5
              AND c.date_start IS NOT DISTINCT FROM $6
              AND c.date_end IS NOT DISTINCT FROM $7
              AND c.provider_tenant_id IS NOT DISTINCT FROM $8
              AND EXISTS (
                  SELECT 1
                  FROM search_call_jobs l
                  JOIN search_jobs j ON j.id = l.job_id
                  WHERE l.tenant_id = c.tenant_id
                    AND l.correlation_id = c.correlation_id
                    AND j.status = 'started'
                    AND j.correlation_id = c.correlation_id
              )
            ORDER BY c.created_at DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(request.subject.kind().as_str())
        .bind(request.subject.raw_id())
        .bind(&request.search_term)
        .bind(&request.refinement_term)
        .bind(date_start)
        .bind(date_end)
        .bind(request.provider_tenant_id.map(|t| *t.as_uuid()))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_open_session", e))?;

        match row {
            Some(row) => {
                let corr: i64 = row.try_get("correlation_id").map_err(decode("open session"))?;
                self.find_call(tenant_id, CorrelationId::new(corr)).await
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, subject = %subject), err)]
    async fn has_prior_call(
        &self,
        tenant_id: TenantId,
        subject: Subject,
    ) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM search_calls
                WHERE tenant_id = $1 AND subject_kind = $2 AND subject_id = $3
            ) AS found
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(subject.kind().as_str())
        .bind(subject.raw_id())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("has_prior_call", e))?
        .try_get("found")
        .map_err(decode("prior call"))?;
        Ok(exists)
    }
}

#[async_trait]
impl StallLog for PostgresJobStore {
    #[instrument(skip(self, entry), fields(tenant_id = %entry.tenant_id, job_id = %entry.job_id), err)]
    async fn append(&self, entry: StallLogEntry) -> Result<(), StoreError> {
        let request = serde_json::to_value(&entry.request)
            .map_err(|e| StoreError::Corrupt(format!("stall log request: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO stall_log (
                action, tenant_id, job_id, prior_status, request,
                correlation_id, times_requeued, reason, logged_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.action.as_str())
        .bind(entry.tenant_id.as_uuid())
        .bind(entry.job_id.get())
        .bind(entry.prior_status.as_str())
        .bind(request)
        .bind(entry.correlation_id.map(|c| c.get()))
        .bind(entry.times_requeued as i32)
        .bind(&entry.reason)
        .bind(entry.logged_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("append_stall_log", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn list(&self, tenant_id: TenantId, limit: usize) -> Result<Vec<StallLogEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT action, tenant_id, job_id, prior_status, request,
                   correlation_id, times_requeued, reason, logged_at
            FROM stall_log
            WHERE tenant_id = $1
            ORDER BY logged_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_stall_log", e))?;

        rows.iter().map(stall_entry_from_row).collect()
    }
}

fn split_range(range: Option<DateRange>) -> (Option<NaiveDate>, Option<NaiveDate>) {
    match range {
        Some(r) => (r.start, Some(r.end)),
        None => (None, None),
    }
}

fn join_range(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<Option<DateRange>, StoreError> {
    match (start, end) {
        (None, None) => Ok(None),
        (start, Some(end)) => Ok(Some(DateRange { start, end })),
        (Some(_), None) => Err(StoreError::Corrupt(
            "date_start present without date_end".to_string(),
        )),
    }
}

fn parse_status(raw: &str) -> Result<JobStatus, StoreError> {
    JobStatus::parse(raw).ok_or_else(|| StoreError::Corrupt(format!("unknown job status '{raw}'")))
}

fn status_counts(rows: &[PgRow]) -> Result<Vec<(JobStatus, u64)>, StoreError> {
    rows.iter()
        .map(|row| {
            let status: String = row.try_get("status").map_err(decode("status count"))?;
            let n: i64 = row.try_get("n").map_err(decode("status count"))?;
            Ok((parse_status(&status)?, n.max(0) as u64))
        })
        .collect()
}

fn job_from_row(row: &PgRow) -> Result<SearchJob, StoreError> {
    let d = decode("search job");
    let id: i64 = row.try_get("id").map_err(&d)?;
    let tenant_id: uuid::Uuid = row.try_get("tenant_id").map_err(&d)?;
    let provider_tenant_id: Option<uuid::Uuid> = row.try_get("provider_tenant_id").map_err(&d)?;
    let name_origin: String = row.try_get("name_origin").map_err(&d)?;
    let status: String = row.try_get("status").map_err(&d)?;
    let priority: i16 = row.try_get("priority").map_err(&d)?;
    let correlation_id: Option<i64> = row.try_get("correlation_id").map_err(&d)?;
    let times_requeued: i32 = row.try_get("times_requeued").map_err(&d)?;
    let filter_id: Option<i64> = row.try_get("filter_id").map_err(&d)?;

    let name_origin: NameOrigin = name_origin
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("name_origin: {e}")))?;

    Ok(SearchJob {
        id: JobId::new(id),
        tenant_id: TenantId::from_uuid(tenant_id),
        provider_tenant_id: provider_tenant_id.map(TenantId::from_uuid),
        subject: subject_from_row(row)?,
        name_origin,
        search_term: row.try_get("search_term").map_err(&d)?,
        refinement_term: row.try_get("refinement_term").map_err(&d)?,
        date_range: join_range(
            row.try_get("date_start").map_err(&d)?,
            row.try_get("date_end").map_err(&d)?,
        )?,
        priority: Priority::from_i16(priority),
        status: parse_status(&status)?,
        correlation_id: correlation_id.map(CorrelationId::new),
        times_requeued: times_requeued.max(0) as u32,
        exempt: row.try_get("exempt").map_err(&d)?,
        filter_id: filter_id.map(FilterId::new),
        manual: row.try_get("manual").map_err(&d)?,
        created_at: row.try_get("created_at").map_err(&d)?,
        updated_at: row.try_get("updated_at").map_err(&d)?,
    })
}

fn call_from_row(row: &PgRow) -> Result<SearchCall, StoreError> {
    let d = decode("search call");
    let tenant_id: uuid::Uuid = row.try_get("tenant_id").map_err(&d)?;
    let provider_tenant_id: Option<uuid::Uuid> = row.try_get("provider_tenant_id").map_err(&d)?;
    let correlation_id: i64 = row.try_get("correlation_id").map_err(&d)?;
    let job_ids: Vec<i64> = row.try_get("job_ids").map_err(&d)?;

    Ok(SearchCall {
        tenant_id: TenantId::from_uuid(tenant_id),
        correlation_id: CorrelationId::new(correlation_id),
        request: SearchRequest {
            subject: subject_from_row(row)?,
            search_term: row.try_get("search_term").map_err(&d)?,
            refinement_term: row.try_get("refinement_term").map_err(&d)?,
            date_range: join_range(
                row.try_get("date_start").map_err(&d)?,
                row.try_get("date_end").map_err(&d)?,
            )?,
            provider_tenant_id: provider_tenant_id.map(TenantId::from_uuid),
        },
        manual: row.try_get("manual").map_err(&d)?,
        job_ids: job_ids.into_iter().map(JobId::new).collect(),
        created_at: row.try_get("created_at").map_err(&d)?,
    })
}

fn stall_entry_from_row(row: &PgRow) -> Result<StallLogEntry, StoreError> {
    let d = decode("stall log");
    let action: String = row.try_get("action").map_err(&d)?;
    let action = match action.as_str() {
        "requeued" => StallAction::Requeued,
        "abandoned" => StallAction::Abandoned,
        other => return Err(StoreError::Corrupt(format!("unknown stall action '{other}'"))),
    };
    let tenant_id: uuid::Uuid = row.try_get("tenant_id").map_err(&d)?;
    let job_id: i64 = row.try_get("job_id").map_err(&d)?;
    let prior_status: String = row.try_get("prior_status").map_err(&d)?;
    let request: serde_json::Value = row.try_get("request").map_err(&d)?;
    let correlation_id: Option<i64> = row.try_get("correlation_id").map_err(&d)?;
    let times_requeued: i32 = row.try_get("times_requeued").map_err(&d)?;

    Ok(StallLogEntry {
        action,
        tenant_id: TenantId::from_uuid(tenant_id),
        job_id: JobId::new(job_id),
        prior_status: parse_status(&prior_status)?,
        request: serde_json::from_value(request)
            .map_err(|e| StoreError::Corrupt(format!("stall log request: {e}")))?,
        correlation_id: correlation_id.map(CorrelationId::new),
        times_requeued: times_requeued.max(0) as u32,
        reason: row.try_get("reason").map_err(&d)?,
        logged_at: row.try_get("logged_at").map_err(&d)?,
    })
}
