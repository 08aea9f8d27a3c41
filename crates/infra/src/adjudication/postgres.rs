//! Postgres-backed determination log.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use mediawatch_core::{ReasonId, ResultId, ScreeningId, TenantId, UserId};
use mediawatch_screening::{Determination, NewDetermination, Verdict};

use super::store::DeterminationStore;
use crate::error::StoreError;
use crate::pg::{decode, map_sqlx_error};

const DETERMINATION_COLUMNS: &str = r#"
    tenant_id, result_id, screening_id, verdict, reason_id, remediation, decided_by, decided_at
"#;

#[derive(Debug, Clone)]
pub struct PostgresDeterminationStore {
    pool: Arc<PgPool>,
}

impl PostgresDeterminationStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl DeterminationStore for PostgresDeterminationStore {
    #[instrument(
        skip(self, determination),
        fields(tenant_id = %determination.tenant_id, result_id = %determination.result_id),
        err
    )]
    async fn append(
        &self,
        determination: NewDetermination,
        now: DateTime<Utc>,
    ) -> Result<Determination, StoreError> {
        let determination = determination.into_determination(now);
        sqlx::query(
            r#"
            INSERT INTO determinations (
                tenant_id, result_id, screening_id, verdict, reason_id,
                remediation, decided_by, decided_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(determination.tenant_id.as_uuid())
        .bind(determination.result_id.get())
        .bind(determination.screening_id.get())
        .bind(determination.verdict.as_str())
        .bind(determination.reason_id.map(|r| r.get()))
        .bind(determination.remediation)
        .bind(determination.decided_by.map(|u| *u.as_uuid()))
        .bind(determination.decided_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("append_determination", e))?;
        Ok(determination)
    }

    #[instrument(skip(self, result_ids), fields(tenant_id = %tenant_id, results = result_ids.len()), err)]
    async fn latest_for(
        &self,
        tenant_id: TenantId,
        screening_id: Option<ScreeningId>,
        result_ids: &[ResultId],
    ) -> Result<HashMap<ResultId, Determination>, StoreError> {
        let ids: Vec<i64> = result_ids.iter().map(|id| id.get()).collect();
        let sql = format!(
            r#"
            SELECT DISTINCT ON (result_id) {DETERMINATION_COLUMNS}
            FROM determinations
            WHERE tenant_id = $1
              AND result_id = ANY($2)
              AND ($3::BIGINT IS NULL OR screening_id = $3)
            ORDER BY result_id, decided_at DESC, id DESC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(ids)
            .bind(screening_id.map(|s| s.get()))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("latest_determinations", e))?;

        rows.iter()
            .map(|row| determination_from_row(row).map(|d| (d.result_id, d)))
            .collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, result_id = %result_id), err)]
    async fn history(
        &self,
        tenant_id: TenantId,
        result_id: ResultId,
    ) -> Result<Vec<Determination>, StoreError> {
        let sql = format!(
            r#"
            SELECT {DETERMINATION_COLUMNS}
            FROM determinations
            WHERE tenant_id = $1 AND result_id = $2
            ORDER BY id ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(result_id.get())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("determination_history", e))?;
        rows.iter().map(determination_from_row).collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn remediation_reasons(&self, tenant_id: TenantId) -> Result<HashSet<ReasonId>, StoreError> {
        let rows = sqlx::query("SELECT reason_id FROM remediation_reasons WHERE tenant_id = $1")
            .bind(tenant_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("remediation_reasons", e))?;
        rows.iter()
            .map(|row| {
                row.try_get::<i64, _>("reason_id")
                    .map(ReasonId::new)
                    .map_err(decode("remediation reason"))
            })
            .collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, reason_id = %reason_id), err)]
    async fn flag_reason(
        &self,
        tenant_id: TenantId,
        reason_id: ReasonId,
        requires_remediation: bool,
    ) -> Result<(), StoreError> {
        let sql = if requires_remediation {
            "INSERT INTO remediation_reasons (tenant_id, reason_id) VALUES ($1, $2) ON CONFLICT DO NOTHING"
        } else {
            "DELETE FROM remediation_reasons WHERE tenant_id = $1 AND reason_id = $2"
        };
        sqlx::query(sql)
            .bind(tenant_id.as_uuid())
            .bind(reason_id.get())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("flag_reason", e))?;
        Ok(())
    }
}

fn determination_from_row(row: &PgRow) -> Result<Determination, StoreError> {
    let d = decode("determination");
    let tenant_id: uuid::Uuid = row.try_get("tenant_id").map_err(&d)?;
    let result_id: i64 = row.try_get("result_id").map_err(&d)?;
    let screening_id: i64 = row.try_get("screening_id").map_err(&d)?;
    let verdict: String = row.try_get("verdict").map_err(&d)?;
    let reason_id: Option<i64> = row.try_get("reason_id").map_err(&d)?;
    let decided_by: Option<uuid::Uuid> = row.try_get("decided_by").map_err(&d)?;

    Ok(Determination {
        tenant_id: TenantId::from_uuid(tenant_id),
        result_id: ResultId::new(result_id),
        screening_id: ScreeningId::new(screening_id),
        verdict: Verdict::parse(&verdict)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown verdict '{verdict}'")))?,
        reason_id: reason_id.map(ReasonId::new),
        remediation: row.try_get("remediation").map_err(&d)?,
        decided_by: decided_by.map(UserId::from_uuid),
        decided_at: row.try_get("decided_at").map_err(&d)?,
    })
}
