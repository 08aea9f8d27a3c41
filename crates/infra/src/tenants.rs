//! Per-tenant screening settings.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::instrument;

use mediawatch_core::TenantId;
use mediawatch_screening::DedupMode;

use crate::error::StoreError;
use crate::pg::{decode, map_sqlx_error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantSettings {
    pub dedup_mode: DedupMode,
    /// New hits raise the subject's pending-review counter.
    pub review_required: bool,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            dedup_mode: DedupMode::Standard,
            review_required: true,
        }
    }
}

#[async_trait]
pub trait TenantSettingsStore: Send + Sync {
    /// Settings for the tenant, or the defaults if none were stored.
    async fn get(&self, tenant_id: TenantId) -> Result<TenantSettings, StoreError>;

    async fn put(&self, tenant_id: TenantId, settings: TenantSettings) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryTenantSettings {
    settings: RwLock<HashMap<TenantId, TenantSettings>>,
}

impl InMemoryTenantSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl TenantSettingsStore for InMemoryTenantSettings {
    async fn get(&self, tenant_id: TenantId) -> Result<TenantSettings, StoreError> {
        let settings = self.settings.read().map_err(|_| StoreError::poisoned())?;
        Ok(settings.get(&tenant_id).copied().unwrap_or_default())
    }

    async fn put(&self, tenant_id: TenantId, settings: TenantSettings) -> Result<(), StoreError> {
        self.settings
            .write()
            .map_err(|_| StoreError::poisoned())?
            .insert(tenant_id, settings);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PostgresTenantSettings {
    pool: Arc<PgPool>,
}

impl PostgresTenantSettings {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl TenantSettingsStore for PostgresTenantSettings {
    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn get(&self, tenant_id: TenantId) -> Result<TenantSettings, StoreError> {
        let row = sqlx::query(
            "SELECT dedup_mode, review_required FROM tenant_settings WHERE tenant_id = $1",
        )
        .bind(tenant_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_tenant_settings", e))?;

        let Some(row) = row else {
            return Ok(TenantSettings::default());
        };
        let mode: String = row.try_get("dedup_mode").map_err(decode("tenant settings"))?;
        Ok(TenantSettings {
            dedup_mode: DedupMode::parse(&mode)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown dedup mode '{mode}'")))?,
            review_required: row
                .try_get("review_required")
                .map_err(decode("tenant settings"))?,
        })
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn put(&self, tenant_id: TenantId, settings: TenantSettings) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO tenant_settings (tenant_id, dedup_mode, review_required)
            VALUES ($1, $2, $3)
            ON CONFLICT (tenant_id)
            DO UPDATE SET dedup_mode = EXCLUDED.dedup_mode,
                          review_required = EXCLUDED.review_required
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(settings.dedup_mode.as_str())
        .bind(settings.review_required)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("put_tenant_settings", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_tenant_gets_defaults() {
        let store = InMemoryTenantSettings::new();
        let tenant = TenantId::new();
        assert_eq!(store.get(tenant).await.unwrap(), TenantSettings::default());

        let custom = TenantSettings {
            dedup_mode: DedupMode::HideRevisions,
            review_required: false,
        };
        store.put(tenant, custom).await.unwrap();
        assert_eq!(store.get(tenant).await.unwrap(), custom);
    }
}
