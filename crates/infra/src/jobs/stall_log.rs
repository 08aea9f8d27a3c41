//! Append-only audit log of requeued and abandoned jobs.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use mediawatch_core::TenantId;
use mediawatch_screening::StallLogEntry;

use crate::error::StoreError;

#[async_trait]
pub trait StallLog: Send + Sync {
    async fn append(&self, entry: StallLogEntry) -> Result<(), StoreError>;

    /// Most recent entries for a tenant, newest first.
    async fn list(&self, tenant_id: TenantId, limit: usize) -> Result<Vec<StallLogEntry>, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryStallLog {
    entries: RwLock<Vec<StallLogEntry>>,
}

impl InMemoryStallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl StallLog for InMemoryStallLog {
    async fn append(&self, entry: StallLogEntry) -> Result<(), StoreError> {
        self.entries
            .write()
            .map_err(|_| StoreError::poisoned())?
            .push(entry);
        Ok(())
    }

    async fn list(&self, tenant_id: TenantId, limit: usize) -> Result<Vec<StallLogEntry>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::poisoned())?;
        Ok(entries
            .iter()
            .rev()
            .filter(|e| e.tenant_id == tenant_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
