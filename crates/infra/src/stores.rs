//! Store wiring: every persistence trait object the pipeline needs, in one bundle.

use std::sync::Arc;

use sqlx::PgPool;

use crate::adjudication::{DeterminationStore, InMemoryDeterminationStore, PostgresDeterminationStore};
use crate::jobs::{InMemoryJobStore, InMemoryStallLog, JobStore, PostgresJobStore, SearchCallStore, StallLog};
use crate::results::{InMemoryResultStore, PostgresResultStore, ResultStore};
use crate::run_lock::{InMemoryRunLock, PostgresRunLock, RunLock};
use crate::tenants::{InMemoryTenantSettings, PostgresTenantSettings, TenantSettingsStore};

#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub calls: Arc<dyn SearchCallStore>,
    pub stall_log: Arc<dyn StallLog>,
    pub results: Arc<dyn ResultStore>,
    pub determinations: Arc<dyn DeterminationStore>,
    pub tenants: Arc<dyn TenantSettingsStore>,
    pub run_lock: Arc<dyn RunLock>,
}

impl Stores {
    pub fn in_memory() -> Self {
        let jobs = InMemoryJobStore::arc();
        Self {
            jobs: jobs.clone(),
            calls: jobs,
            stall_log: InMemoryStallLog::arc(),
            results: InMemoryResultStore::arc(),
            determinations: InMemoryDeterminationStore::arc(),
            tenants: InMemoryTenantSettings::arc(),
            run_lock: InMemoryRunLock::arc(),
        }
    }

    /// Postgres-backed stores sharing one pool. Call [`crate::pg::apply_schema`] first.
    pub fn postgres(pool: PgPool) -> Self {
        let jobs = Arc::new(PostgresJobStore::new(pool.clone()));
        Self {
            jobs: jobs.clone(),
            calls: jobs.clone(),
            stall_log: jobs,
            results: Arc::new(PostgresResultStore::new(pool.clone())),
            determinations: Arc::new(PostgresDeterminationStore::new(pool.clone())),
            tenants: Arc::new(PostgresTenantSettings::new(pool.clone())),
            run_lock: Arc::new(PostgresRunLock::new(pool)),
        }
    }
}
