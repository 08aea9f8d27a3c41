//! Service wiring: stores, provider, alert channel and the pipeline over them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use mediawatch_infra::alert::{AlertChannel, TracingAlertChannel};
use mediawatch_infra::clock::SystemClock;
use mediawatch_infra::config::PipelineConfig;
use mediawatch_infra::filter::InMemoryFilterProvider;
use mediawatch_infra::pg::apply_schema;
use mediawatch_infra::pipeline::{Pipeline, RunOutcome};
use mediawatch_infra::provider::{HttpScreeningProvider, ScreeningProvider};
use mediawatch_infra::stores::Stores;

use crate::config::ApiConfig;

/// Everything the handlers need.
#[derive(Clone)]
pub struct AppServices {
    pub pipeline: Pipeline,
    /// Filter schedule fed through the API.
    pub filters: Arc<InMemoryFilterProvider>,
}

impl AppServices {
    pub fn new(
        stores: Stores,
        provider: Arc<dyn ScreeningProvider>,
        alerts: Arc<dyn AlertChannel>,
        config: PipelineConfig,
    ) -> Self {
        let filters = InMemoryFilterProvider::arc();
        let pipeline = Pipeline::new(
            stores,
            filters.clone(),
            provider,
            alerts,
            Arc::new(SystemClock),
            config,
        );
        Self { pipeline, filters }
    }

    /// In-memory stores and log-only alerts (dev/test).
    pub fn in_memory(provider: Arc<dyn ScreeningProvider>, config: PipelineConfig) -> Self {
        Self::new(
            Stores::in_memory(),
            provider,
            Arc::new(TracingAlertChannel),
            config,
        )
    }
}

pub async fn build_services(config: &ApiConfig) -> anyhow::Result<AppServices> {
    let stores = if config.use_persistent_stores {
        let url = config
            .database_url
            .as_deref()
            .context("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")?;
        let pool = PgPool::connect(url)
            .await
            .context("failed to connect to Postgres")?;
        apply_schema(&pool).await?;
        info!("using Postgres stores");
        Stores::postgres(pool)
    } else {
        info!("using in-memory stores");
        Stores::in_memory()
    };

    let provider = Arc::new(HttpScreeningProvider::new(&config.provider)?);
    let alerts = build_alerts(config)?;
    Ok(AppServices::new(
        stores,
        provider,
        alerts,
        config.pipeline.clone(),
    ))
}

fn build_alerts(config: &ApiConfig) -> anyhow::Result<Arc<dyn AlertChannel>> {
    #[cfg(feature = "redis")]
    {
        if let Some(url) = config.redis_url.as_deref() {
            let channel = mediawatch_infra::alert::RedisAlertChannel::new(
                url,
                config.alert_channel.clone(),
            )?;
            info!(channel = %config.alert_channel, "stuck-run alerts published to Redis");
            return Ok(Arc::new(channel));
        }
    }
    if config.redis_url.is_some() && !cfg!(feature = "redis") {
        warn!("REDIS_URL set but built without the redis feature; alerts go to the log");
    }
    Ok(Arc::new(TracingAlertChannel))
}

/// Run the pipeline on a fixed interval. Overlapping ticks are resolved by the run lock.
pub fn spawn_scheduler(services: Arc<AppServices>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match services.pipeline.coordinator.run_once().await {
                Ok(RunOutcome::Completed(_)) => {}
                Ok(RunOutcome::Skipped { assessment }) => {
                    info!(assessment = ?assessment, "scheduled run skipped");
                }
                Ok(RunOutcome::Recovered { .. }) => {
                    warn!("scheduled run recovered a stuck lock");
                }
                Ok(RunOutcome::Preempted { run_id }) => {
                    warn!(run_id = %run_id, "scheduled run lost its lock to a recovery");
                }
                Err(e) => error!(error = %e, "scheduled pipeline run failed"),
            }
        }
    })
}
