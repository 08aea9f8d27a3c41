//! Configuration loading and representation.
//!
//! Values come from the environment; anything missing or unparseable falls back
//! to the default (unparseable values are logged).

use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;

/// Tunables of the adverse-media pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Max jobs claimed per dispatch batch.
    pub ready_batch_limit: usize,
    /// Dispatch batches per run before yielding.
    pub max_dispatch_rounds: usize,
    /// A dispatched job with no progress for this long is stalled.
    pub stall_timeout: Duration,
    /// Requeues a job may receive before it is abandoned.
    pub requeue_limit: u32,
    /// Max stalled jobs handled per run.
    pub stall_batch_limit: usize,
    /// A run holding the lock longer than this is checked for being stuck.
    pub stuck_threshold: Duration,
    /// Cursor page size when reading candidates from the filter provider.
    pub filter_page_size: usize,
    /// Finished jobs older than this are deleted during cleanup.
    pub finished_retention: Duration,
    /// Max finished jobs deleted per cleanup.
    pub cleanup_batch_limit: usize,
    /// Ceiling for synchronous completion waits.
    pub wait_ceiling: StdDuration,
    /// Poll interval for synchronous completion waits.
    pub wait_poll_interval: StdDuration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ready_batch_limit: 50,
            max_dispatch_rounds: 20,
            stall_timeout: Duration::hours(1),
            requeue_limit: 3,
            stall_batch_limit: 100,
            stuck_threshold: Duration::hours(2),
            filter_page_size: 500,
            finished_retention: Duration::days(30),
            cleanup_batch_limit: 1000,
            wait_ceiling: StdDuration::from_secs(120),
            wait_poll_interval: StdDuration::from_millis(500),
        }
    }
}

impl PipelineConfig {
    /// Load from `MEDIAWATCH_*` environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            ready_batch_limit: env_or("MEDIAWATCH_READY_BATCH_LIMIT", d.ready_batch_limit),
            max_dispatch_rounds: env_or("MEDIAWATCH_MAX_DISPATCH_ROUNDS", d.max_dispatch_rounds),
            stall_timeout: Duration::seconds(env_or(
                "MEDIAWATCH_STALL_TIMEOUT_SECS",
                d.stall_timeout.num_seconds(),
            )),
            requeue_limit: env_or("MEDIAWATCH_REQUEUE_LIMIT", d.requeue_limit),
            stall_batch_limit: env_or("MEDIAWATCH_STALL_BATCH_LIMIT", d.stall_batch_limit),
            stuck_threshold: Duration::seconds(env_or(
                "MEDIAWATCH_STUCK_THRESHOLD_SECS",
                d.stuck_threshold.num_seconds(),
            )),
            filter_page_size: env_or("MEDIAWATCH_FILTER_PAGE_SIZE", d.filter_page_size),
            finished_retention: Duration::days(env_or(
                "MEDIAWATCH_FINISHED_RETENTION_DAYS",
                d.finished_retention.num_days(),
            )),
            cleanup_batch_limit: env_or("MEDIAWATCH_CLEANUP_BATCH_LIMIT", d.cleanup_batch_limit),
            wait_ceiling: StdDuration::from_secs(env_or(
                "MEDIAWATCH_WAIT_CEILING_SECS",
                d.wait_ceiling.as_secs(),
            )),
            wait_poll_interval: StdDuration::from_millis(env_or(
                "MEDIAWATCH_WAIT_POLL_MILLIS",
                d.wait_poll_interval.as_millis() as u64,
            )),
        }
    }
}

/// Outbound screening provider connection settings.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub request_timeout: StdDuration,
}

impl ProviderConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("PROVIDER_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:9090".to_string()),
            api_key: std::env::var("PROVIDER_API_KEY").ok(),
            request_timeout: StdDuration::from_secs(env_or("PROVIDER_TIMEOUT_SECS", 30)),
        }
    }
}

fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match std::env::var(key) {
        Ok(raw) => parse_or(key, &raw, default),
        Err(_) => default,
    }
}

fn parse_or<T>(key: &str, raw: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match raw.trim().parse::<T>() {
        Ok(v) => v,
        Err(_) => {
            tracing::warn!(key, value = raw, "invalid config value; using default");
            default
        }
    }
}
