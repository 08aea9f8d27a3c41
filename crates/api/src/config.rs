//! Process configuration for the API binary.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use mediawatch_infra::config::{PipelineConfig, ProviderConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set when USE_PERSISTENT_STORES=true")]
    Missing(&'static str),
    #[error("invalid {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub alert_channel: String,
    /// Interval between scheduled pipeline runs; `None` disables the scheduler.
    pub run_interval: Option<Duration>,
    pub provider: ProviderConfig,
    pub pipeline: PipelineConfig,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let bind_addr = raw_addr.parse().map_err(|_| ConfigError::Invalid {
            key: "BIND_ADDR",
            value: raw_addr.clone(),
        })?;

        let use_persistent_stores = std::env::var("USE_PERSISTENT_STORES")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);
        let database_url = std::env::var("DATABASE_URL").ok();
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let run_interval = match std::env::var("RUN_INTERVAL_SECS") {
            Ok(raw) => match raw.parse::<u64>() {
                Ok(0) => None,
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => {
                    return Err(ConfigError::Invalid {
                        key: "RUN_INTERVAL_SECS",
                        value: raw,
                    });
                }
            },
            Err(_) => Some(Duration::from_secs(300)),
        };

        Ok(Self {
            bind_addr,
            use_persistent_stores,
            database_url,
            redis_url: std::env::var("REDIS_URL").ok(),
            alert_channel: std::env::var("ALERT_CHANNEL")
                .unwrap_or_else(|_| "mediawatch.alerts".to_string()),
            run_interval,
            provider: ProviderConfig::from_env(),
            pipeline: PipelineConfig::from_env(),
        })
    }
}
