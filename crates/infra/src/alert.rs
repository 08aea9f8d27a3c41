//! Operator alert channel. Only stuck-run recovery raises alerts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use mediawatch_screening::{Phase, PhaseWindow, RunStatus};

#[derive(Debug, Clone, Error)]
#[error("alert delivery failed: {0}")]
pub struct AlertError(pub String);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTimestamps {
    pub phase: &'static str,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StuckRunAlert {
    pub detected_at: DateTime<Utc>,
    pub phases: Vec<PhaseTimestamps>,
}

impl StuckRunAlert {
    pub fn new(status: &RunStatus, detected_at: DateTime<Utc>) -> Self {
        Self {
            detected_at,
            phases: status
                .phase_report()
                .into_iter()
                .map(|(phase, w): (Phase, PhaseWindow)| PhaseTimestamps {
                    phase: phase.as_str(),
                    started_at: w.started_at,
                    finished_at: w.finished_at,
                })
                .collect(),
        }
    }
}

#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn stuck_run(&self, alert: &StuckRunAlert) -> Result<(), AlertError>;
}

/// Emits the alert as an error-level structured log event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertChannel;

#[async_trait]
impl AlertChannel for TracingAlertChannel {
    async fn stuck_run(&self, alert: &StuckRunAlert) -> Result<(), AlertError> {
        let phases = serde_json::to_string(&alert.phases).map_err(|e| AlertError(e.to_string()))?;
        error!(
            detected_at = %alert.detected_at,
            phases = %phases,
            "pipeline run stuck; lock force-released"
        );
        Ok(())
    }
}

/// Publishes the alert as JSON on a Redis channel.
#[cfg(feature = "redis")]
#[derive(Debug, Clone)]
pub struct RedisAlertChannel {
    client: redis::Client,
    channel: String,
}

#[cfg(feature = "redis")]
impl RedisAlertChannel {
    pub fn new(redis_url: &str, channel: impl Into<String>) -> Result<Self, AlertError> {
        let client = redis::Client::open(redis_url).map_err(|e| AlertError(e.to_string()))?;
        Ok(Self {
            client,
            channel: channel.into(),
        })
    }
}

#[cfg(feature = "redis")]
#[async_trait]
impl AlertChannel for RedisAlertChannel {
    async fn stuck_run(&self, alert: &StuckRunAlert) -> Result<(), AlertError> {
        use redis::AsyncCommands;

        let payload = serde_json::to_string(alert).map_err(|e| AlertError(e.to_string()))?;
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AlertError(e.to_string()))?;
        let _: i64 = conn
            .publish(&self.channel, payload)
            .await
            .map_err(|e| AlertError(e.to_string()))?;
        Ok(())
    }
}

/// Collects alerts in memory; tests assert on what was raised.
#[derive(Debug, Default)]
pub struct RecordingAlertChannel {
    raised: std::sync::Mutex<Vec<StuckRunAlert>>,
}

impl RecordingAlertChannel {
    pub fn raised(&self) -> Vec<StuckRunAlert> {
        self.raised.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AlertChannel for RecordingAlertChannel {
    async fn stuck_run(&self, alert: &StuckRunAlert) -> Result<(), AlertError> {
        self.raised
            .lock()
            .map_err(|_| AlertError("recording channel poisoned".to_string()))?
            .push(alert.clone());
        Ok(())
    }
}
