//! Deterministic in-process provider for tests and local development.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use mediawatch_core::CorrelationId;

use super::{ProviderError, ScreeningProvider, SubmissionRequest};

/// Hands out sequential correlation ids and records every submission. Queued
/// failures are returned (in order) before any further id is issued.
#[derive(Debug)]
pub struct ScriptedProvider {
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    next_id: i64,
    failures: VecDeque<ProviderError>,
    submissions: Vec<SubmissionRequest>,
}

impl ScriptedProvider {
    pub fn starting_at(first_correlation_id: i64) -> Self {
        Self {
            state: Mutex::new(State {
                next_id: first_correlation_id,
                failures: VecDeque::new(),
                submissions: Vec::new(),
            }),
        }
    }

    pub fn fail_next(&self, error: ProviderError) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.push_back(error);
        }
    }

    pub fn submissions(&self) -> Vec<SubmissionRequest> {
        self.state
            .lock()
            .map(|s| s.submissions.clone())
            .unwrap_or_default()
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

#[async_trait]
impl ScreeningProvider for ScriptedProvider {
    async fn submit(&self, request: &SubmissionRequest) -> Result<CorrelationId, ProviderError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ProviderError::Unreachable("scripted provider poisoned".to_string()))?;
        state.submissions.push(request.clone());
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }
        let id = CorrelationId::new(state.next_id);
        state.next_id += 1;
        Ok(id)
    }
}
