//! Infrastructure error types.

use thiserror::Error;

use mediawatch_core::{DomainError, RunId};

/// Storage operation error.
///
/// Expected contention (a conditional update that lost the race) is **not** an
/// error; see [`crate::jobs::TransitionOutcome`].
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),
    /// The write would break a store invariant (e.g. a duplicate live result).
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub(crate) fn poisoned() -> Self {
        Self::Storage("in-memory store lock poisoned".to_string())
    }
}

/// Pipeline-level error.
///
/// Nothing here reaches an end user as a hard failure except validation
/// rejections at enqueue time.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Callback(#[from] crate::provider::CallbackError),
    #[error(transparent)]
    Filter(#[from] crate::filter::FilterError),
    /// The run lock was force-released while run `0` still believed it held it.
    #[error("run {0} no longer holds the run lock")]
    LockLost(RunId),
}
