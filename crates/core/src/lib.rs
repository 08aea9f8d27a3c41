//! `mediawatch-core` — shared building blocks.
//!
//! This crate contains **pure** primitives (no infrastructure concerns):
//! strongly-typed identifiers and the domain error model.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{
    CorrelationId, FilterId, JobId, PersonId, ProfileId, ReasonId, ResultId, RunId, ScreeningId,
    TenantId, UserId,
};
