//! Search job persistence.
//!
//! ## Components
//!
//! - `JobStore`: jobs and their compare-and-set status transitions
//! - `SearchCallStore`: outbound provider calls and the jobs linked to them
//! - `StallLog`: audit trail written by the stall detector
//!
//! Each has an in-memory implementation (tests/dev) and a Postgres one.

pub mod postgres;
pub mod stall_log;
pub mod store;

pub use postgres::PostgresJobStore;
pub use stall_log::{InMemoryStallLog, StallLog};
pub use store::{
    InMemoryJobStore, JobStats, JobStore, SearchCallStore, Transition, TransitionOutcome,
};
