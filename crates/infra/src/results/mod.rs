//! Adverse-media result records and per-subject summary counters.

pub mod postgres;
pub mod store;

pub use postgres::PostgresResultStore;
pub use store::{InMemoryResultStore, InsertOutcome, ResultStore, SubjectSummary};
