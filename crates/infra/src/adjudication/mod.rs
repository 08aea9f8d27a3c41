//! Determinations and adjudication counts.

pub mod aggregator;
pub mod postgres;
pub mod store;

pub use aggregator::AdjudicationAggregator;
pub use postgres::PostgresDeterminationStore;
pub use store::{DeterminationStore, InMemoryDeterminationStore};
