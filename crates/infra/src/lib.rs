//! Infrastructure layer: stores (in-memory and Postgres), provider client, pipeline.

pub mod adjudication;
pub mod alert;
pub mod clock;
pub mod config;
pub mod error;
pub mod filter;
pub mod jobs;
pub mod pg;
pub mod pipeline;
pub mod provider;
pub mod results;
pub mod run_lock;
pub mod stores;
pub mod tenants;

#[cfg(test)]
mod integration_tests;

pub use error::{PipelineError, StoreError};
pub use pipeline::Pipeline;
pub use stores::Stores;
