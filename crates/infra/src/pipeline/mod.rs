//! The adverse-media job pipeline.
//!
//! ## Components
//!
//! - `Enqueuer`: filter candidates and interactive requests into `ready` jobs
//! - `Dispatcher`: claims ready jobs and submits them to the provider
//! - `Correlator`: binds refinements to an existing provider session
//! - `Ingestor`: provider callbacks into deduplicated result records
//! - `StallDetector`: requeues or abandons jobs that stopped progressing
//! - `RunCoordinator`: one locked run over all of the above
//! - `CompletionWaiter`: bounded wait for interactive callers
//!
//! [`Pipeline`] wires them over a [`Stores`] bundle.

pub mod coordinator;
pub mod correlation;
pub mod dispatcher;
pub mod enqueuer;
pub mod ingestor;
pub mod stall;
pub mod waiter;

use std::sync::Arc;

pub use coordinator::{RunCoordinator, RunOutcome, RunReport};
pub use correlation::{AttachOutcome, Correlator};
pub use dispatcher::{DispatchReport, Dispatcher};
pub use enqueuer::{Enqueuer, LoadReport};
pub use ingestor::{IngestOutcome, IngestReport, Ingestor};
pub use stall::{StallDetector, StallReport};
pub use waiter::{CompletionReport, CompletionWaiter};

use crate::adjudication::AdjudicationAggregator;
use crate::alert::AlertChannel;
use crate::clock::Clock;
use crate::config::PipelineConfig;
use crate::filter::FilterProvider;
use crate::provider::ScreeningProvider;
use crate::stores::Stores;

/// Every pipeline component, sharing one set of stores.
#[derive(Clone)]
pub struct Pipeline {
    pub stores: Stores,
    pub clock: Arc<dyn Clock>,
    pub enqueuer: Enqueuer,
    pub correlator: Correlator,
    pub ingestor: Ingestor,
    pub aggregator: AdjudicationAggregator,
    pub coordinator: RunCoordinator,
    pub waiter: CompletionWaiter,
}

impl Pipeline {
    pub fn new(
        stores: Stores,
        filters: Arc<dyn FilterProvider>,
        provider: Arc<dyn ScreeningProvider>,
        alerts: Arc<dyn AlertChannel>,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Self {
        let aggregator =
            AdjudicationAggregator::new(stores.results.clone(), stores.determinations.clone());
        let enqueuer = Enqueuer::new(stores.jobs.clone(), stores.calls.clone(), filters, &config);
        let dispatcher = Dispatcher::new(
            stores.jobs.clone(),
            stores.calls.clone(),
            provider,
            &config,
        );
        let stall = StallDetector::new(stores.jobs.clone(), stores.stall_log.clone(), &config);
        let coordinator = RunCoordinator::new(
            clock.clone(),
            stores.run_lock.clone(),
            stores.jobs.clone(),
            alerts,
            enqueuer.clone(),
            stall,
            dispatcher,
            config.clone(),
        );

        Self {
            correlator: Correlator::new(stores.jobs.clone(), stores.calls.clone()),
            ingestor: Ingestor::new(
                stores.jobs.clone(),
                stores.results.clone(),
                stores.tenants.clone(),
                aggregator.clone(),
            ),
            waiter: CompletionWaiter::new(stores.jobs.clone(), &config),
            aggregator,
            enqueuer,
            coordinator,
            clock,
            stores,
        }
    }
}
