//! Adverse-media screening domain.
//!
//! This crate contains the business rules of the adverse-media job queue,
//! implemented purely as deterministic domain logic (no IO, no HTTP, no storage):
//! the search job state machine, enqueue validation, result dedup hashing,
//! adjudication classification and run-status bookkeeping.

pub mod call;
pub mod determination;
pub mod job;
pub mod result;
pub mod run;
pub mod stall;
pub mod subject;

pub use call::SearchCall;
pub use determination::{AdjudicationCounts, Determination, NewDetermination, Verdict};
pub use job::{
    DateRange, EnqueueRequest, JobStatus, NewSearchJob, Priority, SearchJob, SearchRequest,
};
pub use result::{ContentHashes, DedupMode, Hit, NewResultRecord, ResultRecord};
pub use run::{InFlightSnapshot, Phase, PhaseWindow, RunStatus, StuckAssessment};
pub use stall::{StallAction, StallLogEntry};
pub use subject::{NameOrigin, Subject, SubjectKind};
