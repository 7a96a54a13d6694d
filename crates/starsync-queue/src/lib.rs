//! Batching and dispatch of writes to the remote store.
//!
//! - `accumulator`: bounded per-(kind, operation) batches with delete-first ordering
//! - `dispatcher`: fixed worker pool with sentinel shutdown, retries and backpressure
//! - `fence`: keeps creates behind earlier deletes of the same kind across workers
//! - `job`: the batch, queue and outcome types

pub mod accumulator;
pub mod dispatcher;
pub mod fence;
pub mod job;

pub use accumulator::BatchAccumulator;
pub use dispatcher::{BatchSink, WriteDispatcher};
pub use fence::DeleteFence;
pub use job::{BatchEntry, BatchJob, DispatchReport, JobOutcome, Operation, OutcomeStatus};
