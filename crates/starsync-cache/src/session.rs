use std::collections::BTreeSet;

use starsync_core::{BatchingConfig, EntityKind, Result};
use starsync_queue::{BatchAccumulator, BatchEntry, BatchSink, DispatchReport};
use tracing::debug;

/// A bulk session: the accumulator and the sink its batches drain into.
///
/// Caches in `Accumulating` state hand their non-no-op verdicts here
/// instead of writing synchronously.
pub struct BulkSession {
    accumulator: BatchAccumulator,
    sink: Box<dyn BatchSink>,
    kinds: BTreeSet<EntityKind>,
}

impl BulkSession {
    pub fn new(batching: BatchingConfig, sink: Box<dyn BatchSink>) -> Self {
        Self {
            accumulator: BatchAccumulator::new(batching),
            sink,
            kinds: BTreeSet::new(),
        }
    }

    pub fn enroll(&mut self, kind: EntityKind) {
        self.kinds.insert(kind);
    }

    /// Kinds whose caches are in bulk mode for this session.
    pub fn kinds(&self) -> &BTreeSet<EntityKind> {
        &self.kinds
    }

    pub fn threshold(&self, kind: EntityKind) -> usize {
        self.accumulator.threshold(kind)
    }

    pub fn pending_len(&self) -> usize {
        self.accumulator.pending_len()
    }

    /// Queue one write; drains full batches (and applies backpressure)
    /// when its key crosses the threshold.
    pub fn queue(&mut self, kind: EntityKind, entry: BatchEntry) -> Result<()> {
        if self.accumulator.add(kind, entry) {
            self.accumulator.maybe_flush(self.sink.as_mut())?;
        }
        Ok(())
    }

    /// Flush every partial batch, then wait for the sink to finish.
    pub fn finish(mut self) -> Result<DispatchReport> {
        let batches = self.accumulator.flush_all(self.sink.as_mut())?;
        debug!(
            "session drained {} final batches ({} total)",
            batches,
            self.accumulator.flushed_batches()
        );
        self.sink.finish()
    }
}
