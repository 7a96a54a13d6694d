use std::collections::BTreeMap;

use starsync_core::{BatchingConfig, EntityKind, Result, Row, StoreId};
use tracing::debug;

use crate::dispatcher::BatchSink;
use crate::job::{BatchEntry, BatchJob, Operation};

#[derive(Debug, Default)]
struct Pending {
    rows: Vec<Row>,
    ids: Vec<StoreId>,
}

impl Pending {
    fn len(&self) -> usize {
        self.rows.len() + self.ids.len()
    }
}

/// Groups record-level writes into bounded batches per (kind, operation).
///
/// Within a key, entries keep their arrival order. A create batch for a
/// kind is never handed to the sink while a delete batch for the same
/// kind is still pending here: the deletes go first, even when only the
/// creates crossed their threshold.
pub struct BatchAccumulator {
    batching: BatchingConfig,
    pending: BTreeMap<(EntityKind, Operation), Pending>,
    queued: usize,
    flushed_batches: usize,
}

impl BatchAccumulator {
    pub fn new(batching: BatchingConfig) -> Self {
        Self {
            batching,
            pending: BTreeMap::new(),
            queued: 0,
            flushed_batches: 0,
        }
    }

    pub fn threshold(&self, kind: EntityKind) -> usize {
        self.batching.threshold(kind)
    }

    /// Entries waiting across all keys.
    pub fn pending_len(&self) -> usize {
        self.queued
    }

    pub fn pending_for(&self, kind: EntityKind, operation: Operation) -> usize {
        self.pending
            .get(&(kind, operation))
            .map_or(0, Pending::len)
    }

    pub fn flushed_batches(&self) -> usize {
        self.flushed_batches
    }

    /// Append one entry. Returns true when its key has reached its threshold.
    pub fn add(&mut self, kind: EntityKind, entry: BatchEntry) -> bool {
        let operation = entry.operation();
        let pending = self.pending.entry((kind, operation)).or_default();
        match entry {
            BatchEntry::Create(row) | BatchEntry::Update(row) => pending.rows.push(row),
            BatchEntry::Delete(id) => pending.ids.push(id),
        }
        self.queued += 1;
        pending.len() >= self.batching.threshold(kind)
    }

    /// Flush every key at or over its threshold. Returns batches handed over.
    pub fn maybe_flush<S: BatchSink + ?Sized>(&mut self, sink: &mut S) -> Result<usize> {
        let full: Vec<(EntityKind, Operation)> = self
            .pending
            .iter()
            .filter(|((kind, _), p)| p.len() >= self.batching.threshold(*kind))
            .map(|(key, _)| *key)
            .collect();

        let mut flushed = 0;
        for (kind, operation) in full {
            flushed += self.flush_key(kind, operation, sink)?;
        }
        Ok(flushed)
    }

    /// Flush everything left, deletes before updates before creates per kind.
    pub fn flush_all<S: BatchSink + ?Sized>(&mut self, sink: &mut S) -> Result<usize> {
        let keys: Vec<(EntityKind, Operation)> = self.pending.keys().copied().collect();
        let mut flushed = 0;
        for (kind, operation) in keys {
            flushed += self.flush_key(kind, operation, sink)?;
        }
        Ok(flushed)
    }

    fn flush_key<S: BatchSink + ?Sized>(
        &mut self,
        kind: EntityKind,
        operation: Operation,
        sink: &mut S,
    ) -> Result<usize> {
        let mut flushed = 0;
        if operation == Operation::Create {
            flushed += self.drain_into(kind, Operation::Delete, sink)?;
        }
        flushed += self.drain_into(kind, operation, sink)?;
        Ok(flushed)
    }

    fn drain_into<S: BatchSink + ?Sized>(
        &mut self,
        kind: EntityKind,
        operation: Operation,
        sink: &mut S,
    ) -> Result<usize> {
        let Some(pending) = self.pending.remove(&(kind, operation)) else {
            return Ok(0);
        };
        let threshold = self.batching.threshold(kind);
        self.queued -= pending.len();

        let mut batches = Vec::new();
        match operation {
            Operation::Delete => {
                for chunk in pending.ids.chunks(threshold) {
                    batches.push(BatchJob::Delete {
                        kind,
                        ids: chunk.to_vec(),
                    });
                }
            }
            Operation::Update | Operation::Create => {
                let mut rows = pending.rows;
                while !rows.is_empty() {
                    let rest = rows.split_off(threshold.min(rows.len()));
                    let chunk = std::mem::replace(&mut rows, rest);
                    batches.push(if operation == Operation::Create {
                        BatchJob::Create { kind, rows: chunk }
                    } else {
                        BatchJob::Update { kind, rows: chunk }
                    });
                }
            }
        }

        let count = batches.len();
        for batch in batches {
            debug!("flush {} {} ({} rows)", kind, operation, batch.len());
            sink.submit(batch)?;
            self.flushed_batches += 1;
            sink.wait_for_capacity()?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::DispatchReport;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        batches: Vec<BatchJob>,
        waits: usize,
    }

    impl BatchSink for Recorder {
        fn submit(&mut self, batch: BatchJob) -> Result<()> {
            self.batches.push(batch);
            Ok(())
        }

        fn wait_for_capacity(&mut self) -> Result<()> {
            self.waits += 1;
            Ok(())
        }

        fn finish(&mut self) -> Result<DispatchReport> {
            Ok(DispatchReport::default())
        }
    }

    fn config(threshold: usize) -> BatchingConfig {
        BatchingConfig {
            default_threshold: threshold,
            large_threshold: threshold,
            join_threshold: threshold,
            ..Default::default()
        }
    }

    fn link(station: u32, commodity: u32) -> Row {
        json!({"station": station, "commodity": commodity})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn add_reports_threshold() {
        let mut acc = BatchAccumulator::new(config(2));
        assert!(!acc.add(EntityKind::Station, BatchEntry::Create(link(1, 1))));
        assert!(acc.add(EntityKind::Station, BatchEntry::Create(link(1, 2))));
        assert_eq!(acc.pending_len(), 2);
        assert_eq!(acc.pending_for(EntityKind::Station, Operation::Create), 2);
    }

    #[test]
    fn maybe_flush_leaves_partial_batches() {
        let mut acc = BatchAccumulator::new(config(2));
        let mut sink = Recorder::default();
        acc.add(EntityKind::Commodity, BatchEntry::Create(link(1, 1)));
        acc.add(EntityKind::Commodity, BatchEntry::Create(link(1, 2)));
        acc.add(EntityKind::Faction, BatchEntry::Create(link(2, 2)));
        assert_eq!(acc.maybe_flush(&mut sink).unwrap(), 1);
        assert_eq!(sink.batches.len(), 1);
        assert_eq!(sink.batches[0].kind(), EntityKind::Commodity);
        assert_eq!(acc.pending_len(), 1);
        assert_eq!(sink.waits, 1);
    }

    #[test]
    fn creates_never_overtake_pending_deletes() {
        let kind = EntityKind::StationExport;
        let mut acc = BatchAccumulator::new(config(2));
        let mut sink = Recorder::default();
        // creates cross the threshold first; the lone delete must still lead
        acc.add(kind, BatchEntry::Delete(StoreId(9)));
        acc.add(kind, BatchEntry::Create(link(1, 1)));
        acc.add(kind, BatchEntry::Create(link(1, 2)));
        acc.maybe_flush(&mut sink).unwrap();
        let ops: Vec<Operation> = sink.batches.iter().map(BatchJob::operation).collect();
        assert_eq!(ops, vec![Operation::Delete, Operation::Create]);
        assert_eq!(acc.pending_len(), 0);
    }

    #[test]
    fn simultaneous_thresholds_flush_delete_first() {
        let kind = EntityKind::StationImport;
        let mut acc = BatchAccumulator::new(config(1));
        let mut sink = Recorder::default();
        acc.add(kind, BatchEntry::Create(link(1, 1)));
        acc.add(kind, BatchEntry::Delete(StoreId(4)));
        acc.maybe_flush(&mut sink).unwrap();
        assert_eq!(sink.batches[0].operation(), Operation::Delete);
        assert_eq!(sink.batches[1].operation(), Operation::Create);
    }

    #[test]
    fn flush_all_chunks_and_preserves_order() {
        let mut acc = BatchAccumulator::new(config(2));
        let mut sink = Recorder::default();
        for i in 0..5 {
            acc.add(EntityKind::Station, BatchEntry::Update(link(i, i)));
        }
        assert_eq!(acc.flush_all(&mut sink).unwrap(), 3);
        let sizes: Vec<usize> = sink.batches.iter().map(BatchJob::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        match &sink.batches[2] {
            BatchJob::Update { rows, .. } => assert_eq!(rows[0]["station"], json!(4)),
            other => panic!("unexpected batch {:?}", other),
        }
        assert_eq!(acc.pending_len(), 0);
        assert_eq!(acc.flushed_batches(), 3);
    }
}
