use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;
use starsync_client::{ListQuery, MemoryStore, Page, RemoteStore, StoreOp};
use starsync_core::{BatchingConfig, DispatchConfig, EntityKind, Result, Row, StoreId};
use starsync_queue::{BatchAccumulator, BatchEntry, BatchJob, BatchSink, WriteDispatcher};

fn row(v: serde_json::Value) -> Row {
    v.as_object().cloned().unwrap()
}

fn fast_config(workers: usize) -> DispatchConfig {
    DispatchConfig {
        workers,
        max_retries: 3,
        retry_delay_ms: 1,
        backpressure_factor: 2,
        poll_interval_ms: 1,
    }
}

/// Deletes are slow, so a create on another worker would overtake them
/// without the ordering fence.
struct SlowDeletes {
    inner: MemoryStore,
}

impl RemoteStore for SlowDeletes {
    fn list(&self, kind: EntityKind, query: &ListQuery) -> Result<Page> {
        self.inner.list(kind, query)
    }
    fn create(&self, kind: EntityKind, row: Row) -> Result<Row> {
        self.inner.create(kind, row)
    }
    fn bulk_create(&self, kind: EntityKind, rows: &[Row]) -> Result<usize> {
        self.inner.bulk_create(kind, rows)
    }
    fn bulk_update(&self, kind: EntityKind, rows: &[Row]) -> Result<usize> {
        self.inner.bulk_update(kind, rows)
    }
    fn destroy(&self, kind: EntityKind, id: StoreId) -> Result<()> {
        thread::sleep(Duration::from_millis(30));
        self.inner.destroy(kind, id)
    }
}

#[test]
fn writes_reach_the_store_and_are_reported() {
    let store = Arc::new(MemoryStore::new());
    let mut dispatcher = WriteDispatcher::start(store.clone(), fast_config(2)).unwrap();
    dispatcher
        .submit(BatchJob::Create {
            kind: EntityKind::Commodity,
            rows: vec![row(json!({"eddb_id": 1})), row(json!({"eddb_id": 2}))],
        })
        .unwrap();
    dispatcher.wait_for_capacity().unwrap();
    let report = dispatcher.finish().unwrap();
    assert_eq!(report.jobs, 1);
    assert_eq!(report.rows_written, 2);
    assert_eq!(report.lost_jobs, 0);
    assert_eq!(store.rows(EntityKind::Commodity).len(), 2);
    assert_eq!(dispatcher.depth(), 0);
}

#[test]
fn busy_store_is_retried() {
    let store = Arc::new(MemoryStore::new());
    store.fail_next_busy(2);
    let mut dispatcher = WriteDispatcher::start(store.clone(), fast_config(1)).unwrap();
    dispatcher
        .submit(BatchJob::Create {
            kind: EntityKind::Faction,
            rows: vec![row(json!({"eddb_id": 1}))],
        })
        .unwrap();
    let report = dispatcher.finish().unwrap();
    assert_eq!(report.retries, 2);
    assert_eq!(report.rows_written, 1);
}

#[test]
fn exhausted_retries_drop_the_batch_and_continue() {
    let store = Arc::new(MemoryStore::new());
    store.fail_next_busy(4);
    let mut dispatcher = WriteDispatcher::start(store.clone(), fast_config(1)).unwrap();
    for i in 0..2 {
        dispatcher
            .submit(BatchJob::Create {
                kind: EntityKind::Faction,
                rows: vec![row(json!({"eddb_id": i}))],
            })
            .unwrap();
    }
    let report = dispatcher.finish().unwrap();
    assert_eq!(report.jobs, 2);
    assert_eq!(report.lost_jobs, 1);
    assert_eq!(report.rows_lost, 1);
    assert_eq!(store.rows(EntityKind::Faction).len(), 1);
}

#[test]
fn rejected_batch_is_lost_not_fatal() {
    let store = Arc::new(MemoryStore::new());
    let mut dispatcher = WriteDispatcher::start(store.clone(), fast_config(1)).unwrap();
    dispatcher
        .submit(BatchJob::Update {
            kind: EntityKind::System,
            rows: vec![row(json!({"id": 404, "name": "nowhere"}))],
        })
        .unwrap();
    dispatcher
        .submit(BatchJob::Create {
            kind: EntityKind::System,
            rows: vec![row(json!({"eddb_id": 1}))],
        })
        .unwrap();
    let report = dispatcher.finish().unwrap();
    assert_eq!(report.lost_jobs, 1);
    assert_eq!(report.rows_written, 1);
}

#[test]
fn unreachable_store_aborts_the_session() {
    let store = Arc::new(MemoryStore::new());
    store.go_offline();
    let mut dispatcher = WriteDispatcher::start(store.clone(), fast_config(2)).unwrap();
    dispatcher
        .submit(BatchJob::Create {
            kind: EntityKind::System,
            rows: vec![row(json!({"eddb_id": 1}))],
        })
        .unwrap();
    let err = dispatcher.finish().unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn creates_wait_for_earlier_deletes_across_workers() {
    let kind = EntityKind::StationExport;
    let store = Arc::new(SlowDeletes {
        inner: MemoryStore::new(),
    });
    let old = store
        .inner
        .seed(kind, row(json!({"station": 1, "commodity": 7})));

    let mut dispatcher = WriteDispatcher::start(store.clone(), fast_config(2)).unwrap();
    let mut acc = BatchAccumulator::new(BatchingConfig {
        join_threshold: 1,
        ..Default::default()
    });
    acc.add(kind, BatchEntry::Delete(old));
    // same pair again: the unique constraint fails if this overtakes the delete
    acc.add(kind, BatchEntry::Create(row(json!({"station": 1, "commodity": 7}))));
    acc.maybe_flush(&mut dispatcher).unwrap();
    let report = dispatcher.finish().unwrap();

    assert_eq!(report.lost_jobs, 0);
    let ops = store.inner.ops_for(kind);
    assert!(matches!(ops[0], StoreOp::Delete { .. }));
    assert!(matches!(ops[1], StoreOp::Create { .. }));
    assert_eq!(store.inner.rows(kind).len(), 1);
}

#[test]
fn backpressure_bounds_queue_depth() {
    let store = Arc::new(SlowDeletes {
        inner: MemoryStore::new(),
    });
    let config = fast_config(1);
    let limit = config.max_queue_depth();
    let mut dispatcher = WriteDispatcher::start(store.clone(), config).unwrap();
    for i in 0..6u32 {
        dispatcher
            .submit(BatchJob::Delete {
                kind: EntityKind::Listing,
                ids: vec![StoreId(i + 100)],
            })
            .unwrap();
        dispatcher.wait_for_capacity().unwrap();
        assert!(dispatcher.depth() <= limit);
    }
    let report = dispatcher.finish().unwrap();
    assert_eq!(report.jobs, 6);
}
