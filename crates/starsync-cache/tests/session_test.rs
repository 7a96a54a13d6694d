use std::sync::Arc;

use serde_json::json;
use starsync_cache::{
    CacheState, DependentLink, Outcome, RefreshKind, RefreshReport, ShareChange, Universe,
};
use starsync_client::{MemoryStore, StoreOp};
use starsync_core::{Commodity, EntityKind, Row, Station, StoreId, SyncConfig, SyncError, System};

fn row(v: serde_json::Value) -> Row {
    v.as_object().cloned().unwrap()
}

fn config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.dispatch.workers = 1;
    config.dispatch.retry_delay_ms = 1;
    config.dispatch.poll_interval_ms = 1;
    config
}

fn universe(store: &Arc<MemoryStore>, config: &SyncConfig) -> Universe {
    Universe::new(store.clone(), config).unwrap()
}

fn system(eddb_id: i64, name: &str, population: i64) -> System {
    System {
        eddb_id: Some(eddb_id),
        edsm_id: Some(eddb_id + 10_000),
        name: Some(name.to_string()),
        population: Some(population),
        x: Some(eddb_id as f64),
        y: Some(0.0),
        z: Some(-1.5),
        ..Default::default()
    }
}

fn station(eddb_id: i64, name: &str, has_market: bool) -> Station {
    Station {
        eddb_id: Some(eddb_id),
        name: Some(name.to_string()),
        has_market: Some(has_market),
        ..Default::default()
    }
}

fn report(reports: &[RefreshReport], kind: EntityKind) -> Option<RefreshKind> {
    reports.iter().find(|r| r.kind == kind).map(|r| r.refresh)
}

#[test]
fn three_system_session() {
    let store = Arc::new(MemoryStore::new());
    let config = config();

    let mut setup = universe(&store, &config);
    setup.prepare(&[EntityKind::System]).unwrap();
    let a_id = setup.system(&system(1, "Alpha", 100)).unwrap().id().unwrap();
    let b_id = setup.system(&system(2, "Beta", 200)).unwrap().id().unwrap();
    store.clear_ops();

    let mut config = config;
    config.batching.overrides.insert("system".to_string(), 4);
    let mut u = universe(&store, &config);
    u.begin_bulk(&[EntityKind::System]).unwrap();

    assert_eq!(u.system(&system(1, "Alpha", 100)).unwrap(), Outcome::Unchanged(a_id));
    assert_eq!(u.system(&system(2, "Beta", 250)).unwrap(), Outcome::Updated(b_id));
    assert_eq!(u.system(&system(3, "Gamma", 0)).unwrap(), Outcome::Created(None));
    assert_eq!(u.state(EntityKind::System).unwrap(), CacheState::Accumulating);

    let summary = u.end_session().unwrap();
    assert_eq!(summary.stats.read, 3);
    assert_eq!(summary.stats.unchanged, 1);
    assert_eq!(summary.stats.updated, 1);
    assert_eq!(summary.stats.created, 1);
    assert_eq!(summary.dispatch.rows_written, 2);
    assert_eq!(summary.dispatch.lost_jobs, 0);
    // two touched ids against a threshold of four: the boundary reloads in full
    assert_eq!(report(&summary.refreshes, EntityKind::System), Some(RefreshKind::Full));
    assert_eq!(store.list_calls().last(), Some(&(EntityKind::System, false)));

    let ops = store.ops_for(EntityKind::System);
    assert_eq!(ops.len(), 2);
    match &ops[0] {
        StoreOp::Update { rows, .. } => {
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0]["id"], json!(b_id.0));
            assert_eq!(rows[0]["population"], json!(250));
        }
        other => panic!("expected the update first, got {:?}", other),
    }
    match &ops[1] {
        StoreOp::Create { rows, .. } => {
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0]["eddb_id"], json!(3));
        }
        other => panic!("expected a create, got {:?}", other),
    }
    assert!(u.systems().id(3).is_some());
    assert_eq!(u.state(EntityKind::System).unwrap(), CacheState::Loaded);

    // repeat pass: everything resolves to unchanged and nothing is written
    store.clear_ops();
    u.begin_bulk(&[EntityKind::System]).unwrap();
    for record in [system(1, "Alpha", 100), system(2, "Beta", 250), system(3, "Gamma", 0)] {
        assert!(matches!(u.system(&record).unwrap(), Outcome::Unchanged(_)));
    }
    let summary = u.end_session().unwrap();
    assert_eq!(summary.stats.changed(), 0);
    assert_eq!(report(&summary.refreshes, EntityKind::System), Some(RefreshKind::Skipped));
    assert!(store.ops().is_empty());
}

#[test]
fn station_exports_gold_silver_to_gold_platinum() {
    let kind = EntityKind::StationExport;
    let (station_id, gold, silver, platinum) = (StoreId(10), StoreId(101), StoreId(102), StoreId(103));
    let store = Arc::new(MemoryStore::new());
    store.seed(kind, row(json!({"station": station_id.0, "commodity": gold.0})));
    let silver_row = store.seed(kind, row(json!({"station": station_id.0, "commodity": silver.0})));

    let mut u = universe(&store, &config());
    u.begin_bulk(&[kind]).unwrap();
    let change = u.join_set(kind, station_id, &[Some(gold), Some(platinum)]).unwrap();
    assert_eq!((change.deleted, change.created), (1, 1));
    let summary = u.end_session().unwrap();

    let ops = store.ops_for(kind);
    assert_eq!(ops.len(), 2);
    assert_eq!(ops[0], StoreOp::Delete { kind, id: silver_row });
    match &ops[1] {
        StoreOp::Create { rows, .. } => {
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0]["commodity"], json!(platinum.0));
            assert_eq!(rows[0]["station"], json!(station_id.0));
        }
        other => panic!("expected a create, got {:?}", other),
    }
    assert_eq!(report(&summary.refreshes, kind), Some(RefreshKind::Partial));
    let children = u.join_cache(kind).unwrap().children(station_id);
    assert_eq!(children, vec![gold, platinum]);

    // same set in another order: no writes
    store.clear_ops();
    u.begin_bulk(&[kind]).unwrap();
    assert!(u.join_set(kind, station_id, &[Some(platinum), None, Some(gold)]).unwrap().is_noop());
    u.end_session().unwrap();
    assert!(store.ops().is_empty());
}

#[test]
fn replace_join_diff_with_several_members() {
    let kind = EntityKind::StationImport;
    let store = Arc::new(MemoryStore::new());
    let mut rows = Vec::new();
    for commodity in [1, 2, 3] {
        rows.push(store.seed(kind, row(json!({"station": 5, "commodity": commodity}))));
    }

    let mut u = universe(&store, &config());
    u.begin_bulk(&[kind]).unwrap();
    u.join_set(kind, StoreId(5), &[Some(StoreId(2)), Some(StoreId(3)), Some(StoreId(4))])
        .unwrap();
    let summary = u.end_session().unwrap();
    assert_eq!(summary.stats.deleted, 1);
    assert_eq!(summary.stats.created, 1);

    let ops = store.ops_for(kind);
    assert_eq!(ops[0], StoreOp::Delete { kind, id: rows[0] });
    assert!(matches!(&ops[1], StoreOp::Create { rows, .. } if rows[0]["commodity"] == json!(4)));
}

#[test]
fn changed_station_cascades_into_its_joins() {
    let store = Arc::new(MemoryStore::new());
    let config = config();
    let mut setup = universe(&store, &config);
    setup.prepare(&[EntityKind::Station]).unwrap();
    let station_id = setup.station(&station(7, "Jameson Memorial", false)).unwrap().id().unwrap();
    store.seed(EntityKind::StationExport, row(json!({"station": station_id.0, "commodity": 1})));

    let mut u = universe(&store, &config);
    u.prepare(&[EntityKind::Station, EntityKind::StationExport, EntityKind::StationShip])
        .unwrap();
    u.register_dependent(DependentLink::new(
        EntityKind::Station,
        EntityKind::StationShip,
        |_, _| Err(SyncError::Decode("ship index unavailable".to_string())),
    ));

    store.clear_ops();
    u.begin_bulk(&[EntityKind::Station]).unwrap();
    assert_eq!(u.station(&station(7, "Jameson Memorial", true)).unwrap(), Outcome::Updated(station_id));
    let summary = u.end_session().unwrap();

    assert_eq!(report(&summary.refreshes, EntityKind::Station), Some(RefreshKind::Partial));
    assert_eq!(report(&summary.refreshes, EntityKind::StationExport), Some(RefreshKind::Partial));
    // failing translation falls back to a full reload instead of failing the parent
    assert_eq!(report(&summary.refreshes, EntityKind::StationShip), Some(RefreshKind::Full));
    // never loaded, so nothing to refresh
    assert_eq!(report(&summary.refreshes, EntityKind::StationImport), None);
    assert_eq!(u.state(EntityKind::StationImport).unwrap(), CacheState::Uninitialized);
    assert!(store.list_calls().contains(&(EntityKind::StationExport, true)));
    assert_eq!(u.join_cache(EntityKind::StationExport).unwrap().children(station_id), vec![StoreId(1)]);
}

#[test]
fn conflicting_identities_are_reported_and_skipped() {
    let store = Arc::new(MemoryStore::new());
    store.seed(EntityKind::System, row(json!({"eddb_id": 1, "edsm_id": 501, "duphash": "0000000000000000"})));
    store.seed(EntityKind::System, row(json!({"eddb_id": 2, "edsm_id": 502, "duphash": "0000000000000000"})));

    let mut u = universe(&store, &config());
    u.begin_bulk(&[EntityKind::System]).unwrap();
    let confused = System {
        eddb_id: Some(1),
        edsm_id: Some(502),
        ..Default::default()
    };
    assert!(matches!(u.system(&confused), Err(SyncError::IdentityConflict { .. })));
    let nameless = System::default();
    assert!(matches!(u.system(&nameless), Err(SyncError::InvalidRecord { .. })));

    let summary = u.end_session().unwrap();
    assert_eq!(summary.stats.read, 2);
    assert_eq!(summary.stats.conflicts, 1);
    assert_eq!(summary.stats.skipped, 1);
    assert!(store.ops().is_empty());
}

#[test]
fn duplicates_within_a_session() {
    let store = Arc::new(MemoryStore::new());
    let gold = Commodity {
        eddb_id: Some(42),
        name: Some("Gold".into()),
        average_price: Some(9_401),
        ..Default::default()
    };
    let mut repriced = gold.clone();
    repriced.average_price = Some(9_500);

    let mut u = universe(&store, &config());
    u.begin_bulk(&[EntityKind::Commodity]).unwrap();
    assert_eq!(u.commodity(&gold).unwrap(), Outcome::Created(None));
    assert_eq!(u.commodity(&gold).unwrap(), Outcome::Duplicate);
    assert_eq!(u.commodity(&repriced).unwrap(), Outcome::Skipped);
    let summary = u.end_session().unwrap();

    assert_eq!(summary.stats.created, 1);
    assert_eq!(summary.stats.unchanged, 1);
    assert_eq!(summary.stats.skipped, 1);
    assert_eq!(store.rows(EntityKind::Commodity).len(), 1);
    assert!(u.store_id(EntityKind::Commodity, 42).is_some());
}

#[test]
fn composition_shares_in_bulk() {
    let kind = EntityKind::BodyMaterial;
    let store = Arc::new(MemoryStore::new());
    let iron = store.seed(kind, row(json!({"body": 5, "material": 1, "share": 20.0})));

    let mut u = universe(&store, &config());
    u.begin_bulk(&[kind]).unwrap();
    assert_eq!(u.composition(kind, StoreId(5), StoreId(1), 20.0).unwrap(), ShareChange::Unchanged);
    assert_eq!(u.composition(kind, StoreId(5), StoreId(1), 25.0).unwrap(), ShareChange::Updated);
    assert_eq!(u.composition(kind, StoreId(5), StoreId(2), 3.0).unwrap(), ShareChange::Created);
    u.end_session().unwrap();

    let ops = store.ops_for(kind);
    assert!(matches!(&ops[0], StoreOp::Update { rows, .. } if rows[0]["id"] == json!(iron.0)));
    assert!(matches!(&ops[1], StoreOp::Create { rows, .. } if rows[0]["material"] == json!(2)));

    // the refreshed index knows the new row, so a later change is an update
    let cache = u.composition_cache(kind).unwrap();
    assert_eq!(cache.share(StoreId(5), StoreId(2)), Some(3.0));
    assert_eq!(u.composition(kind, StoreId(5), StoreId(2), 4.0).unwrap(), ShareChange::Updated);
}

#[test]
fn lookups_write_through_even_in_bulk() {
    let store = Arc::new(MemoryStore::new());
    let mut u = universe(&store, &config());
    u.prepare(&[EntityKind::Government]).unwrap();
    u.begin_bulk(&[EntityKind::System]).unwrap();
    let id = u.lookup(EntityKind::Government, "Cooperative").unwrap();
    assert_eq!(u.lookup_id(EntityKind::Government, "Cooperative"), Some(id));
    assert_eq!(store.rows(EntityKind::Government).len(), 1);
    u.end_session().unwrap();
}

#[test]
fn contract_violations() {
    let store = Arc::new(MemoryStore::new());
    let mut u = universe(&store, &config());
    assert!(matches!(
        u.system(&system(1, "Alpha", 1)),
        Err(SyncError::InvalidState { .. })
    ));
    assert!(matches!(u.end_session(), Err(SyncError::Session(_))));
    u.begin_bulk(&[EntityKind::Faction]).unwrap();
    assert!(matches!(
        u.begin_bulk(&[EntityKind::System]),
        Err(SyncError::Session(_))
    ));
    assert!(matches!(u.begin_bulk_with(&[], Box::new(NullSink)), Err(SyncError::Session(_))));
    u.end_session().unwrap();
    assert!(matches!(u.begin_bulk_with(&[], Box::new(NullSink)), Err(SyncError::Session(_))));
}

struct NullSink;

impl starsync_queue::BatchSink for NullSink {
    fn submit(&mut self, _batch: starsync_queue::BatchJob) -> starsync_core::Result<()> {
        Ok(())
    }

    fn wait_for_capacity(&mut self) -> starsync_core::Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> starsync_core::Result<starsync_queue::DispatchReport> {
        Ok(Default::default())
    }
}

#[test]
fn unreachable_store_aborts_the_session() {
    let store = Arc::new(MemoryStore::new());
    let mut u = universe(&store, &config());
    u.begin_bulk(&[EntityKind::Commodity]).unwrap();
    store.go_offline();
    u.commodity(&Commodity {
        eddb_id: Some(1),
        name: Some("Tea".into()),
        ..Default::default()
    })
    .unwrap();
    let err = u.end_session().unwrap_err();
    assert!(err.is_fatal());
}
